use docmodel::bson::doc;
use docmodel::prelude::dx::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize, Model)]
struct Book {
    #[serde(flatten)]
    #[model(base)]
    base: DefaultModel,
    name: String,
    pages: i32,
}

impl Book {
    fn new(name: &str, pages: i32) -> Self {
        Self {
            base: DefaultModel::new(),
            name: name.to_string(),
            pages,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docmodel=debug")),
        )
        .init();

    let url = std::env::var("DOCMODEL_URL")
        .unwrap_or_else(|_| "memory://localhost/mgm_lab".to_string());
    let config = ModelConfig::from_url(&url)
        .map_err(anyhow::Error::msg)?
        .app_name("crud-demo");
    let db = Database::connect(config).await?;

    println!("📚 docmodel CRUD demo on {}", db.name());
    println!("{}", "=".repeat(70));

    // Create
    let mut book = Book::new("Pride and Prejudice", 345);
    let books = db.coll(&book);
    books.create(&mut book).await?;
    println!("✅ created {} ({})", book.name, book.get_id_str());
    println!(
        "   create_time={} last_modify_time={}",
        book.base.created_at(),
        book.base.updated_at()
    );

    // Read
    let found = books
        .find_by_id(book.get_id_str())
        .await?
        .ok_or_else(|| anyhow::anyhow!("book {} vanished", book.get_id_str()))?;
    println!("🔎 found {:?}", found.name);

    // Update
    book.pages = 400;
    books.update(&mut book).await?;
    println!("✏️  updated pages to {}", book.pages);

    // Transaction: one commit, one abort
    db.transaction(|session, sc| {
        let books = books.clone();
        async move {
            books.create_with_ctx(&sc, &mut Book::new("Emma", 474)).await?;
            session.commit_transaction(&sc).await
        }
    })
    .await?;

    db.transaction(|session, sc| {
        let books = books.clone();
        async move {
            books.create_with_ctx(&sc, &mut Book::new("Persuasion", 249)).await?;
            session.abort_transaction(&sc).await
        }
    })
    .await?;

    println!("📊 books stored: {}", books.count(doc! {}).await?);

    // Delete
    books.delete(&mut book).await?;
    println!("🗑️  deleted, {} left", books.count(doc! {}).await?);

    let wire = book.base.encode_msg()?;
    println!("📦 msgpack header: {} bytes", wire.len());

    Ok(())
}
