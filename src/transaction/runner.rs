use super::{Session, SessionContext};
use crate::connection::Database;
use crate::core::{Context, ModelError};
use crate::storage::Backend;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

impl Database {
    /// Runs `f` inside a session transaction under a background context.
    ///
    /// See [`Database::transaction_with_ctx`].
    pub async fn transaction<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(Session, SessionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ModelError>,
    {
        self.transaction_with_ctx(&Context::background(), f).await
    }

    /// Acquires a session, starts a transaction and hands both to `f`.
    ///
    /// `f` is expected to finish with `session.commit_transaction(&sc)` or
    /// `session.abort_transaction(&sc)`. Whatever happens inside it (normal
    /// return, error or panic) the session is ended before this returns,
    /// which aborts a transaction that was left open. `f`'s result is
    /// returned as-is and panics are resumed after the release.
    ///
    /// The session runs under a child of `ctx`; the child is cancelled once
    /// the session is released, `ctx` itself never is.
    ///
    /// # Errors
    ///
    /// - [`ModelError::SessionAcquisition`] when no session can be opened
    /// - [`ModelError::TransactionStart`] when the transaction cannot begin
    /// - anything `f` returns
    pub async fn transaction_with_ctx<F, Fut, T, E>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        F: FnOnce(Session, SessionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ModelError>,
    {
        let ctx = ctx.with_cancel();

        let session = match self.backend().start_session(&ctx).await {
            Ok(inner) => Session::new(inner),
            Err(err) => {
                ctx.cancel();
                return Err(ModelError::SessionAcquisition(err).into());
            }
        };
        tracing::debug!(session = %session.id(), database = %self.name(), "session started");

        if let Err(err) = session.begin(&ctx).await {
            release(&session, &ctx).await;
            return Err(ModelError::TransactionStart(err).into());
        }
        tracing::debug!(session = %session.id(), "transaction started");

        let sc = SessionContext::new(session.clone(), ctx.clone());
        let handle = session.clone();
        let outcome = AssertUnwindSafe(async move { f(handle, sc).await })
            .catch_unwind()
            .await;

        release(&session, &ctx).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

async fn release(session: &Session, ctx: &Context) {
    if session.end(ctx).await {
        tracing::debug!(session = %session.id(), "unfinished transaction aborted on release");
    }
    tracing::debug!(session = %session.id(), "session ended");
    ctx.cancel();
}
