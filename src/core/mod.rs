pub mod context;
pub mod error;

pub use context::{Context, ContextError, ExecutionContext};
pub use error::{ModelError, Result};
