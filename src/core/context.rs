// ============================================================================
// Execution Context
// ============================================================================
//
// Cancellation and deadline handle threaded through every storage call.
// The model layer never enforces timeouts itself; it only passes the context
// down to the backend, which checks it (memory) or races against it (driver).
//
// ============================================================================

use crate::transaction::Session;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation/deadline-bearing handle passed to storage operations.
///
/// Cloning shares the same cancellation state. Derived contexts
/// (`with_cancel`, `with_timeout`) are children: cancelling a parent cancels
/// them, cancelling a child never reaches the parent.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// Root context: never cancelled, no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Child context that can be cancelled independently of `self`.
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child context that expires after `timeout`, or earlier if the parent does.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reason this context is done, if it is.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drives `fut` until it completes or the context is done, whichever
    /// comes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        self.check()?;
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Err(ContextError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(ContextError::DeadlineExceeded),
                out = fut => Ok(out),
            },
            None => tokio::select! {
                biased;
                _ = self.token.cancelled() => Err(ContextError::Cancelled),
                out = fut => Ok(out),
            },
        }
    }
}

/// Anything a collection operation can run under: a plain [`Context`], or a
/// [`SessionContext`](crate::transaction::SessionContext) that also binds
/// the operation to a session.
pub trait ExecutionContext: Send + Sync {
    fn context(&self) -> &Context;

    fn session(&self) -> Option<&Session> {
        None
    }
}

impl ExecutionContext for Context {
    fn context(&self) -> &Context {
        self
    }
}
