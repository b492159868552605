// ============================================================================
// Transaction Module
// ============================================================================
//
// Session handle shared between the runner and the caller's closure, plus the
// runner itself (`Database::transaction`).
//
// Lifecycle of one runner invocation:
//
//   child ctx ──start_session──> Session ──start_transaction──> f(session, sc)
//                                                                   │
//             ┌──────────── ok / err / panic ───────────────────────┘
//             v
//   end_session (aborts unfinished txn) ──> cancel child ctx ──> result
//
// ============================================================================

mod runner;
mod session;

pub use session::{Session, SessionContext};
pub(crate) use session::SessionLock;
