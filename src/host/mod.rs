//! Execution host side: time budget, collaborator wiring and the
//! per-invocation handler.

pub mod collaborators;
pub mod deadline;
pub mod handler;

pub use collaborators::Collaborators;
pub use deadline::{
    Deadline, DeadlineGuard, ExecutionContext, FixedBudget, UnknownBudget,
    FALLBACK_REMAINING_TIME,
};
pub use handler::{HandlerOutcome, HandlerResponse, WatchdogHandler, RESPONSE_MESSAGE};
