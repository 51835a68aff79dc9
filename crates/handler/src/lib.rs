mod handler;
mod result;
mod runner;

pub use handler::{HandleOutcome, Handler, PreDequeue};
pub use result::{CancelReason, HandleResult, RunHandlerError};
pub use runner::run_handler;
