use std::fmt;
use std::time::Duration;

/// Why an execution was cancelled by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The store no longer recognises the lease.
    HeartbeatLost,
    /// The store asked for the record to be cancelled.
    StoreRequested,
    /// The worker is shutting down and the drain timeout expired.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::HeartbeatLost => "heartbeat lost",
            CancelReason::StoreRequested => "cancellation requested by store",
            CancelReason::Shutdown => "worker shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RunHandlerError<E> {
    /// The handler panicked, with the panic payload when it was a string.
    Panic(String),
    /// The execution context was cancelled from outside.
    Cancelled,
    /// The execution exceeded the maximum runtime.
    TimedOut(Duration),
    Handler(E),
}

impl<E> RunHandlerError<E> {
    pub fn is_panic(&self) -> bool {
        matches!(self, RunHandlerError::Panic(_))
    }

    /// Cancellations and timeouts leave the lease to the store.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            RunHandlerError::Cancelled | RunHandlerError::TimedOut(_)
        )
    }

    pub fn is_handler_error(&self) -> bool {
        matches!(self, RunHandlerError::Handler(_))
    }
}

impl<E: fmt::Display> fmt::Display for RunHandlerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunHandlerError::Panic(msg) => write!(f, "handler panicked: {msg}"),
            RunHandlerError::Cancelled => f.write_str("handler execution was cancelled"),
            RunHandlerError::TimedOut(max) => {
                write!(f, "handler exceeded maximum runtime of {}s", max.as_secs_f64())
            }
            RunHandlerError::Handler(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug)]
pub struct HandleResult<O, E> {
    pub duration: Duration,
    pub result: Result<O, RunHandlerError<E>>,
}

impl<O, E> HandleResult<O, E> {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn result(&self) -> &Result<O, RunHandlerError<E>> {
        &self.result
    }
}
