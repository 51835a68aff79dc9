use std::future::Future;

use codeintel_worker_record::Record;

/// What a handler did with a record it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The record was fully processed and should be marked complete.
    Completed,
    /// The handler already put the record back in the queue through the store,
    /// the worker must not release it a second time.
    Requeued,
}

/// Answer of a [`Handler::pre_dequeue`] hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreDequeue<C> {
    /// Dequeue a record matching every one of these extra conditions.
    Dequeue(Vec<C>),
    /// Do not dequeue anything during this polling cycle.
    Skip,
}

/// Business logic run by the worker for each leased record.
///
/// The hook methods have no-op defaults; a handler that throttles admission
/// overrides `pre_dequeue`, `pre_handle` and `post_handle` together.
/// `post_handle` is always called once `pre_handle` has been, whatever the
/// outcome of `handle` (success, error, panic or cancellation).
pub trait Handler<R: Record>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Extra dequeue predicate type understood by the queue store.
    type Condition: Send + Sync + 'static;

    fn handle(
        &self,
        record: R,
    ) -> impl Future<Output = Result<HandleOutcome, Self::Error>> + Send;

    /// Errors classified as non-retryable mark the record failed instead of errored.
    fn is_non_retryable(&self, _error: &Self::Error) -> bool {
        false
    }

    fn pre_dequeue(&self) -> impl Future<Output = PreDequeue<Self::Condition>> + Send {
        async { PreDequeue::Dequeue(Vec::new()) }
    }

    fn pre_handle(&self, _record: &R) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn post_handle(&self, _record: &R) -> impl Future<Output = ()> + Send {
        async {}
    }
}
