use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use codeintel_worker_record::Record;

use crate::errors::StoreError;

mod handle;
mod pg;

pub use handle::DbHandle;
pub use pg::{PgQueueStore, PgQueueStoreOptions, UploadCondition};

/// A store whose operations can be grouped into a unit of work.
///
/// `transact` returns a copy of the store bound to a new transaction (or to a
/// savepoint when the store is already transactional). `done` ends that unit
/// of work: commit on Ok, rollback on Err.
pub trait Transactional: Clone + Send + Sync + Sized + 'static {
    fn transact(&self) -> impl Future<Output = Result<Self, StoreError>> + Send;

    fn done<T, E>(&self, result: Result<T, E>) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Send,
        E: From<StoreError> + Send;
}

/// Runs `f` against a transactional copy of `store` and commits or rolls back
/// depending on its outcome.
pub async fn in_transaction<S, T, E, F, Fut>(store: &S, f: F) -> Result<T, E>
where
    S: Transactional,
    T: Send,
    E: From<StoreError> + Send,
    F: FnOnce(S) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let tx = store.transact().await?;
    let result = f(tx.clone()).await;
    tx.done(result).await
}

/// Outcome of a heartbeat round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatResult {
    /// Ids the store still considers leased by the caller
    pub known: Vec<i64>,
    /// Ids whose cancellation was requested out of band
    pub cancel: Vec<i64>,
}

/// Outcome of a stalled-lease reclamation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetStalledResult {
    /// Records put back in the queue
    pub reset: Vec<i64>,
    /// Records that exhausted their resets and were failed
    pub failed: Vec<i64>,
}

/// Persistent queue of records of type `R`.
///
/// A record leased through `dequeue` belongs to `worker_hostname` until it is
/// marked, requeued, or reclaimed by `reset_stalled`. The mark operations
/// return `false` when the record is no longer owned by the caller, in which
/// case nothing was written.
pub trait QueueStore<R: Record>: Transactional {
    /// Extra predicate a handler can attach to dequeue.
    type Condition: Send + Sync + 'static;

    fn dequeue(
        &self,
        worker_hostname: &str,
        conditions: &[Self::Condition],
    ) -> impl Future<Output = Result<Option<R>, StoreError>> + Send;

    fn heartbeat(
        &self,
        worker_hostname: &str,
        ids: &[i64],
    ) -> impl Future<Output = Result<HeartbeatResult, StoreError>> + Send;

    fn mark_complete(
        &self,
        id: i64,
        worker_hostname: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn mark_errored(
        &self,
        id: i64,
        worker_hostname: &str,
        failure_message: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn mark_failed(
        &self,
        id: i64,
        worker_hostname: &str,
        failure_message: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns the record to the queue, invisible until `visible_after`.
    fn requeue(
        &self,
        id: i64,
        visible_after: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Reclaims leases whose heartbeat is older than `stalled_after`.
    fn reset_stalled(
        &self,
        stalled_after: Duration,
    ) -> impl Future<Output = Result<ResetStalledResult, StoreError>> + Send;

    fn queued_count(&self) -> impl Future<Output = Result<i64, StoreError>> + Send;
}
