use std::time::Duration;

use chrono::{DateTime, Utc};
use codeintel_worker_record::Upload;
use sqlx::PgPool;

use crate::errors::StoreError;
use crate::sql::{dequeue, heartbeat, mark, requeue, reset_stalled};
use crate::store::{DbHandle, HeartbeatResult, QueueStore, ResetStalledResult, Transactional};

/// Dequeue predicate contributed by the upload handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadCondition {
    /// Only records whose `upload_size` is unknown or at most this many bytes
    MaxUploadSize(i64),
}

/// Retry and reclamation limits of the upload queue.
#[derive(Debug, Clone)]
pub struct PgQueueStoreOptions {
    /// Errored records are dequeued again while `num_failures` stays below this
    max_num_failures: i32,
    /// Stale leases are requeued this many times before the record is failed
    max_num_resets: i32,
    /// Delay before an errored record becomes visible again
    retry_after: Duration,
}

impl Default for PgQueueStoreOptions {
    fn default() -> Self {
        PgQueueStoreOptions {
            max_num_failures: 1,
            max_num_resets: 3,
            retry_after: Duration::from_secs(60),
        }
    }
}

impl PgQueueStoreOptions {
    pub fn max_num_failures(mut self, value: i32) -> Self {
        self.max_num_failures = value;
        self
    }

    pub fn max_num_resets(mut self, value: i32) -> Self {
        self.max_num_resets = value;
        self
    }

    pub fn retry_after(mut self, value: Duration) -> Self {
        self.retry_after = value;
        self
    }
}

/// Postgres-backed queue over the `lsif_uploads` table.
#[derive(Clone)]
pub struct PgQueueStore {
    db: DbHandle,
    options: PgQueueStoreOptions,
}

impl PgQueueStore {
    pub fn new(pool: PgPool, options: PgQueueStoreOptions) -> Self {
        PgQueueStore {
            db: DbHandle::new(pool),
            options,
        }
    }

    pub fn handle(&self) -> &DbHandle {
        &self.db
    }
}

impl Transactional for PgQueueStore {
    async fn transact(&self) -> Result<Self, StoreError> {
        Ok(PgQueueStore {
            db: self.db.transact().await?,
            options: self.options.clone(),
        })
    }

    async fn done<T, E>(&self, result: Result<T, E>) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
    {
        self.db.done(result).await
    }
}

impl QueueStore<Upload> for PgQueueStore {
    type Condition = UploadCondition;

    async fn dequeue(
        &self,
        worker_hostname: &str,
        conditions: &[UploadCondition],
    ) -> Result<Option<Upload>, StoreError> {
        dequeue::dequeue_upload(
            &self.db,
            worker_hostname,
            self.options.max_num_failures,
            conditions,
        )
        .await
    }

    async fn heartbeat(
        &self,
        worker_hostname: &str,
        ids: &[i64],
    ) -> Result<HeartbeatResult, StoreError> {
        heartbeat::heartbeat_uploads(&self.db, worker_hostname, ids).await
    }

    async fn mark_complete(&self, id: i64, worker_hostname: &str) -> Result<bool, StoreError> {
        mark::mark_complete(&self.db, id, worker_hostname).await
    }

    async fn mark_errored(
        &self,
        id: i64,
        worker_hostname: &str,
        failure_message: &str,
    ) -> Result<bool, StoreError> {
        mark::mark_errored(
            &self.db,
            id,
            worker_hostname,
            failure_message,
            self.options.retry_after,
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: i64,
        worker_hostname: &str,
        failure_message: &str,
    ) -> Result<bool, StoreError> {
        mark::mark_failed(&self.db, id, worker_hostname, failure_message).await
    }

    async fn requeue(&self, id: i64, visible_after: DateTime<Utc>) -> Result<(), StoreError> {
        requeue::requeue_upload(&self.db, id, visible_after).await
    }

    async fn reset_stalled(&self, stalled_after: Duration) -> Result<ResetStalledResult, StoreError> {
        reset_stalled::reset_stalled_uploads(&self.db, stalled_after, self.options.max_num_resets)
            .await
    }

    async fn queued_count(&self) -> Result<i64, StoreError> {
        dequeue::queued_count(&self.db).await
    }
}
