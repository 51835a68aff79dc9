//! Database-backed job queue engine and the precise code-intel upload
//! processor built on it.
//!
//! The engine ([`Worker`]) leases records from a [`QueueStore`], renews their
//! leases while a [`Handler`] runs, and marks each record according to the
//! outcome. [`UploadHandler`] is the handler that turns raw LSIF or SCIP
//! uploads into queryable code-intel data.

pub mod budget;
mod builder;
pub mod config;
pub mod errors;
mod heartbeat;
pub mod location_cache;
pub mod metrics;
mod resetter;
mod sql;
pub mod store;
mod streams;
pub mod uploads;
mod worker;

pub use budget::UploadBudget;
pub use builder::WorkerOptions;
pub use config::UploadWorkerConfig;
pub use errors::StoreError;
pub use location_cache::{GitserverLocationResolver, LocationCache, LocationResolver};
pub use metrics::{UploadMetrics, WorkerMetrics};
pub use resetter::{Resetter, ResetterOptions};
pub use store::{
    in_transaction, DbHandle, HeartbeatResult, PgQueueStore, PgQueueStoreOptions, QueueStore,
    ResetStalledResult, Transactional, UploadCondition,
};
pub use streams::StreamSource;
pub use uploads::{
    BlobReader, BlobStore, BoxError, GitserverClient, LsifStore, PgLsifStore, PgUploadsStore,
    Repo, RepoStore, ResolveRevError, UploadError, UploadHandler, UploadsStore, REQUEUE_DELAY,
};
pub use worker::{ReleaseError, Worker};

pub use codeintel_worker_handler::{
    CancelReason, HandleOutcome, HandleResult, Handler, PreDequeue, RunHandlerError,
};
pub use codeintel_worker_migrations::{
    current_migration, migrate, MigrateError, Migration, CODEINTEL_MIGRATIONS,
    FRONTEND_MIGRATIONS,
};
pub use codeintel_worker_record::{ContentType, Record, Upload, UploadState};
