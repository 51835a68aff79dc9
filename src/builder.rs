use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use codeintel_worker_handler::Handler;
use codeintel_worker_record::Record;
use codeintel_worker_shutdown_signal::shutdown_signal;
use rand::RngCore;
use tokio_util::sync::CancellationToken;

use crate::heartbeat::RunningJobs;
use crate::metrics::WorkerMetrics;
use crate::store::QueueStore;
use crate::Worker;

/// Configuration options for a [`Worker`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use codeintel_worker::{PgQueueStore, PgQueueStoreOptions, WorkerOptions};
///
/// # fn example<H>(pool: sqlx::PgPool, handler: H)
/// # where
/// #     H: codeintel_worker_handler::Handler<
/// #         codeintel_worker_record::Upload,
/// #         Condition = codeintel_worker::UploadCondition,
/// #     >,
/// # {
/// let store = PgQueueStore::new(pool, PgQueueStoreOptions::default());
/// let worker = WorkerOptions::default()
///     .name("codeintel_upload_worker")
///     .concurrency(4)
///     .poll_interval(Duration::from_secs(1))
///     .init(store, handler);
/// # }
/// ```
#[derive(Default)]
pub struct WorkerOptions {
    /// Name used in logs, metrics and as the prefix of the worker id
    name: Option<String>,

    /// Number of records handled concurrently
    concurrency: Option<usize>,

    /// How often idle slots poll the store
    poll_interval: Option<Duration>,

    /// How often leases of running records are renewed
    heartbeat_interval: Option<Duration>,

    /// Upper bound on a single handler execution
    maximum_runtime_per_job: Option<Duration>,

    /// Consecutive unacknowledged heartbeats before a record is abandoned
    max_missed_heartbeats: Option<u32>,

    /// How long running records may finish after shutdown is requested
    drain_timeout: Option<Duration>,

    /// Whether interrupt and terminate signals stop the worker
    listen_os_shutdown_signals: bool,

    metrics: Option<WorkerMetrics>,
}

impl WorkerOptions {
    /// Creates the worker over `store`, running `handler` for every record.
    pub fn init<R, S, H>(self, store: S, handler: H) -> Worker<R, S, H>
    where
        R: Record,
        S: QueueStore<R>,
        H: Handler<R, Condition = S::Condition>,
    {
        let name = self.name.unwrap_or_else(|| String::from("codeintel_worker"));

        let mut random_bytes = [0u8; 9];
        rand::rng().fill_bytes(&mut random_bytes);

        let shutdown_trigger = CancellationToken::new();

        Worker {
            worker_id: format!("{name}_{}", hex::encode(random_bytes)),
            name,
            concurrency: self.concurrency.unwrap_or_else(num_cpus::get),
            poll_interval: self.poll_interval.unwrap_or(Duration::from_secs(1)),
            heartbeat_interval: self.heartbeat_interval.unwrap_or(Duration::from_secs(1)),
            maximum_runtime_per_job: self.maximum_runtime_per_job,
            max_missed_heartbeats: self.max_missed_heartbeats.unwrap_or(1),
            drain_timeout: self.drain_timeout.unwrap_or(Duration::from_secs(5)),
            store,
            handler: Arc::new(handler),
            running: RunningJobs::default(),
            metrics: self.metrics,
            shutdown_signal: shutdown_signal(
                shutdown_trigger.clone(),
                self.listen_os_shutdown_signals,
            ),
            shutdown_trigger,
            _record: PhantomData,
        }
    }

    /// Sets the name of the worker.
    ///
    /// # Default
    /// `"codeintel_worker"`.
    pub fn name(mut self, value: &str) -> Self {
        self.name = Some(value.into());
        self
    }

    /// Sets the number of records that can be handled concurrently.
    ///
    /// Every slot dequeues at most one record at a time, so this is also the
    /// maximum number of leases the worker holds.
    ///
    /// # Default
    /// If not specified, defaults to the number of logical CPUs in the system.
    ///
    /// # Panics
    /// Panics if the value is 0, as at least one record must be processable.
    pub fn concurrency(mut self, value: usize) -> Self {
        assert!(value > 0, "Concurrency must be greater than 0");
        self.concurrency = Some(value);
        self
    }

    /// Sets how often free slots ask the store for work.
    ///
    /// A slot that just released a record dequeues again immediately, so
    /// this only bounds the latency of an idle worker.
    ///
    /// # Default
    /// 1 second.
    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = Some(value);
        self
    }

    /// Sets how often the leases of running records are renewed.
    ///
    /// # Default
    /// 1 second.
    pub fn heartbeat_interval(mut self, value: Duration) -> Self {
        self.heartbeat_interval = Some(value);
        self
    }

    /// Bounds a single handler execution.
    ///
    /// An execution exceeding it is cancelled like a lost lease: the record
    /// is not marked and is reclaimed by the store once its lease goes stale.
    ///
    /// # Default
    /// Unbounded.
    pub fn maximum_runtime_per_job(mut self, value: Duration) -> Self {
        self.maximum_runtime_per_job = Some(value);
        self
    }

    /// Sets how many consecutive heartbeats may fail to acknowledge a record
    /// before its execution is cancelled.
    ///
    /// # Default
    /// 1, the first unacknowledged heartbeat cancels.
    ///
    /// # Panics
    /// Panics if the value is 0.
    pub fn max_missed_heartbeats(mut self, value: u32) -> Self {
        assert!(value > 0, "max_missed_heartbeats must be greater than 0");
        self.max_missed_heartbeats = Some(value);
        self
    }

    /// Sets how long running records may finish once shutdown is requested
    /// before they are cancelled.
    ///
    /// # Default
    /// 5 seconds.
    pub fn drain_timeout(mut self, value: Duration) -> Self {
        self.drain_timeout = Some(value);
        self
    }

    /// Makes SIGINT, SIGTERM and SIGHUP (Ctrl-C and console close on
    /// windows) request a shutdown.
    ///
    /// # Default
    /// Disabled, shutdown is only requested through [`Worker::request_shutdown`].
    pub fn listen_os_shutdown_signals(mut self, value: bool) -> Self {
        self.listen_os_shutdown_signals = value;
        self
    }

    /// Records handling outcomes and durations into `metrics`.
    pub fn metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
