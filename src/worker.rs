use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use codeintel_worker_handler::{
    run_handler, CancelReason, HandleOutcome, HandleResult, Handler, PreDequeue, RunHandlerError,
};
use codeintel_worker_record::Record;
use codeintel_worker_shutdown_signal::ShutdownSignal;
use futures::{stream, StreamExt};
use getset::Getters;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::WorkerOptions;
use crate::errors::StoreError;
use crate::heartbeat::{Heartbeat, RunningJobs};
use crate::metrics::WorkerMetrics;
use crate::store::QueueStore;
use crate::streams::{job_signal_stream, StreamSource};

/// Leases records of type `R` from `S` and runs `H` on each of them.
///
/// The worker:
/// - keeps up to `concurrency` records in flight, each in its own slot
/// - asks the handler for extra dequeue predicates before each dequeue
/// - renews the leases of running records and cancels the ones it lost
/// - marks each record according to the outcome of its handler
/// - drains running records on shutdown, cancelling them after a timeout
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Worker<R, S, H> {
    /// Unique identifier of this worker instance, used as lease owner
    pub(crate) worker_id: String,
    pub(crate) name: String,
    pub(crate) concurrency: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) maximum_runtime_per_job: Option<Duration>,
    pub(crate) max_missed_heartbeats: u32,
    pub(crate) drain_timeout: Duration,
    pub(crate) store: S,
    pub(crate) handler: Arc<H>,
    #[getset(skip)]
    pub(crate) running: RunningJobs,
    #[getset(skip)]
    pub(crate) metrics: Option<WorkerMetrics>,
    /// Resolves once shutdown has been requested
    pub(crate) shutdown_signal: ShutdownSignal,
    #[getset(skip)]
    pub(crate) shutdown_trigger: CancellationToken,
    #[getset(skip)]
    pub(crate) _record: PhantomData<fn() -> R>,
}

/// Errors raised while releasing a record after its handler returned.
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("Failed to mark record {id} complete: {source}")]
    MarkComplete {
        id: i64,
        #[source]
        source: StoreError,
    },
    #[error("Failed to mark record {id} errored: {source}")]
    MarkErrored {
        id: i64,
        #[source]
        source: StoreError,
    },
    #[error("Failed to mark record {id} failed: {source}")]
    MarkFailed {
        id: i64,
        #[source]
        source: StoreError,
    },
}

/// How a slot's attempt to process one record ended.
enum SlotOutcome {
    /// A record was handled and released; the slot may dequeue again.
    Processed,
    /// Nothing to do for this polling cycle.
    Idle,
}

impl Worker<(), (), ()> {
    /// Creates a new `WorkerOptions` builder with default settings.
    pub fn options() -> WorkerOptions {
        WorkerOptions::default()
    }
}

impl<R, S, H> Worker<R, S, H>
where
    R: Record,
    S: QueueStore<R>,
    H: Handler<R, Condition = S::Condition>,
{
    /// Runs the worker until shutdown is requested and running records are
    /// drained.
    ///
    /// Store errors never stop the worker: they are logged and the affected
    /// slot retries on the next polling cycle.
    pub async fn run(&self) {
        info!(worker_id = %self.worker_id, name = %self.name, concurrency = self.concurrency, "Worker started");

        let signals = job_signal_stream(
            self.poll_interval,
            self.shutdown_signal.clone(),
            self.concurrency,
        );
        let runner = signals.for_each_concurrent(self.concurrency, |source| self.fill_slot(source));

        self.with_heartbeat_and_drain(runner).await;

        info!(worker_id = %self.worker_id, "Worker stopped");
    }

    /// Processes every record currently available, then returns.
    ///
    /// Each of the `concurrency` slots keeps dequeuing until the store has
    /// nothing left for it or shutdown is requested.
    pub async fn run_once(&self) {
        let runner = stream::iter(0..self.concurrency)
            .for_each_concurrent(self.concurrency, |_| self.fill_slot(StreamSource::RunOnce));

        self.with_heartbeat_and_drain(runner).await;
    }

    /// Requests a graceful shutdown.
    ///
    /// No record is dequeued afterwards. Running records get `drain_timeout`
    /// to finish before being cancelled, and `run` returns once all of them
    /// have been released.
    pub fn request_shutdown(&self) {
        self.shutdown_trigger.cancel();
    }

    /// Number of records currently held by this worker.
    pub async fn running_count(&self) -> usize {
        self.running.len().await
    }

    async fn with_heartbeat_and_drain(&self, runner: impl std::future::Future<Output = ()>) {
        let stop_heartbeat = CancellationToken::new();
        let heartbeat = Heartbeat::<R, S> {
            store: &self.store,
            running: &self.running,
            worker_id: &self.worker_id,
            interval: self.heartbeat_interval,
            max_missed: self.max_missed_heartbeats,
            _record: PhantomData,
        }
        .run(stop_heartbeat.clone());

        let drain = async {
            self.shutdown_signal.clone().await;
            tokio::time::sleep(self.drain_timeout).await;
            let cancelled = self.running.cancel_all(CancelReason::Shutdown).await;
            if !cancelled.is_empty() {
                warn!(
                    count = cancelled.len(),
                    drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                    "Drain timeout expired, cancelling running records"
                );
            }
        };

        let runner = async {
            tokio::pin!(runner);
            tokio::pin!(drain);
            tokio::select! {
                _ = &mut runner => {}
                _ = &mut drain => runner.await,
            }
            stop_heartbeat.cancel();
        };

        tokio::join!(runner, heartbeat);
    }

    /// Keeps one slot busy: dequeues and processes records until there is
    /// nothing left for it.
    async fn fill_slot(&self, source: StreamSource) {
        while !self.shutdown_trigger.is_cancelled() {
            match self.process_one(source).await {
                SlotOutcome::Processed => continue,
                SlotOutcome::Idle => break,
            }
        }
    }

    async fn process_one(&self, source: StreamSource) -> SlotOutcome {
        let conditions = match self.handler.pre_dequeue().await {
            PreDequeue::Dequeue(conditions) => conditions,
            PreDequeue::Skip => {
                debug!(?source, "Dequeue skipped by handler");
                return SlotOutcome::Idle;
            }
        };

        let record = match self.store.dequeue(&self.worker_id, &conditions).await {
            Ok(Some(record)) => record,
            Ok(None) => return SlotOutcome::Idle,
            Err(e) => {
                error!(error = %e, ?source, "Failed to dequeue record");
                return SlotOutcome::Idle;
            }
        };

        if let Err(e) = self.run_and_release(record).await {
            error!(error = %e, "Failed to release record");
        }
        SlotOutcome::Processed
    }

    async fn run_and_release(&self, record: R) -> Result<(), ReleaseError> {
        let id = record.id();
        let token = self.running.register(id).await;
        if let Some(metrics) = &self.metrics {
            metrics.running.inc();
        }

        debug!(record_id = id, kind = R::KIND, worker_id = %self.worker_id, "Handling record");

        self.handler.pre_handle(&record).await;
        let result = run_handler(
            self.handler.clone(),
            record.clone(),
            token,
            self.maximum_runtime_per_job,
        )
        .await;
        self.handler.post_handle(&record).await;

        let cancel_reason = self.running.remove(id).await;
        if let Some(metrics) = &self.metrics {
            metrics.running.dec();
        }

        self.release(id, result, cancel_reason).await
    }

    async fn release(
        &self,
        id: i64,
        result: HandleResult<HandleOutcome, H::Error>,
        cancel_reason: Option<CancelReason>,
    ) -> Result<(), ReleaseError> {
        let duration = result.duration();
        let duration_ms = duration.as_millis() as u64;

        let outcome = match result.result {
            Ok(HandleOutcome::Completed) => {
                let owned = self
                    .store
                    .mark_complete(id, &self.worker_id)
                    .await
                    .map_err(|source| ReleaseError::MarkComplete { id, source })?;
                if owned {
                    info!(record_id = id, kind = R::KIND, duration_ms, "Completed record");
                } else {
                    warn!(record_id = id, kind = R::KIND, "Record completed but its lease was lost");
                }
                "completed"
            }
            Ok(HandleOutcome::Requeued) => {
                info!(record_id = id, kind = R::KIND, duration_ms, "Record requeued by handler");
                "requeued"
            }
            Err(RunHandlerError::Handler(e)) if self.handler.is_non_retryable(&e) => {
                let message = error_chain(&e);
                warn!(record_id = id, kind = R::KIND, duration_ms, error = %message, "Record failed permanently");
                self.store
                    .mark_failed(id, &self.worker_id, &message)
                    .await
                    .map_err(|source| ReleaseError::MarkFailed { id, source })?;
                "failed"
            }
            Err(RunHandlerError::Handler(e)) => {
                let message = error_chain(&e);
                warn!(record_id = id, kind = R::KIND, duration_ms, error = %message, "Record errored");
                self.store
                    .mark_errored(id, &self.worker_id, &message)
                    .await
                    .map_err(|source| ReleaseError::MarkErrored { id, source })?;
                "errored"
            }
            Err(e @ RunHandlerError::Panic(_)) => {
                let message = e.to_string();
                error!(record_id = id, kind = R::KIND, duration_ms, error = %message, "Handler panicked");
                self.store
                    .mark_errored(id, &self.worker_id, &message)
                    .await
                    .map_err(|source| ReleaseError::MarkErrored { id, source })?;
                "panicked"
            }
            Err(e) => {
                let reason = cancel_reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| e.to_string());
                warn!(record_id = id, kind = R::KIND, duration_ms, %reason, "Record execution cancelled, leaving lease to the store");
                "cancelled"
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.observe(outcome, duration.as_secs_f64());
        }

        Ok(())
    }
}

/// Renders an error and its sources as `outer: inner: root`.
pub(crate) fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}
