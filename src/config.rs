//! Deserialisable settings of an upload worker process.
//!
//! Durations are given in milliseconds so the struct can be read from the
//! same JSON documents as the rest of the site configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::budget::UploadBudget;
use crate::builder::WorkerOptions;
use crate::metrics::{UploadMetrics, WorkerMetrics};
use crate::resetter::ResetterOptions;
use crate::store::PgQueueStoreOptions;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadWorkerConfig {
    pub name: String,
    /// Zero means one slot per logical CPU
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Zero disables the limit
    pub maximum_runtime_per_job_ms: u64,
    /// Zero falls back to the worker default of one
    pub max_missed_heartbeats: u32,
    pub drain_timeout_ms: u64,
    /// Combined gzipped size of the uploads processed at once; zero or
    /// negative disables the budget
    pub maximum_upload_bytes: i64,
    pub max_num_failures: i32,
    pub max_num_resets: i32,
    pub retry_after_ms: u64,
    pub resetter_interval_ms: u64,
    pub stalled_after_ms: u64,
    pub listen_os_shutdown_signals: bool,
}

impl Default for UploadWorkerConfig {
    fn default() -> Self {
        UploadWorkerConfig {
            name: String::from("codeintel_upload_worker"),
            concurrency: 0,
            poll_interval_ms: 1_000,
            heartbeat_interval_ms: 1_000,
            maximum_runtime_per_job_ms: 0,
            max_missed_heartbeats: 1,
            drain_timeout_ms: 5_000,
            maximum_upload_bytes: 0,
            max_num_failures: 1,
            max_num_resets: 3,
            retry_after_ms: 60_000,
            resetter_interval_ms: 30_000,
            stalled_after_ms: 5_000,
            listen_os_shutdown_signals: true,
        }
    }
}

impl UploadWorkerConfig {
    pub fn worker_options(&self) -> WorkerOptions {
        let mut options = WorkerOptions::default()
            .name(&self.name)
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .heartbeat_interval(Duration::from_millis(self.heartbeat_interval_ms))
            .drain_timeout(Duration::from_millis(self.drain_timeout_ms))
            .listen_os_shutdown_signals(self.listen_os_shutdown_signals);

        if self.concurrency > 0 {
            options = options.concurrency(self.concurrency);
        }
        if self.max_missed_heartbeats > 0 {
            options = options.max_missed_heartbeats(self.max_missed_heartbeats);
        }
        if self.maximum_runtime_per_job_ms > 0 {
            options = options
                .maximum_runtime_per_job(Duration::from_millis(self.maximum_runtime_per_job_ms));
        }
        options
    }

    /// Worker options reporting into `metrics`.
    pub fn worker_options_with_metrics(&self, metrics: WorkerMetrics) -> WorkerOptions {
        self.worker_options().metrics(metrics)
    }

    pub fn queue_options(&self) -> PgQueueStoreOptions {
        PgQueueStoreOptions::default()
            .max_num_failures(self.max_num_failures)
            .max_num_resets(self.max_num_resets)
            .retry_after(Duration::from_millis(self.retry_after_ms))
    }

    pub fn resetter_options(&self) -> ResetterOptions {
        ResetterOptions::default()
            .name(&format!("{}_resetter", self.name))
            .interval(Duration::from_millis(self.resetter_interval_ms))
            .stalled_after(Duration::from_millis(self.stalled_after_ms))
    }

    pub fn budget(&self, metrics: Option<&UploadMetrics>) -> UploadBudget {
        let budget = UploadBudget::new(self.maximum_upload_bytes);
        match metrics {
            Some(metrics) => budget.with_gauge(metrics.in_flight_bytes.clone()),
            None => budget,
        }
    }
}
