//! Prometheus metrics of the worker engine and the upload handler.
//!
//! Metrics are plain structs registered into a caller-provided [`Registry`]
//! so that several workers can live in one process under different names.

use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};

/// Metrics recorded by the worker engine for every handled record.
#[derive(Clone)]
pub struct WorkerMetrics {
    /// Handled records, labeled by outcome.
    pub handled_total: CounterVec,
    /// Handler duration in seconds, labeled by outcome.
    pub handle_duration: HistogramVec,
    /// Records currently held by the worker.
    pub running: Gauge,
}

impl WorkerMetrics {
    /// Creates the engine metrics and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` when a metric with the same name is
    /// already registered.
    pub fn register(registry: &Registry, worker_name: &str) -> Result<Self, prometheus::Error> {
        let handled_total = CounterVec::new(
            Opts::new(
                "codeintel_worker_handled_total",
                "Total number of records handled",
            )
            .const_label("worker", worker_name),
            &["outcome"],
        )?;

        let handle_duration = HistogramVec::new(
            HistogramOpts::new(
                "codeintel_worker_handle_duration_seconds",
                "Handler duration in seconds",
            )
            .const_label("worker", worker_name)
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
            &["outcome"],
        )?;

        let running = Gauge::with_opts(
            Opts::new(
                "codeintel_worker_running",
                "Number of records currently being handled",
            )
            .const_label("worker", worker_name),
        )?;

        registry.register(Box::new(handled_total.clone()))?;
        registry.register(Box::new(handle_duration.clone()))?;
        registry.register(Box::new(running.clone()))?;

        Ok(WorkerMetrics {
            handled_total,
            handle_duration,
            running,
        })
    }

    pub(crate) fn observe(&self, outcome: &str, seconds: f64) {
        self.handled_total.with_label_values(&[outcome]).inc();
        self.handle_duration
            .with_label_values(&[outcome])
            .observe(seconds);
    }
}

/// Metrics of the upload handler.
#[derive(Clone)]
pub struct UploadMetrics {
    /// Bytes of uploads currently admitted by the size budget.
    pub in_flight_bytes: Gauge,
}

impl UploadMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let in_flight_bytes = Gauge::new(
            "codeintel_upload_processor_upload_size",
            "The combined size of uploads being processed at this instant by this worker",
        )?;
        registry.register(Box::new(in_flight_bytes.clone()))?;
        Ok(UploadMetrics { in_flight_bytes })
    }
}
