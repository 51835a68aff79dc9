use std::marker::PhantomData;
use std::time::Duration;

use codeintel_worker_record::Record;
use codeintel_worker_shutdown_signal::ShutdownSignal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::errors::StoreError;
use crate::store::{QueueStore, ResetStalledResult};

#[derive(Debug, Clone)]
pub struct ResetterOptions {
    name: String,
    interval: Duration,
    stalled_after: Duration,
}

impl Default for ResetterOptions {
    fn default() -> Self {
        ResetterOptions {
            name: String::from("codeintel_resetter"),
            interval: Duration::from_secs(30),
            stalled_after: Duration::from_secs(5),
        }
    }
}

impl ResetterOptions {
    pub fn name(mut self, value: &str) -> Self {
        self.name = value.into();
        self
    }

    /// How often stale leases are looked for.
    pub fn interval(mut self, value: Duration) -> Self {
        self.interval = value;
        self
    }

    /// Age of the last heartbeat past which a lease is considered stale.
    pub fn stalled_after(mut self, value: Duration) -> Self {
        self.stalled_after = value;
        self
    }
}

/// Periodically returns records with stale leases to the queue.
///
/// This is what eventually recovers records whose worker crashed, lost its
/// lease, or abandoned an execution after its maximum runtime.
pub struct Resetter<R, S> {
    store: S,
    options: ResetterOptions,
    _record: PhantomData<fn() -> R>,
}

impl<R, S> Resetter<R, S>
where
    R: Record,
    S: QueueStore<R>,
{
    pub fn new(store: S, options: ResetterOptions) -> Self {
        Resetter {
            store,
            options,
            _record: PhantomData,
        }
    }

    /// Runs one reclamation pass.
    pub async fn reset_once(&self) -> Result<ResetStalledResult, StoreError> {
        let result = self.store.reset_stalled(self.options.stalled_after).await?;

        for id in &result.reset {
            warn!(record_id = id, kind = R::KIND, resetter = %self.options.name, "Reset stalled record");
        }
        for id in &result.failed {
            warn!(record_id = id, kind = R::KIND, resetter = %self.options.name, "Failed stalled record after too many resets");
        }

        Ok(result)
    }

    /// Runs reclamation passes until `shutdown_signal` resolves.
    pub async fn run(&self, shutdown_signal: ShutdownSignal) {
        info!(resetter = %self.options.name, interval_ms = self.options.interval.as_millis() as u64, "Resetter started");

        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_signal = shutdown_signal;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_signal => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.reset_once().await {
                error!(error = %e, resetter = %self.options.name, "Failed to reset stalled records");
            }
        }

        info!(resetter = %self.options.name, "Resetter stopped");
    }
}
