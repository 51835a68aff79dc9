use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use codeintel_worker_handler::CancelReason;
use codeintel_worker_record::Record;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::store::{HeartbeatResult, QueueStore};

struct RunningJob {
    token: CancellationToken,
    missed_heartbeats: u32,
    cancel_reason: Option<CancelReason>,
}

impl RunningJob {
    fn cancel(&mut self, reason: CancelReason) -> bool {
        if self.cancel_reason.is_some() {
            return false;
        }
        self.cancel_reason = Some(reason);
        self.token.cancel();
        true
    }
}

/// Records currently leased by one worker, keyed by id.
#[derive(Clone, Default)]
pub(crate) struct RunningJobs {
    jobs: Arc<Mutex<HashMap<i64, RunningJob>>>,
}

impl RunningJobs {
    /// Tracks `id` and returns the token that cancels its execution.
    pub(crate) async fn register(&self, id: i64) -> CancellationToken {
        let token = CancellationToken::new();
        self.jobs.lock().await.insert(
            id,
            RunningJob {
                token: token.clone(),
                missed_heartbeats: 0,
                cancel_reason: None,
            },
        );
        token
    }

    /// Stops tracking `id`, returning why it was cancelled if it was.
    pub(crate) async fn remove(&self, id: i64) -> Option<CancelReason> {
        self.jobs
            .lock()
            .await
            .remove(&id)
            .and_then(|job| job.cancel_reason)
    }

    pub(crate) async fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.jobs.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub(crate) async fn cancel_all(&self, reason: CancelReason) -> Vec<i64> {
        let mut jobs = self.jobs.lock().await;
        let mut cancelled: Vec<i64> = jobs
            .iter_mut()
            .filter_map(|(id, job)| job.cancel(reason).then_some(*id))
            .collect();
        cancelled.sort_unstable();
        cancelled
    }

    /// Applies the answer to a heartbeat for `sent` and cancels the jobs the
    /// store asked to cancel or no longer knows about.
    ///
    /// A job is considered lost after `max_missed` consecutive heartbeats in
    /// which the store did not acknowledge it.
    pub(crate) async fn apply_heartbeat(
        &self,
        sent: &[i64],
        result: &HeartbeatResult,
        max_missed: u32,
    ) -> Vec<(i64, CancelReason)> {
        let known: HashSet<i64> = result.known.iter().copied().collect();
        let cancel: HashSet<i64> = result.cancel.iter().copied().collect();

        let mut jobs = self.jobs.lock().await;
        let mut cancelled = Vec::new();

        for id in sent {
            // Finished while the heartbeat was in flight.
            let Some(job) = jobs.get_mut(id) else {
                continue;
            };

            if cancel.contains(id) {
                if job.cancel(CancelReason::StoreRequested) {
                    cancelled.push((*id, CancelReason::StoreRequested));
                }
            } else if known.contains(id) {
                job.missed_heartbeats = 0;
            } else {
                job.missed_heartbeats += 1;
                if job.missed_heartbeats >= max_missed && job.cancel(CancelReason::HeartbeatLost) {
                    cancelled.push((*id, CancelReason::HeartbeatLost));
                }
            }
        }

        cancelled
    }
}

/// Periodically renews the leases of `running` until `stop` is cancelled.
pub(crate) struct Heartbeat<'a, R, S> {
    pub(crate) store: &'a S,
    pub(crate) running: &'a RunningJobs,
    pub(crate) worker_id: &'a str,
    pub(crate) interval: Duration,
    pub(crate) max_missed: u32,
    pub(crate) _record: PhantomData<fn() -> R>,
}

impl<R, S> Heartbeat<'_, R, S>
where
    R: Record,
    S: QueueStore<R>,
{
    pub(crate) async fn run(self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let ids = self.running.ids().await;
            if ids.is_empty() {
                continue;
            }

            match self.store.heartbeat(self.worker_id, &ids).await {
                Ok(result) => {
                    let cancelled = self
                        .running
                        .apply_heartbeat(&ids, &result, self.max_missed)
                        .await;
                    for (id, reason) in cancelled {
                        warn!(record_id = id, kind = R::KIND, %reason, "Cancelling record execution");
                    }
                    debug!(count = ids.len(), known = result.known.len(), "Heartbeat sent");
                }
                Err(e) => {
                    error!(error = %e, count = ids.len(), "Failed to send heartbeat");
                }
            }
        }
    }
}
