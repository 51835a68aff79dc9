use std::time::Duration;

use codeintel_worker_shutdown_signal::ShutdownSignal;
use futures::{stream, Stream};
use tokio::time::{Interval, MissedTickBehavior};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamSource {
    Polling,
    RunOnce,
}

struct PollSignalStreamData {
    interval: Interval,
    shutdown_signal: ShutdownSignal,
    concurrency: usize,
    remaining_yields: usize,
}

/// Returns a stream that yields `concurrency` times on every tick of
/// `poll_interval`, one item per slot that may try to dequeue.
///
/// The stream ends when `shutdown_signal` resolves. Items are only pulled
/// while a slot is free, so a busy worker does not accumulate ticks.
pub fn job_signal_stream(
    poll_interval: Duration,
    shutdown_signal: ShutdownSignal,
    concurrency: usize,
) -> impl Stream<Item = StreamSource> {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let data = PollSignalStreamData {
        interval,
        shutdown_signal,
        concurrency,
        remaining_yields: 0,
    };

    stream::unfold(data, |mut f| async {
        if f.remaining_yields > 0 {
            f.remaining_yields -= 1;
            return Some((StreamSource::Polling, f));
        }

        tokio::select! {
            biased;
            _ = &mut f.shutdown_signal => None,
            _ = f.interval.tick() => {
                f.remaining_yields = f.concurrency.saturating_sub(1);
                Some((StreamSource::Polling, f))
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeintel_worker_shutdown_signal::shutdown_signal;
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_yields_concurrency_times_per_tick() {
        let trigger = CancellationToken::new();
        let signal = shutdown_signal(trigger.clone(), false);
        let stream = job_signal_stream(Duration::from_secs(1), signal, 3);
        futures::pin_mut!(stream);

        for _ in 0..6 {
            assert_eq!(stream.next().await, Some(StreamSource::Polling));
        }

        trigger.cancel();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ends_when_shutdown_resolves_between_ticks() {
        let trigger = CancellationToken::new();
        let signal = shutdown_signal(trigger.clone(), false);
        let stream = job_signal_stream(Duration::from_secs(3600), signal, 1);
        futures::pin_mut!(stream);

        // First tick fires immediately.
        assert_eq!(stream.next().await, Some(StreamSource::Polling));

        let canceller = trigger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });
        assert_eq!(stream.next().await, None);
    }
}
