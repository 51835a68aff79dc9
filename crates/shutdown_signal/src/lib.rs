use std::pin::Pin;

use cfg_if::cfg_if;
use futures::{future::Shared, FutureExt};
use std::future::Future;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn os_shutdown_signal() {
            let mut ctrl_c = ctrl_c().expect("Failed to attach Ctrl_C shutdown signal (windows)");
            let mut ctrl_close = ctrl_close().expect("Failed to attach Ctrl_close shutdown signal (windows)");
            let mut ctrl_shutdown = ctrl_shutdown().expect("Failed to attach Ctrl_shutdown shutdown signal (windows)");
            select! {
                _ = ctrl_c.recv() => (),
                _ = ctrl_close.recv() => (),
                _ = ctrl_shutdown.recv() => (),
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn unix_shutdown_signal(signal_kind: SignalKind) {
            let mut signal = signal(signal_kind).expect("Failed to listen to unix shutdown signal");
            signal.recv().await;
        }

        async fn os_shutdown_signal() {
            select! {
                _ = unix_shutdown_signal(SignalKind::interrupt()) => (),
                _ = unix_shutdown_signal(SignalKind::terminate()) => (),
                _ = unix_shutdown_signal(SignalKind::hangup()) => (),
            };
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

/// A cloneable future resolving once the process should stop taking new work.
pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

/// Builds a shutdown signal that resolves when `trigger` is cancelled, or, if
/// `listen_os_signals` is set, when the process receives a termination signal.
///
/// Resolving the signal also cancels `trigger`, so components holding the
/// token instead of the future observe OS-initiated shutdowns too.
pub fn shutdown_signal(trigger: CancellationToken, listen_os_signals: bool) -> ShutdownSignal {
    async move {
        if listen_os_signals {
            select! {
                _ = os_shutdown_signal() => {
                    info!("Shutdown signal detected. Attempting graceful shutdown...");
                    trigger.cancel();
                }
                _ = trigger.cancelled() => {
                    info!("Shutdown requested. Attempting graceful shutdown...");
                }
            }
        } else {
            trigger.cancelled().await;
            info!("Shutdown requested. Attempting graceful shutdown...");
        }
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_resolves_on_programmatic_trigger() {
        let trigger = CancellationToken::new();
        let signal = shutdown_signal(trigger.clone(), false);

        let waiter = tokio::spawn(signal.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        trigger.cancel();
        waiter.await.expect("waiter panicked");

        // Already-resolved shared futures resolve again immediately.
        signal.await;
    }
}
