use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use codeintel_worker_record::Record;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handler::{HandleOutcome, Handler};
use crate::result::{HandleResult, RunHandlerError};

/// Runs `handler` against `record` on its own task.
///
/// The task is aborted as soon as `cancel` fires or `maximum_runtime`
/// elapses. The hooks are not invoked here; the worker wraps this call.
pub async fn run_handler<R, H>(
    handler: Arc<H>,
    record: R,
    cancel: CancellationToken,
    maximum_runtime: Option<Duration>,
) -> HandleResult<HandleOutcome, H::Error>
where
    R: Record,
    H: Handler<R>,
{
    let start = Instant::now();
    let record_id = record.id();

    let task = tokio::spawn(async move { handler.handle(record).await });
    let abort_handle = task.abort_handle();

    let deadline = async {
        match maximum_runtime {
            Some(max) => tokio::time::sleep(max).await,
            None => std::future::pending::<()>().await,
        }
    };

    let result = tokio::select! {
        res = task => match res {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(RunHandlerError::Handler(e)),
            Err(e) if e.is_panic() => Err(RunHandlerError::Panic(panic_message(e.into_panic()))),
            Err(_) => Err(RunHandlerError::Cancelled),
        },
        _ = cancel.cancelled() => {
            abort_handle.abort();
            debug!(record_id, kind = R::KIND, "Handler aborted by cancellation");
            Err(RunHandlerError::Cancelled)
        }
        _ = deadline => {
            abort_handle.abort();
            let max = maximum_runtime.unwrap_or_default();
            debug!(record_id, kind = R::KIND, max_runtime_ms = max.as_millis() as u64, "Handler aborted after maximum runtime");
            Err(RunHandlerError::TimedOut(max))
        }
    };

    HandleResult {
        duration: start.elapsed(),
        result,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
