use std::time::Duration;

use indoc::indoc;
use sqlx::query_as;

use crate::errors::{StoreError, StoreResultExt};
use crate::store::{DbHandle, ResetStalledResult};

/// Returns stale `processing` records to the queue, failing those that were
/// already reset `max_num_resets` times.
#[tracing::instrument(skip_all, err, fields(db.system="postgresql"))]
pub async fn reset_stalled_uploads(
    db: &DbHandle,
    stalled_after: Duration,
    max_num_resets: i32,
) -> Result<ResetStalledResult, StoreError> {
    let rows = db
        .fetch_all(
            query_as::<_, (i64, bool)>(indoc! {r#"
                with stalled as (
                    select id, num_resets from lsif_uploads
                    where state = 'processing'
                        and (last_heartbeat_at is null
                            or last_heartbeat_at < now() - ($1::float8 * interval '1 second'))
                    for update skip locked
                ),
                reset as (
                    update lsif_uploads as u
                        set state = 'queued',
                            num_resets = u.num_resets + 1,
                            started_at = null,
                            worker_hostname = null,
                            last_heartbeat_at = null
                        from stalled
                        where u.id = stalled.id and stalled.num_resets < $2::int
                        returning u.id
                ),
                failed as (
                    update lsif_uploads as u
                        set state = 'failed',
                            finished_at = now(),
                            failure_message = 'failed to process',
                            num_failures = u.num_failures + 1
                        from stalled
                        where u.id = stalled.id and stalled.num_resets >= $2::int
                        returning u.id
                )
                select id, true as was_reset from reset
                union all
                select id, false as was_reset from failed
            "#})
            .bind(stalled_after.as_secs_f64())
            .bind(max_num_resets),
        )
        .await
        .op("store.reset_stalled")?;

    let mut result = ResetStalledResult::default();
    for (id, was_reset) in rows {
        if was_reset {
            result.reset.push(id);
        } else {
            result.failed.push(id);
        }
    }
    Ok(result)
}
