use indoc::indoc;
use sqlx::query_as;

use crate::errors::{StoreError, StoreResultExt};
use crate::store::{DbHandle, HeartbeatResult};

/// Refreshes the lease of every id still owned by `worker_hostname`.
#[tracing::instrument(skip_all, err, fields(db.system="postgresql", count = ids.len()))]
pub async fn heartbeat_uploads(
    db: &DbHandle,
    worker_hostname: &str,
    ids: &[i64],
) -> Result<HeartbeatResult, StoreError> {
    let rows = db
        .fetch_all(
            query_as::<_, (i64, bool)>(indoc! {r#"
                update lsif_uploads
                    set last_heartbeat_at = now()
                    where id = any($1::bigint[])
                        and state = 'processing'
                        and worker_hostname = $2::text
                    returning id, cancel
            "#})
            .bind(ids)
            .bind(worker_hostname),
        )
        .await
        .op("store.heartbeat")?;

    let mut result = HeartbeatResult::default();
    for (id, cancel) in rows {
        result.known.push(id);
        if cancel {
            result.cancel.push(id);
        }
    }
    Ok(result)
}
