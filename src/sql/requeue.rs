use chrono::{DateTime, Utc};
use indoc::indoc;
use sqlx::query;

use crate::errors::{StoreError, StoreResultExt};
use crate::store::DbHandle;

#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = id))]
pub async fn requeue_upload(
    db: &DbHandle,
    id: i64,
    visible_after: DateTime<Utc>,
) -> Result<(), StoreError> {
    db.execute(
        query(indoc! {r#"
            update lsif_uploads
                set state = 'queued',
                    process_after = $2::timestamptz,
                    started_at = null,
                    worker_hostname = null,
                    last_heartbeat_at = null
                where id = $1::bigint
        "#})
        .bind(id)
        .bind(visible_after),
    )
    .await
    .op("store.requeue")?;

    Ok(())
}
