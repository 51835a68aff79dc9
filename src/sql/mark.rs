use std::time::Duration;

use indoc::indoc;
use sqlx::query_as;

use crate::errors::{StoreError, StoreResultExt};
use crate::store::DbHandle;

#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = id))]
pub async fn mark_complete(
    db: &DbHandle,
    id: i64,
    worker_hostname: &str,
) -> Result<bool, StoreError> {
    let row = db
        .fetch_optional(
            query_as::<_, (i64,)>(indoc! {r#"
                update lsif_uploads
                    set state = 'completed', finished_at = now()
                    where id = $1::bigint
                        and state = 'processing'
                        and worker_hostname = $2::text
                    returning id
            "#})
            .bind(id)
            .bind(worker_hostname),
        )
        .await
        .op("store.mark_complete")?;

    Ok(row.is_some())
}

/// Records a failed attempt. The record becomes dequeueable again after
/// `retry_after` while its failure count stays under the store's limit.
#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = id))]
pub async fn mark_errored(
    db: &DbHandle,
    id: i64,
    worker_hostname: &str,
    failure_message: &str,
    retry_after: Duration,
) -> Result<bool, StoreError> {
    let row = db
        .fetch_optional(
            query_as::<_, (i64,)>(indoc! {r#"
                update lsif_uploads
                    set state = 'errored',
                        finished_at = now(),
                        failure_message = $3::text,
                        num_failures = num_failures + 1,
                        process_after = now() + ($4::float8 * interval '1 second')
                    where id = $1::bigint
                        and state = 'processing'
                        and worker_hostname = $2::text
                    returning id
            "#})
            .bind(id)
            .bind(worker_hostname)
            .bind(failure_message)
            .bind(retry_after.as_secs_f64()),
        )
        .await
        .op("store.mark_errored")?;

    Ok(row.is_some())
}

#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = id))]
pub async fn mark_failed(
    db: &DbHandle,
    id: i64,
    worker_hostname: &str,
    failure_message: &str,
) -> Result<bool, StoreError> {
    let row = db
        .fetch_optional(
            query_as::<_, (i64,)>(indoc! {r#"
                update lsif_uploads
                    set state = 'failed',
                        finished_at = now(),
                        failure_message = $3::text,
                        num_failures = num_failures + 1
                    where id = $1::bigint
                        and state = 'processing'
                        and worker_hostname = $2::text
                    returning id
            "#})
            .bind(id)
            .bind(worker_hostname)
            .bind(failure_message),
        )
        .await
        .op("store.mark_failed")?;

    Ok(row.is_some())
}
