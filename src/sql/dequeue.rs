use indoc::formatdoc;
use sqlx::query_as;

use crate::errors::{StoreError, StoreResultExt};
use crate::store::{DbHandle, UploadCondition};
use codeintel_worker_record::Upload;

/// Renders the extra dequeue predicates, numbering placeholders from `first_param`.
pub(crate) fn condition_clauses(
    conditions: &[UploadCondition],
    first_param: usize,
) -> (String, Vec<i64>) {
    let mut clauses = String::new();
    let mut binds = Vec::with_capacity(conditions.len());

    for (i, condition) in conditions.iter().enumerate() {
        let param = first_param + i;
        match condition {
            UploadCondition::MaxUploadSize(max) => {
                clauses.push_str(&format!(
                    " and (upload_size is null or upload_size <= ${param}::bigint)"
                ));
                binds.push(*max);
            }
        }
    }

    (clauses, binds)
}

#[tracing::instrument(skip_all, err, fields(db.system="postgresql", worker_hostname = %worker_hostname))]
pub async fn dequeue_upload(
    db: &DbHandle,
    worker_hostname: &str,
    max_num_failures: i32,
    conditions: &[UploadCondition],
) -> Result<Option<Upload>, StoreError> {
    let (extra, binds) = condition_clauses(conditions, 3);

    let sql = formatdoc!(
        r#"
            with candidate as (
                select id from lsif_uploads
                where (state = 'queued' or (state = 'errored' and num_failures < $2::int))
                    and (process_after is null or process_after <= now())
                    {extra}
                order by coalesce(process_after, uploaded_at), id
                limit 1
                for update skip locked
            )
            update lsif_uploads as u
                set state = 'processing',
                    started_at = now(),
                    finished_at = null,
                    worker_hostname = $1::text,
                    last_heartbeat_at = now(),
                    cancel = false
                from candidate
                where u.id = candidate.id
                returning u.*
        "#
    );

    let mut q = query_as::<_, Upload>(&sql)
        .bind(worker_hostname)
        .bind(max_num_failures);
    for bind in binds {
        q = q.bind(bind);
    }

    db.fetch_optional(q).await.op("store.dequeue")
}

#[tracing::instrument(skip_all, err, fields(db.system="postgresql"))]
pub async fn queued_count(db: &DbHandle) -> Result<i64, StoreError> {
    let (count,) = db
        .fetch_one(query_as::<_, (i64,)>(
            "select count(*) from lsif_uploads where state = 'queued'",
        ))
        .await
        .op("store.queued_count")?;
    Ok(count)
}
