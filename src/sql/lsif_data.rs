use std::collections::BTreeMap;

use indoc::indoc;
use serde_json::Value;
use sqlx::query;

use crate::errors::{StoreError, StoreResultExt};
use crate::store::DbHandle;
use crate::uploads::bundle::{DocumentData, Meta, MonikerLocations, ResultChunkData};

const WRITE_BATCH_SIZE: usize = 1000;

#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = upload_id))]
pub async fn write_meta(db: &DbHandle, upload_id: i64, meta: Meta) -> Result<(), StoreError> {
    db.execute(
        query(indoc! {r#"
            insert into lsif_data_metadata (dump_id, num_result_chunks)
                values ($1::bigint, $2::integer)
        "#})
        .bind(upload_id)
        .bind(meta.num_result_chunks as i32),
    )
    .await
    .op("lsifstore.write_meta")?;

    Ok(())
}

#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = upload_id, count = documents.len()))]
pub async fn write_documents(
    db: &DbHandle,
    upload_id: i64,
    documents: &BTreeMap<String, DocumentData>,
) -> Result<(), StoreError> {
    const OP: &str = "lsifstore.write_documents";

    let rows = documents
        .iter()
        .map(|(path, data)| Ok((path.clone(), serde_json::to_value(data).op(OP)?)))
        .collect::<Result<Vec<(String, Value)>, StoreError>>()?;

    for batch in rows.chunks(WRITE_BATCH_SIZE) {
        let (paths, data): (Vec<String>, Vec<Value>) = batch.iter().cloned().unzip();
        db.execute(
            query(indoc! {r#"
                insert into lsif_data_documents (dump_id, path, data)
                    select $1::bigint, path, data
                    from unnest($2::text[], $3::jsonb[]) as t(path, data)
            "#})
            .bind(upload_id)
            .bind(paths)
            .bind(data),
        )
        .await
        .op(OP)?;
    }

    Ok(())
}

#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = upload_id, count = chunks.len()))]
pub async fn write_result_chunks(
    db: &DbHandle,
    upload_id: i64,
    chunks: &BTreeMap<u32, ResultChunkData>,
) -> Result<(), StoreError> {
    const OP: &str = "lsifstore.write_result_chunks";

    let rows = chunks
        .iter()
        .map(|(idx, data)| Ok((*idx as i32, serde_json::to_value(data).op(OP)?)))
        .collect::<Result<Vec<(i32, Value)>, StoreError>>()?;

    for batch in rows.chunks(WRITE_BATCH_SIZE) {
        let (indexes, data): (Vec<i32>, Vec<Value>) = batch.iter().cloned().unzip();
        db.execute(
            query(indoc! {r#"
                insert into lsif_data_result_chunks (dump_id, idx, data)
                    select $1::bigint, idx, data
                    from unnest($2::integer[], $3::jsonb[]) as t(idx, data)
            "#})
            .bind(upload_id)
            .bind(indexes)
            .bind(data),
        )
        .await
        .op(OP)?;
    }

    Ok(())
}

/// Table receiving moniker locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonikerTable {
    Definitions,
    References,
    Implementations,
}

impl MonikerTable {
    fn insert_sql(self) -> &'static str {
        match self {
            MonikerTable::Definitions => indoc! {r#"
                insert into lsif_data_definitions (dump_id, scheme, identifier, data)
                    select $1::bigint, scheme, identifier, data
                    from unnest($2::text[], $3::text[], $4::jsonb[]) as t(scheme, identifier, data)
            "#},
            MonikerTable::References => indoc! {r#"
                insert into lsif_data_references (dump_id, scheme, identifier, data)
                    select $1::bigint, scheme, identifier, data
                    from unnest($2::text[], $3::text[], $4::jsonb[]) as t(scheme, identifier, data)
            "#},
            MonikerTable::Implementations => indoc! {r#"
                insert into lsif_data_implementations (dump_id, scheme, identifier, data)
                    select $1::bigint, scheme, identifier, data
                    from unnest($2::text[], $3::text[], $4::jsonb[]) as t(scheme, identifier, data)
            "#},
        }
    }

    fn op(self) -> &'static str {
        match self {
            MonikerTable::Definitions => "lsifstore.write_definitions",
            MonikerTable::References => "lsifstore.write_references",
            MonikerTable::Implementations => "lsifstore.write_implementations",
        }
    }
}

#[tracing::instrument(skip_all, err, fields(db.system="postgresql", upload_id = upload_id, table = ?table, count = monikers.len()))]
pub async fn write_moniker_locations(
    db: &DbHandle,
    upload_id: i64,
    table: MonikerTable,
    monikers: &[MonikerLocations],
) -> Result<(), StoreError> {
    let op = table.op();

    for batch in monikers.chunks(WRITE_BATCH_SIZE) {
        let mut schemes = Vec::with_capacity(batch.len());
        let mut identifiers = Vec::with_capacity(batch.len());
        let mut data = Vec::with_capacity(batch.len());
        for moniker in batch {
            schemes.push(moniker.scheme.clone());
            identifiers.push(moniker.identifier.clone());
            data.push(serde_json::to_value(&moniker.locations).op(op)?);
        }

        db.execute(
            query(table.insert_sql())
                .bind(upload_id)
                .bind(schemes)
                .bind(identifiers)
                .bind(data),
        )
        .await
        .op(op)?;
    }

    Ok(())
}
