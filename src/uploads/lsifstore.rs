use std::collections::BTreeMap;
use std::future::Future;

use sqlx::PgPool;

use crate::errors::StoreError;
use crate::sql::lsif_data::{self, MonikerTable};
use crate::store::{DbHandle, Transactional};
use crate::uploads::bundle::{DocumentData, Meta, MonikerLocations, ResultChunkData};

/// Content store of correlated upload data.
///
/// Every row is keyed by the upload id: writing the same upload twice fails
/// with a unique violation on the first write instead of duplicating data.
pub trait LsifStore: Transactional {
    fn write_meta(
        &self,
        upload_id: i64,
        meta: Meta,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn write_documents(
        &self,
        upload_id: i64,
        documents: &BTreeMap<String, DocumentData>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn write_result_chunks(
        &self,
        upload_id: i64,
        result_chunks: &BTreeMap<u32, ResultChunkData>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn write_definitions(
        &self,
        upload_id: i64,
        monikers: &[MonikerLocations],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn write_references(
        &self,
        upload_id: i64,
        monikers: &[MonikerLocations],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn write_implementations(
        &self,
        upload_id: i64,
        monikers: &[MonikerLocations],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// [`LsifStore`] over the codeintel database.
#[derive(Clone)]
pub struct PgLsifStore {
    db: DbHandle,
}

impl PgLsifStore {
    pub fn new(pool: PgPool) -> Self {
        PgLsifStore {
            db: DbHandle::new(pool),
        }
    }
}

impl Transactional for PgLsifStore {
    async fn transact(&self) -> Result<Self, StoreError> {
        Ok(PgLsifStore {
            db: self.db.transact().await?,
        })
    }

    async fn done<T, E>(&self, result: Result<T, E>) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
    {
        self.db.done(result).await
    }
}

impl LsifStore for PgLsifStore {
    async fn write_meta(&self, upload_id: i64, meta: Meta) -> Result<(), StoreError> {
        lsif_data::write_meta(&self.db, upload_id, meta).await
    }

    async fn write_documents(
        &self,
        upload_id: i64,
        documents: &BTreeMap<String, DocumentData>,
    ) -> Result<(), StoreError> {
        lsif_data::write_documents(&self.db, upload_id, documents).await
    }

    async fn write_result_chunks(
        &self,
        upload_id: i64,
        result_chunks: &BTreeMap<u32, ResultChunkData>,
    ) -> Result<(), StoreError> {
        lsif_data::write_result_chunks(&self.db, upload_id, result_chunks).await
    }

    async fn write_definitions(
        &self,
        upload_id: i64,
        monikers: &[MonikerLocations],
    ) -> Result<(), StoreError> {
        lsif_data::write_moniker_locations(&self.db, upload_id, MonikerTable::Definitions, monikers)
            .await
    }

    async fn write_references(
        &self,
        upload_id: i64,
        monikers: &[MonikerLocations],
    ) -> Result<(), StoreError> {
        lsif_data::write_moniker_locations(&self.db, upload_id, MonikerTable::References, monikers)
            .await
    }

    async fn write_implementations(
        &self,
        upload_id: i64,
        monikers: &[MonikerLocations],
    ) -> Result<(), StoreError> {
        lsif_data::write_moniker_locations(
            &self.db,
            upload_id,
            MonikerTable::Implementations,
            monikers,
        )
        .await
    }
}
