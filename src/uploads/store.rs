use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::errors::StoreError;
use crate::sql::uploads;
use crate::store::{DbHandle, Transactional};
use crate::uploads::bundle::{Package, PackageReference};

/// Relational metadata about uploads kept in the frontend database.
pub trait UploadsStore: Transactional {
    fn update_committed_at(
        &self,
        repository_id: i32,
        commit: &str,
        committed_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Marks the completed uploads sharing `(repository_id, commit, root,
    /// indexer)` for deletion and returns how many there were.
    fn delete_overlapping_dumps(
        &self,
        repository_id: i32,
        commit: &str,
        root: &str,
        indexer: &str,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn update_packages(
        &self,
        upload_id: i64,
        packages: &[Package],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_package_references(
        &self,
        upload_id: i64,
        references: &[PackageReference],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert_dependency_syncing_job(
        &self,
        upload_id: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    fn set_repository_as_dirty(
        &self,
        repository_id: i32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// [`UploadsStore`] over the frontend database.
#[derive(Clone)]
pub struct PgUploadsStore {
    db: DbHandle,
}

impl PgUploadsStore {
    pub fn new(pool: PgPool) -> Self {
        PgUploadsStore {
            db: DbHandle::new(pool),
        }
    }
}

impl Transactional for PgUploadsStore {
    async fn transact(&self) -> Result<Self, StoreError> {
        Ok(PgUploadsStore {
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

impl UploadsStore for PgUploadsStore {
    async fn update_committed_at(
        &self,
        repository_id: i32,
        commit: &str,
        committed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        uploads::update_committed_at(&self.db, repository_id, commit, committed_at).await
    }

    async fn delete_overlapping_dumps(
        &self,
        repository_id: i32,
        commit: &str,
        root: &str,
        indexer: &str,
    ) -> Result<u64, StoreError> {
        uploads::delete_overlapping_dumps(&self.db, repository_id, commit, root, indexer).await
    }

    async fn update_packages(&self, upload_id: i64, packages: &[Package]) -> Result<(), StoreError> {
        uploads::update_packages(&self.db, upload_id, packages).await
    }

    async fn update_package_references(
        &self,
        upload_id: i64,
        references: &[PackageReference],
    ) -> Result<(), StoreError> {
        uploads::update_package_references(&self.db, upload_id, references).await
    }

    async fn insert_dependency_syncing_job(&self, upload_id: i64) -> Result<i64, StoreError> {
        uploads::insert_dependency_syncing_job(&self.db, upload_id).await
    }

    async fn set_repository_as_dirty(&self, repository_id: i32) -> Result<(), StoreError> {
        uploads::set_repository_as_dirty(&self.db, repository_id).await
    }
}
