use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::query::{Query, QueryAs};
use sqlx::{query, FromRow, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::{StoreError, StoreResultExt};

static SAVEPOINT_ID: AtomicU64 = AtomicU64::new(0);

type SharedTransaction = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

#[derive(Clone)]
enum Inner {
    Pool(PgPool),
    Transaction {
        tx: SharedTransaction,
        savepoint: Option<String>,
    },
}

/// Database handle shared by the Postgres-backed stores.
///
/// A handle either talks to the pool directly or is bound to an open
/// transaction. Calling [`DbHandle::transact`] on a handle that is already in
/// a transaction opens a savepoint, so stores compose: an operation that
/// transacts internally can be called from inside a caller's transaction.
#[derive(Clone)]
pub struct DbHandle {
    inner: Inner,
}

fn finished() -> sqlx::Error {
    sqlx::Error::Protocol("transaction already finished".into())
}

impl DbHandle {
    pub fn new(pool: PgPool) -> Self {
        DbHandle {
            inner: Inner::Pool(pool),
        }
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self.inner, Inner::Transaction { .. })
    }

    /// Opens a transaction, or a savepoint when already inside one.
    pub async fn transact(&self) -> Result<DbHandle, StoreError> {
        match &self.inner {
            Inner::Pool(pool) => {
                let tx = pool.begin().await.op("db.begin")?;
                Ok(DbHandle {
                    inner: Inner::Transaction {
                        tx: Arc::new(Mutex::new(Some(tx))),
                        savepoint: None,
                    },
                })
            }
            Inner::Transaction { tx, .. } => {
                let name = format!("sp_{}", SAVEPOINT_ID.fetch_add(1, Ordering::Relaxed));
                self.execute(query(&format!("savepoint {name}")))
                    .await
                    .op("db.savepoint")?;
                Ok(DbHandle {
                    inner: Inner::Transaction {
                        tx: tx.clone(),
                        savepoint: Some(name),
                    },
                })
            }
        }
    }

    /// Commits when `result` is Ok and rolls back otherwise.
    ///
    /// A failed commit replaces the Ok value with the commit error. A failed
    /// rollback is logged and the original error is returned unchanged. On a
    /// handle that is not in a transaction this is the identity.
    pub async fn done<T, E>(&self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let Inner::Transaction { tx, savepoint } = &self.inner else {
            return result;
        };

        match (result.is_ok(), savepoint) {
            (true, Some(name)) => {
                self.execute(query(&format!("release savepoint {name}")))
                    .await
                    .op("db.release_savepoint")?;
            }
            (false, Some(name)) => {
                if let Err(e) = self
                    .execute(query(&format!("rollback to savepoint {name}")))
                    .await
                {
                    warn!(error = %e, savepoint = %name, "Failed to roll back savepoint");
                }
            }
            (true, None) => {
                if let Some(tx) = tx.lock().await.take() {
                    tx.commit().await.op("db.commit")?;
                }
            }
            (false, None) => {
                if let Some(tx) = tx.lock().await.take() {
                    if let Err(e) = tx.rollback().await {
                        warn!(error = %e, "Failed to roll back transaction");
                    }
                }
            }
        }

        result
    }

    pub async fn execute<'q>(
        &self,
        q: Query<'q, Postgres, PgArguments>,
    ) -> Result<PgQueryResult, sqlx::Error> {
        match &self.inner {
            Inner::Pool(pool) => q.execute(pool).await,
            Inner::Transaction { tx, .. } => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                q.execute(tx.as_mut()).await
            }
        }
    }

    pub async fn fetch_optional<'q, T>(
        &self,
        q: QueryAs<'q, Postgres, T, PgArguments>,
    ) -> Result<Option<T>, sqlx::Error>
    where
        T: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        match &self.inner {
            Inner::Pool(pool) => q.fetch_optional(pool).await,
            Inner::Transaction { tx, .. } => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                q.fetch_optional(tx.as_mut()).await
            }
        }
    }

    pub async fn fetch_one<'q, T>(
        &self,
        q: QueryAs<'q, Postgres, T, PgArguments>,
    ) -> Result<T, sqlx::Error>
    where
        T: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        self.fetch_optional(q)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn fetch_all<'q, T>(
        &self,
        q: QueryAs<'q, Postgres, T, PgArguments>,
    ) -> Result<Vec<T>, sqlx::Error>
    where
        T: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        match &self.inner {
            Inner::Pool(pool) => q.fetch_all(pool).await,
            Inner::Transaction { tx, .. } => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(finished)?;
                q.fetch_all(tx.as_mut()).await
            }
        }
    }
}
