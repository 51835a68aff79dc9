use thiserror::Error;

const UNIQUE_VIOLATION: &str = "23505";

/// Errors returned by the persistent stores.
///
/// Every variant carries the name of the store operation that failed so that
/// log lines read like `store.update_packages: ...`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An error occurred while executing an SQL query
    #[error("{op}: {source}")]
    Sql {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A write collided with an existing row on a unique constraint
    #[error("{op}: unique constraint violation ({constraint})")]
    UniqueViolation { op: &'static str, constraint: String },

    /// An error occurred while serializing a payload column
    #[error("{op}: {source}")]
    Serialize {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Failure reported by a non-SQL backend
    #[error("{op}: {message}")]
    Backend { op: &'static str, message: String },
}

impl StoreError {
    /// Wraps an sqlx error, promoting unique violations to their own variant.
    pub fn sql(op: &'static str, source: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &source {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return StoreError::UniqueViolation {
                    op,
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                };
            }
        }
        StoreError::Sql { op, source }
    }

    pub fn backend(op: &'static str, message: impl Into<String>) -> Self {
        StoreError::Backend {
            op,
            message: message.into(),
        }
    }

    /// Name of the store operation that produced this error.
    pub fn op(&self) -> &'static str {
        match self {
            StoreError::Sql { op, .. }
            | StoreError::UniqueViolation { op, .. }
            | StoreError::Serialize { op, .. }
            | StoreError::Backend { op, .. } => op,
        }
    }

    pub fn is_unique_constraint_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

/// Attaches the operation name to a raw driver error.
pub(crate) trait StoreResultExt<T> {
    fn op(self, op: &'static str) -> core::result::Result<T, StoreError>;
}

impl<T> StoreResultExt<T> for core::result::Result<T, sqlx::Error> {
    fn op(self, op: &'static str) -> core::result::Result<T, StoreError> {
        self.map_err(|e| StoreError::sql(op, e))
    }
}

impl<T> StoreResultExt<T> for core::result::Result<T, serde_json::Error> {
    fn op(self, op: &'static str) -> core::result::Result<T, StoreError> {
        self.map_err(|source| StoreError::Serialize { op, source })
    }
}

/// A Result type alias for StoreError.
pub type Result<T> = core::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_is_detected() {
        let err = StoreError::UniqueViolation {
            op: "lsifstore.write_meta",
            constraint: "lsif_data_metadata_pkey".into(),
        };
        assert!(err.is_unique_constraint_violation());
        assert_eq!(err.op(), "lsifstore.write_meta");
        assert_eq!(
            err.to_string(),
            "lsifstore.write_meta: unique constraint violation (lsif_data_metadata_pkey)"
        );

        let err = StoreError::sql("store.dequeue", sqlx::Error::RowNotFound);
        assert!(!err.is_unique_constraint_violation());
        assert!(err.to_string().starts_with("store.dequeue: "));
    }

    #[test]
    fn test_op_names_driver_errors() {
        let sql: core::result::Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let err = sql.op("store.heartbeat").unwrap_err();
        assert!(matches!(err, StoreError::Sql { op: "store.heartbeat", .. }));

        let json = serde_json::from_str::<u32>("nope").op("lsifstore.write_documents");
        let err = json.unwrap_err();
        assert!(matches!(err, StoreError::Serialize { .. }));
        assert_eq!(err.op(), "lsifstore.write_documents");

        let ok: Result<u32> = Ok::<_, sqlx::Error>(7).op("store.queued_count");
        assert_eq!(ok.unwrap(), 7);
    }
}
