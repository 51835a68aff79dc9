use thiserror::Error;
use tokio::task::JoinError;

use crate::errors::StoreError;
use crate::uploads::collaborators::BoxError;

/// Failure to turn the raw bytes of an upload into bundle data.
///
/// All variants describe malformed input except `Io`, which may also come
/// from the blob stream being interrupted.
#[derive(Error, Debug)]
pub enum CorrelateError {
    #[error("reading index: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("element {id}: {message}")]
    Malformed { id: String, message: String },

    #[error("index has no metadata")]
    MissingMetadata,

    #[error("decoding {what}: {source}")]
    Protobuf {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("invalid symbol {symbol:?}: {reason}")]
    InvalidSymbol { symbol: String, reason: &'static str },
}

impl CorrelateError {
    pub(crate) fn malformed(id: impl Into<String>, message: impl Into<String>) -> Self {
        CorrelateError::Malformed {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by the upload handler.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("repos.get: {0}")]
    RepositoryLookup(#[source] BoxError),

    #[error("repos.resolve_rev: {0}")]
    ResolveRevision(#[source] BoxError),

    #[error("gitserver.{op}: {source}")]
    Gitserver {
        op: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("blobstore.{op}: {source}")]
    BlobStore {
        op: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),

    #[error("conversion.correlate: {0}")]
    Correlate(#[from] CorrelateError),

    #[error("commit does not exist")]
    CommitDoesNotExist,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("correlation task: {0}")]
    Task(#[from] JoinError),
}

impl UploadError {
    /// Whether the upload itself is at fault, so retrying cannot succeed.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            UploadError::UnsupportedContentType(_)
                | UploadError::Correlate(
                    CorrelateError::Json { .. }
                        | CorrelateError::Malformed { .. }
                        | CorrelateError::MissingMetadata
                        | CorrelateError::Protobuf { .. }
                        | CorrelateError::InvalidSymbol { .. }
                )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_operation_names() {
        let err = UploadError::Gitserver {
            op: "commit_date",
            source: "connection reset".into(),
        };
        assert_eq!(err.to_string(), "gitserver.commit_date: connection reset");

        let err = UploadError::Store(StoreError::backend("store.update_packages", "boom"));
        assert_eq!(err.to_string(), "store.update_packages: boom");
    }

    #[test]
    fn test_malformed_input_classification() {
        assert!(UploadError::UnsupportedContentType("text/plain".into()).is_malformed_input());
        assert!(UploadError::Correlate(CorrelateError::MissingMetadata).is_malformed_input());
        assert!(!UploadError::CommitDoesNotExist.is_malformed_input());
        assert!(!UploadError::Correlate(CorrelateError::Io(std::io::Error::other("reset")))
            .is_malformed_input());
    }
}
