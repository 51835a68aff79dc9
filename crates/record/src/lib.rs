use std::fmt;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

/// Minimal contract every queued record must satisfy so that the worker engine
/// can lease, heartbeat and release it without knowing anything else about it.
pub trait Record: Clone + Send + Sync + 'static {
    /// Name of the kind of record, used in logs and metric labels.
    const KIND: &'static str;

    /// Unique identity of the record inside its queue.
    fn id(&self) -> i64;
}

pub const LSIF_CONTENT_TYPE: &str = "application/x-ndjson+lsif";
pub const SCIP_CONTENT_TYPE: &str = "application/x-protobuf+scip";

/// Format of an uploaded index.
///
/// Parsed infallibly from the stored MIME string: unknown values are kept so
/// that the upload handler can reject them with a meaningful message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    /// Newline-delimited JSON LSIF dump.
    Lsif,
    /// Protobuf-encoded SCIP index.
    Scip,
    Other(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Lsif => LSIF_CONTENT_TYPE,
            ContentType::Scip => SCIP_CONTENT_TYPE,
            ContentType::Other(s) => s,
        }
    }
}

impl From<String> for ContentType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | LSIF_CONTENT_TYPE => ContentType::Lsif,
            SCIP_CONTENT_TYPE => ContentType::Scip,
            _ => ContentType::Other(value),
        }
    }
}

impl From<&str> for ContentType {
    fn from(value: &str) -> Self {
        ContentType::from(value.to_string())
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown upload state '{0}'")]
pub struct UnknownUploadState(String);

/// Lifecycle state of an upload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Uploading,
    Queued,
    Processing,
    Completed,
    Errored,
    Failed,
    Deleting,
    Deleted,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Uploading => "uploading",
            UploadState::Queued => "queued",
            UploadState::Processing => "processing",
            UploadState::Completed => "completed",
            UploadState::Errored => "errored",
            UploadState::Failed => "failed",
            UploadState::Deleting => "deleting",
            UploadState::Deleted => "deleted",
        }
    }

    /// Terminal states are never left by the worker itself.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Failed | UploadState::Deleted
        )
    }
}

impl TryFrom<String> for UploadState {
    type Error = UnknownUploadState;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let state = match value.as_str() {
            "uploading" => UploadState::Uploading,
            "queued" => UploadState::Queued,
            "processing" => UploadState::Processing,
            "completed" => UploadState::Completed,
            "errored" => UploadState::Errored,
            "failed" => UploadState::Failed,
            "deleting" => UploadState::Deleting,
            "deleted" => UploadState::Deleted,
            _ => return Err(UnknownUploadState(value)),
        };
        Ok(state)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Upload` is a precise code-intel index upload as stored in the `lsif_uploads` table.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Upload {
    /// Unique identifier for this upload
    #[builder(default)]
    #[getset(skip)]
    id: i64,
    /// Repository the index was generated for
    #[builder(default)]
    repository_id: i32,
    /// Full 40-character commit hash, opaque to the worker
    #[builder(default, setter(into))]
    commit: String,
    /// Directory (relative to the repository root) the index was generated from
    #[builder(default, setter(into))]
    root: String,
    /// Free-text name of the tool that produced the index
    #[builder(default, setter(into))]
    indexer: String,
    #[builder(default = "ContentType::Lsif", setter(into))]
    #[sqlx(try_from = "String")]
    content_type: ContentType,
    #[builder(default = "UploadState::Queued")]
    #[sqlx(try_from = "String")]
    state: UploadState,
    /// Size of the gzipped payload, when known
    #[builder(default, setter(strip_option))]
    upload_size: Option<i64>,
    /// Size of the payload once decompressed, when known
    #[builder(default, setter(strip_option))]
    uncompressed_size: Option<i64>,
    #[builder(default = "Utc::now()")]
    uploaded_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    finished_at: Option<DateTime<Utc>>,
    /// The record is invisible to dequeue until this instant
    #[builder(default, setter(strip_option))]
    process_after: Option<DateTime<Utc>>,
    /// How many times the record was reclaimed after its lease went stale
    #[builder(default)]
    num_resets: i32,
    /// How many times processing returned an error
    #[builder(default)]
    num_failures: i32,
    #[builder(default, setter(strip_option))]
    failure_message: Option<String>,
    /// Worker currently holding the lease
    #[builder(default, setter(strip_option))]
    worker_hostname: Option<String>,
    #[builder(default, setter(strip_option))]
    last_heartbeat_at: Option<DateTime<Utc>>,
}

impl Upload {
    /// Creates a new builder for constructing an `Upload`.
    pub fn builder() -> UploadBuilder {
        UploadBuilder::default()
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Deterministic blob store key of the raw gzipped payload.
    ///
    /// Both formats share the `.lsif.gz` suffix for backwards compatibility
    /// with existing upload endpoints.
    pub fn blob_key(&self) -> String {
        format!("upload-{}.lsif.gz", self.id)
    }
}

impl UploadBuilder {
    /// Builds the Upload with all configured values.
    pub fn build(self) -> Upload {
        self.build_internal()
            .expect("All fields have defaults, build should never fail")
    }
}

impl Record for Upload {
    const KIND: &'static str = "lsif_upload";

    fn id(&self) -> i64 {
        self.id
    }
}
