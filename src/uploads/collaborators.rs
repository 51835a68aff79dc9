//! Services the upload handler depends on but does not own.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncRead;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Streaming reader over a stored blob.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Object storage holding the raw gzipped uploads.
pub trait BlobStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<BlobReader, BoxError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Read access to the git service.
pub trait GitserverClient: Send + Sync + 'static {
    /// Resolves a revision specifier to a full commit id.
    fn resolve_revision(
        &self,
        repository_id: i32,
        rev: &str,
    ) -> impl Future<Output = Result<String, BoxError>> + Send;

    fn default_branch_contains(
        &self,
        repository_id: i32,
        commit: &str,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send;

    /// Lists the entries of each directory in `dirnames` at `commit`.
    ///
    /// Directories and entries are repository-relative paths without leading
    /// slash; the root directory is the empty string.
    fn directory_children(
        &self,
        repository_id: i32,
        commit: &str,
        dirnames: &[String],
    ) -> impl Future<Output = Result<HashMap<String, Vec<String>>, BoxError>> + Send;

    /// Returns the commit id and its committer date, or `None` when the
    /// commit does not exist.
    fn commit_date(
        &self,
        repository_id: i32,
        commit: &str,
    ) -> impl Future<Output = Result<Option<(String, DateTime<Utc>)>, BoxError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub id: i32,
    pub name: String,
}

#[derive(Error, Debug)]
pub enum ResolveRevError {
    #[error("revision not found: {0}")]
    RevisionNotFound(String),
    #[error("repository clone in progress")]
    CloneInProgress,
    #[error(transparent)]
    Other(BoxError),
}

/// Repository metadata lookups.
pub trait RepoStore: Send + Sync + 'static {
    fn get(&self, repository_id: i32) -> impl Future<Output = Result<Repo, BoxError>> + Send;

    fn resolve_rev(
        &self,
        repo: &Repo,
        commit: &str,
    ) -> impl Future<Output = Result<String, ResolveRevError>> + Send;
}
