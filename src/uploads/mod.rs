//! Processing of precise code-intel index uploads.

pub mod bundle;
mod collaborators;
mod correlate;
mod error;
mod handler;
pub mod lsif;
mod lsifstore;
mod paths;
pub mod scip;
mod store;

pub use collaborators::{
    BlobReader, BlobStore, BoxError, GitserverClient, Repo, RepoStore, ResolveRevError,
};
pub use correlate::{correlate, ParsedUpload};
pub use error::{CorrelateError, UploadError};
pub use handler::{UploadHandler, REQUEUE_DELAY};
pub use lsifstore::{LsifStore, PgLsifStore};
pub use store::{PgUploadsStore, UploadsStore};
