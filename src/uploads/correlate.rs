use std::collections::{HashMap, HashSet};
use std::io::BufReader;

use codeintel_worker_record::{ContentType, Upload};
use flate2::read::GzDecoder;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use crate::uploads::bundle::CorrelatedUpload;
use crate::uploads::collaborators::{BlobReader, GitserverClient};
use crate::uploads::error::UploadError;
use crate::uploads::paths::existing_paths;
use crate::uploads::{lsif, scip};

/// Parsed upload whose documents have not been pruned yet.
pub enum ParsedUpload {
    Lsif(lsif::Correlator),
    Scip(scip::Correlator),
}

impl ParsedUpload {
    /// Decompresses and parses `blob` on a blocking thread.
    pub async fn read(content_type: &ContentType, blob: BlobReader) -> Result<Self, UploadError> {
        let content_type = match content_type {
            ContentType::Other(other) => return Err(UploadError::UnsupportedContentType(other.clone())),
            known => known.clone(),
        };

        let bridge = SyncIoBridge::new(blob);
        let parsed = tokio::task::spawn_blocking(move || {
            let reader = BufReader::new(GzDecoder::new(bridge));
            match content_type {
                ContentType::Scip => scip::read(reader).map(ParsedUpload::Scip),
                _ => lsif::read(reader).map(ParsedUpload::Lsif),
            }
        })
        .await??;

        Ok(parsed)
    }

    /// Repository-relative document paths keyed by document id.
    pub fn document_paths(&self, upload_root: &str) -> HashMap<String, String> {
        match self {
            ParsedUpload::Lsif(correlator) => correlator.document_paths(upload_root),
            ParsedUpload::Scip(correlator) => correlator.document_paths(upload_root),
        }
    }

    pub fn into_bundle(
        self,
        paths: &HashMap<String, String>,
        existing_paths: &HashSet<String>,
    ) -> CorrelatedUpload {
        match self {
            ParsedUpload::Lsif(correlator) => correlator.into_bundle(paths, existing_paths),
            ParsedUpload::Scip(correlator) => correlator.into_bundle(paths, existing_paths),
        }
    }
}

/// Turns the raw blob of `upload` into bundle data restricted to the
/// documents that exist in the repository at the upload's commit.
pub async fn correlate<G: GitserverClient>(
    upload: &Upload,
    blob: BlobReader,
    gitserver: &G,
) -> Result<CorrelatedUpload, UploadError> {
    let parsed = ParsedUpload::read(upload.content_type(), blob).await?;
    let paths = parsed.document_paths(upload.root());

    let existing = existing_paths(paths.values().map(String::as_str), |dirnames| async move {
        gitserver
            .directory_children(*upload.repository_id(), upload.commit(), &dirnames)
            .await
    })
    .await
    .map_err(|source| UploadError::Gitserver {
        op: "directory_children",
        source,
    })?;

    debug!(
        upload_id = upload.id(),
        num_documents = paths.len(),
        num_existing = existing.len(),
        "Pruned documents missing from the commit"
    );

    let correlated =
        tokio::task::spawn_blocking(move || parsed.into_bundle(&paths, &existing)).await?;
    Ok(correlated)
}
