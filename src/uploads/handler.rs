use std::time::Duration;

use chrono::{TimeDelta, Utc};
use codeintel_worker_handler::{HandleOutcome, Handler, PreDequeue};
use codeintel_worker_record::{ContentType, Upload};
use tracing::{debug, info, warn, Span};

use crate::budget::UploadBudget;
use crate::errors::StoreError;
use crate::store::{in_transaction, QueueStore, UploadCondition};
use crate::uploads::bundle::{BundleData, CorrelatedUpload};
use crate::uploads::collaborators::{BlobStore, GitserverClient, RepoStore, ResolveRevError};
use crate::uploads::correlate::correlate;
use crate::uploads::error::UploadError;
use crate::uploads::lsifstore::LsifStore;
use crate::uploads::store::UploadsStore;

/// Delay before an upload whose commit cannot be resolved yet is retried.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(60);

/// Processes raw index uploads into the codeintel and frontend databases.
///
/// The budget backs the admission hooks: it picks the dequeue predicate and
/// accounts for the uploads being processed.
pub struct UploadHandler<Q, U, L, G, R, B> {
    queue: Q,
    uploads: U,
    lsif: L,
    gitserver: G,
    repos: R,
    blobs: B,
    budget: UploadBudget,
}

impl<Q, U, L, G, R, B> UploadHandler<Q, U, L, G, R, B>
where
    Q: QueueStore<Upload, Condition = UploadCondition>,
    U: UploadsStore,
    L: LsifStore,
    G: GitserverClient,
    R: RepoStore,
    B: BlobStore,
{
    pub fn new(
        queue: Q,
        uploads: U,
        lsif: L,
        gitserver: G,
        repos: R,
        blobs: B,
        budget: UploadBudget,
    ) -> Self {
        UploadHandler {
            queue,
            uploads,
            lsif,
            gitserver,
            repos,
            blobs,
            budget,
        }
    }

    pub fn budget(&self) -> &UploadBudget {
        &self.budget
    }

    #[tracing::instrument(
        name = "upload_handler",
        skip_all,
        err,
        fields(
            upload_id = upload.id(),
            repository_id = *upload.repository_id(),
            commit = %upload.commit(),
            root = %upload.root(),
            indexer = %upload.indexer(),
            on_default_branch = tracing::field::Empty,
        )
    )]
    async fn process(&self, upload: &Upload) -> Result<HandleOutcome, UploadError> {
        let repository_id = *upload.repository_id();
        let commit = upload.commit().as_str();

        info!(
            queue_duration_ms = (Utc::now() - *upload.uploaded_at()).num_milliseconds(),
            upload_size = ?upload.upload_size(),
            content_type = %upload.content_type(),
            "Processing upload"
        );

        let repo = self
            .repos
            .get(repository_id)
            .await
            .map_err(UploadError::RepositoryLookup)?;

        let reason = match self.repos.resolve_rev(&repo, commit).await {
            Ok(_) => None,
            Err(ResolveRevError::RevisionNotFound(_)) => Some("commit not found"),
            Err(ResolveRevError::CloneInProgress) => Some("repository still cloning"),
            Err(ResolveRevError::Other(e)) => return Err(UploadError::ResolveRevision(e)),
        };
        if let Some(reason) = reason {
            let visible_after = Utc::now() + TimeDelta::seconds(REQUEUE_DELAY.as_secs() as i64);
            self.queue.requeue(upload.id(), visible_after).await?;
            warn!(reason, %visible_after, "Requeued upload record");
            return Ok(HandleOutcome::Requeued);
        }

        let on_default_branch = self
            .gitserver
            .default_branch_contains(repository_id, commit)
            .await
            .map_err(|source| UploadError::Gitserver {
                op: "default_branch_contains",
                source,
            })?;
        Span::current().record("on_default_branch", on_default_branch);

        if let ContentType::Other(content_type) = upload.content_type() {
            return Err(UploadError::UnsupportedContentType(content_type.clone()));
        }

        let key = upload.blob_key();
        let blob = self
            .blobs
            .get(&key)
            .await
            .map_err(|source| UploadError::BlobStore { op: "get", source })?;
        let correlated = correlate(upload, blob, &self.gitserver).await?;

        let (_, committed_at) = self
            .gitserver
            .commit_date(repository_id, commit)
            .await
            .map_err(|source| UploadError::Gitserver {
                op: "commit_date",
                source,
            })?
            .ok_or(UploadError::CommitDoesNotExist)?;

        // Outside of the metadata transaction so that the date is visible
        // before the repository is marked dirty.
        self.uploads
            .update_committed_at(repository_id, commit, committed_at)
            .await?;

        self.write_data(upload.id(), &correlated.bundle).await?;
        self.update_metadata(upload, &correlated).await?;

        if let Err(e) = self.blobs.delete(&key).await {
            warn!(error = %e, key = %key, "Failed to delete upload file");
        }

        info!(
            num_documents = correlated.bundle.documents.len(),
            num_packages = correlated.packages.len(),
            num_package_references = correlated.package_references.len(),
            "Processed upload"
        );
        Ok(HandleOutcome::Completed)
    }

    /// Writes the bundle in its own transaction on the content store.
    ///
    /// A unique violation means a previous attempt already wrote this upload.
    async fn write_data(&self, upload_id: i64, bundle: &BundleData) -> Result<(), UploadError> {
        let result = in_transaction(&self.lsif, |tx| async move {
            tx.write_meta(upload_id, bundle.meta).await?;
            tx.write_documents(upload_id, &bundle.documents).await?;
            tx.write_result_chunks(upload_id, &bundle.result_chunks).await?;
            tx.write_definitions(upload_id, &bundle.definitions).await?;
            tx.write_references(upload_id, &bundle.references).await?;
            tx.write_implementations(upload_id, &bundle.implementations).await?;
            Ok::<_, StoreError>(())
        })
        .await;

        match result {
            Err(e) if e.is_unique_constraint_violation() => {
                warn!(upload_id, error = %e, "LSIF data already exists for upload record");
                Ok(())
            }
            other => other.map_err(UploadError::from),
        }
    }

    /// Replaces the relational metadata of the upload in one transaction.
    async fn update_metadata(
        &self,
        upload: &Upload,
        correlated: &CorrelatedUpload,
    ) -> Result<(), UploadError> {
        let id = upload.id();
        let repository_id = *upload.repository_id();

        in_transaction(&self.uploads, |tx| async move {
            let deleted = tx
                .delete_overlapping_dumps(repository_id, upload.commit(), upload.root(), upload.indexer())
                .await?;
            tx.update_packages(id, &correlated.packages).await?;
            tx.update_package_references(id, &correlated.package_references)
                .await?;
            let job_id = tx.insert_dependency_syncing_job(id).await?;
            tx.set_repository_as_dirty(repository_id).await?;

            debug!(
                upload_id = id,
                deleted_overlapping = deleted,
                dependency_syncing_job_id = job_id,
                "Updated upload metadata"
            );
            Ok::<_, StoreError>(())
        })
        .await?;

        Ok(())
    }
}

impl<Q, U, L, G, R, B> Handler<Upload> for UploadHandler<Q, U, L, G, R, B>
where
    Q: QueueStore<Upload, Condition = UploadCondition>,
    U: UploadsStore,
    L: LsifStore,
    G: GitserverClient,
    R: RepoStore,
    B: BlobStore,
{
    type Error = UploadError;
    type Condition = UploadCondition;

    async fn handle(&self, upload: Upload) -> Result<HandleOutcome, UploadError> {
        let result = self.process(&upload).await;
        if let Err(e) = &result {
            if e.is_malformed_input() {
                warn!(upload_id = upload.id(), error = %e, "Upload is malformed");
            }
        }
        result
    }

    async fn pre_dequeue(&self) -> PreDequeue<UploadCondition> {
        self.budget.pre_dequeue()
    }

    async fn pre_handle(&self, upload: &Upload) {
        self.budget.admit(upload);
    }

    async fn post_handle(&self, upload: &Upload) {
        self.budget.release(upload);
    }
}
