#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use codeintel_worker::uploads::bundle::{
    DocumentData, Meta, MonikerLocations, Package, PackageReference, ResultChunkData,
};
use codeintel_worker::uploads::scip::{
    Document, Index, Metadata, Occurrence, SymbolInformation, ToolInfo,
};
use codeintel_worker::{
    BlobReader, BlobStore, BoxError, GitserverClient, HandleOutcome, Handler, HeartbeatResult,
    LsifStore, QueueStore, Repo, RepoStore, ResetStalledResult, ResolveRevError, StoreError,
    Transactional, Upload, UploadCondition, UploadState, UploadsStore,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use indoc::indoc;
use prost::Message;
use tokio::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer().with_test_writer();
        let filter_layer = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("debug"));

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}

/// Polls `condition` every few milliseconds until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// Queue store

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueCall {
    MarkComplete(i64),
    MarkErrored(i64, String),
    MarkFailed(i64, String),
    Requeue(i64, DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct QueueRow {
    pub upload: Upload,
    pub state: UploadState,
    pub worker_hostname: Option<String>,
    pub process_after: Option<DateTime<Utc>>,
    pub num_failures: i32,
    pub num_resets: i32,
    pub failure_message: Option<String>,
    pub cancel: bool,
    pub stalled: bool,
}

#[derive(Default)]
struct QueueState {
    rows: BTreeMap<i64, QueueRow>,
    calls: Vec<QueueCall>,
    dequeue_conditions: Vec<Vec<UploadCondition>>,
}

pub const MAX_NUM_RESETS: i32 = 3;

/// Queue of uploads kept in memory, recording every release call.
#[derive(Clone)]
pub struct MemoryQueueStore {
    state: Arc<Mutex<QueueState>>,
    max_num_failures: i32,
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        MemoryQueueStore {
            state: Arc::default(),
            max_num_failures: 1,
        }
    }
}

impl MemoryQueueStore {
    pub fn with_uploads(uploads: impl IntoIterator<Item = Upload>) -> Self {
        let store = MemoryQueueStore::default();
        for upload in uploads {
            store.push(upload);
        }
        store
    }

    pub fn max_num_failures(mut self, value: i32) -> Self {
        self.max_num_failures = value;
        self
    }

    pub fn push(&self, upload: Upload) {
        let mut state = self.state.lock().unwrap();
        state.rows.insert(
            upload.id(),
            QueueRow {
                upload,
                state: UploadState::Queued,
                worker_hostname: None,
                process_after: None,
                num_failures: 0,
                num_resets: 0,
                failure_message: None,
                cancel: false,
                stalled: false,
            },
        );
    }

    pub fn row(&self, id: i64) -> QueueRow {
        self.state.lock().unwrap().rows[&id].clone()
    }

    pub fn calls(&self) -> Vec<QueueCall> {
        let mut calls = self.state.lock().unwrap().calls.clone();
        calls.sort();
        calls
    }

    pub fn dequeue_conditions(&self) -> Vec<Vec<UploadCondition>> {
        self.state.lock().unwrap().dequeue_conditions.clone()
    }

    /// Hands the lease of `id` to another worker.
    pub fn steal_lease(&self, id: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.rows.get_mut(&id) {
            row.worker_hostname = Some("another_worker".into());
        }
    }

    pub fn request_cancel(&self, id: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.rows.get_mut(&id) {
            row.cancel = true;
        }
    }

    /// Leases the next record like a worker would, returning its id.
    pub async fn dequeue_for_test(&self, worker_hostname: &str) -> Option<i64> {
        self.dequeue(worker_hostname, &[])
            .await
            .unwrap()
            .map(|upload| upload.id())
    }

    /// Makes the lease of `id` look stale to `reset_stalled`.
    pub fn stall(&self, id: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.rows.get_mut(&id) {
            row.stalled = true;
        }
    }

    /// Makes every requeued or errored record visible right away.
    pub fn fast_forward(&self) {
        let mut state = self.state.lock().unwrap();
        for row in state.rows.values_mut() {
            row.process_after = None;
        }
    }

    fn release(
        &self,
        id: i64,
        worker_hostname: &str,
        call: QueueCall,
        apply: impl FnOnce(&mut QueueRow),
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.rows.get_mut(&id) {
            Some(row)
                if row.state == UploadState::Processing
                    && row.worker_hostname.as_deref() == Some(worker_hostname) =>
            {
                row.worker_hostname = None;
                apply(row);
                true
            }
            _ => false,
        }
    }
}

impl Transactional for MemoryQueueStore {
    async fn transact(&self) -> Result<Self, StoreError> {
        Ok(self.clone())
    }

    async fn done<T, E>(&self, result: Result<T, E>) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
    {
        result
    }
}

impl QueueStore<Upload> for MemoryQueueStore {
    type Condition = UploadCondition;

    async fn dequeue(
        &self,
        worker_hostname: &str,
        conditions: &[UploadCondition],
    ) -> Result<Option<Upload>, StoreError> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        state.dequeue_conditions.push(conditions.to_vec());

        let max_num_failures = self.max_num_failures;
        let candidate = state.rows.values_mut().find(|row| {
            let eligible = row.state == UploadState::Queued
                || (row.state == UploadState::Errored && row.num_failures < max_num_failures);
            let visible = row.process_after.map_or(true, |after| after <= now);
            let admitted = conditions.iter().all(|condition| match condition {
                UploadCondition::MaxUploadSize(max) => {
                    row.upload.upload_size().map_or(true, |size| size <= *max)
                }
            });
            eligible && visible && admitted
        });

        Ok(candidate.map(|row| {
            row.state = UploadState::Processing;
            row.worker_hostname = Some(worker_hostname.to_string());
            row.cancel = false;
            row.stalled = false;
            row.upload.clone()
        }))
    }

    async fn heartbeat(
        &self,
        worker_hostname: &str,
        ids: &[i64],
    ) -> Result<HeartbeatResult, StoreError> {
        let state = self.state.lock().unwrap();
        let mut result = HeartbeatResult::default();
        for id in ids {
            let Some(row) = state.rows.get(id) else {
                continue;
            };
            if row.state == UploadState::Processing
                && row.worker_hostname.as_deref() == Some(worker_hostname)
            {
                result.known.push(*id);
            }
            if row.cancel {
                result.cancel.push(*id);
            }
        }
        Ok(result)
    }

    async fn mark_complete(&self, id: i64, worker_hostname: &str) -> Result<bool, StoreError> {
        Ok(self.release(id, worker_hostname, QueueCall::MarkComplete(id), |row| {
            row.state = UploadState::Completed;
        }))
    }

    async fn mark_errored(
        &self,
        id: i64,
        worker_hostname: &str,
        failure_message: &str,
    ) -> Result<bool, StoreError> {
        let call = QueueCall::MarkErrored(id, failure_message.to_string());
        Ok(self.release(id, worker_hostname, call, |row| {
            row.state = UploadState::Errored;
            row.num_failures += 1;
            row.failure_message = Some(failure_message.to_string());
        }))
    }

    async fn mark_failed(
        &self,
        id: i64,
        worker_hostname: &str,
        failure_message: &str,
    ) -> Result<bool, StoreError> {
        let call = QueueCall::MarkFailed(id, failure_message.to_string());
        Ok(self.release(id, worker_hostname, call, |row| {
            row.state = UploadState::Failed;
            row.failure_message = Some(failure_message.to_string());
        }))
    }

    async fn requeue(&self, id: i64, visible_after: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(QueueCall::Requeue(id, visible_after));
        if let Some(row) = state.rows.get_mut(&id) {
            row.state = UploadState::Queued;
            row.worker_hostname = None;
            row.process_after = Some(visible_after);
        }
        Ok(())
    }

    async fn reset_stalled(&self, _stalled_after: Duration) -> Result<ResetStalledResult, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut result = ResetStalledResult::default();
        for (id, row) in state.rows.iter_mut() {
            if row.state != UploadState::Processing || !row.stalled {
                continue;
            }
            row.stalled = false;
            row.worker_hostname = None;
            if row.num_resets < MAX_NUM_RESETS {
                row.state = UploadState::Queued;
                row.num_resets += 1;
                result.reset.push(*id);
            } else {
                row.state = UploadState::Failed;
                row.num_failures += 1;
                row.failure_message = Some("failed to process".into());
                result.failed.push(*id);
            }
        }
        Ok(result)
    }

    async fn queued_count(&self) -> Result<i64, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rows
            .values()
            .filter(|row| row.state == UploadState::Queued)
            .count() as i64)
    }
}

// Transactional in-memory data

/// Data of a memory store: writes made inside a transaction are only
/// published to `committed` when the transaction succeeds.
#[derive(Clone)]
struct MemoryData<T> {
    committed: Arc<Mutex<T>>,
    tx: Option<Arc<Mutex<T>>>,
    fail_on: Arc<Mutex<HashSet<&'static str>>>,
}

impl<T: Clone + Default> Default for MemoryData<T> {
    fn default() -> Self {
        MemoryData {
            committed: Arc::default(),
            tx: None,
            fail_on: Arc::default(),
        }
    }
}

impl<T: Clone> MemoryData<T> {
    fn transact(&self) -> Self {
        let snapshot = match &self.tx {
            Some(tx) => tx.lock().unwrap().clone(),
            None => self.committed.lock().unwrap().clone(),
        };
        MemoryData {
            committed: self.committed.clone(),
            tx: Some(Arc::new(Mutex::new(snapshot))),
            fail_on: self.fail_on.clone(),
        }
    }

    fn done<R, E>(&self, result: Result<R, E>) -> Result<R, E> {
        if let (Some(tx), Ok(_)) = (&self.tx, &result) {
            *self.committed.lock().unwrap() = tx.lock().unwrap().clone();
        }
        result
    }

    fn write<R>(&self, op: &'static str, f: impl FnOnce(&mut T) -> Result<R, StoreError>) -> Result<R, StoreError> {
        if self.fail_on.lock().unwrap().remove(op) {
            return Err(StoreError::backend(op, "injected failure"));
        }
        let target = self.tx.as_ref().unwrap_or(&self.committed);
        let mut data = target.lock().unwrap();
        f(&mut data)
    }

    fn committed(&self) -> T {
        self.committed.lock().unwrap().clone()
    }
}

// Uploads store

#[derive(Debug, Clone, Default)]
pub struct UploadsData {
    pub committed_at: HashMap<(i32, String), DateTime<Utc>>,
    pub overlapping_deletes: Vec<(i32, String, String, String)>,
    pub packages: HashMap<i64, Vec<Package>>,
    pub package_references: HashMap<i64, Vec<PackageReference>>,
    pub dependency_syncing_jobs: Vec<i64>,
    pub dirty_repositories: HashMap<i32, i64>,
}

#[derive(Clone, Default)]
pub struct MemoryUploadsStore {
    data: MemoryData<UploadsData>,
}

impl MemoryUploadsStore {
    pub fn committed(&self) -> UploadsData {
        self.data.committed()
    }

    /// The next call of operation `op` fails.
    pub fn fail_once(&self, op: &'static str) {
        self.data.fail_on.lock().unwrap().insert(op);
    }
}

impl Transactional for MemoryUploadsStore {
    async fn transact(&self) -> Result<Self, StoreError> {
        Ok(MemoryUploadsStore {
            data: self.data.transact(),
        })
    }

    async fn done<T, E>(&self, result: Result<T, E>) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
    {
        self.data.done(result)
    }
}

impl UploadsStore for MemoryUploadsStore {
    async fn update_committed_at(
        &self,
        repository_id: i32,
        commit: &str,
        committed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.data.write("store.update_committed_at", |data| {
            data.committed_at
                .entry((repository_id, commit.to_string()))
                .or_insert(committed_at);
            Ok(())
        })
    }

    async fn delete_overlapping_dumps(
        &self,
        repository_id: i32,
        commit: &str,
        root: &str,
        indexer: &str,
    ) -> Result<u64, StoreError> {
        self.data.write("store.delete_overlapping_dumps", |data| {
            data.overlapping_deletes.push((
                repository_id,
                commit.to_string(),
                root.to_string(),
                indexer.to_string(),
            ));
            Ok(0)
        })
    }

    async fn update_packages(&self, upload_id: i64, packages: &[Package]) -> Result<(), StoreError> {
        self.data.write("store.update_packages", |data| {
            data.packages.insert(upload_id, packages.to_vec());
            Ok(())
        })
    }

    async fn update_package_references(
        &self,
        upload_id: i64,
        references: &[PackageReference],
    ) -> Result<(), StoreError> {
        self.data.write("store.update_package_references", |data| {
            data.package_references.insert(upload_id, references.to_vec());
            Ok(())
        })
    }

    async fn insert_dependency_syncing_job(&self, upload_id: i64) -> Result<i64, StoreError> {
        self.data.write("store.insert_dependency_syncing_job", |data| {
            data.dependency_syncing_jobs.push(upload_id);
            Ok(data.dependency_syncing_jobs.len() as i64)
        })
    }

    async fn set_repository_as_dirty(&self, repository_id: i32) -> Result<(), StoreError> {
        self.data.write("store.set_repository_as_dirty", |data| {
            *data.dirty_repositories.entry(repository_id).or_default() += 1;
            Ok(())
        })
    }
}

// Content store

#[derive(Debug, Clone, Default)]
pub struct LsifData {
    pub meta: HashMap<i64, Meta>,
    pub documents: HashMap<i64, BTreeMap<String, DocumentData>>,
    pub result_chunks: HashMap<i64, BTreeMap<u32, ResultChunkData>>,
    pub definitions: HashMap<i64, Vec<MonikerLocations>>,
    pub references: HashMap<i64, Vec<MonikerLocations>>,
    pub implementations: HashMap<i64, Vec<MonikerLocations>>,
}

/// Content store rejecting a second write of the same upload like the
/// primary keys of the real tables do.
#[derive(Clone, Default)]
pub struct MemoryLsifStore {
    data: MemoryData<LsifData>,
    meta_writes: Arc<AtomicUsize>,
}

impl MemoryLsifStore {
    pub fn committed(&self) -> LsifData {
        self.data.committed()
    }

    pub fn meta_writes(&self) -> usize {
        self.meta_writes.load(Ordering::SeqCst)
    }

    pub fn fail_once(&self, op: &'static str) {
        self.data.fail_on.lock().unwrap().insert(op);
    }
}

fn insert_unique<V>(
    map: &mut HashMap<i64, V>,
    op: &'static str,
    upload_id: i64,
    value: V,
) -> Result<(), StoreError> {
    if map.contains_key(&upload_id) {
        return Err(StoreError::UniqueViolation {
            op,
            constraint: format!("{op}_pkey"),
        });
    }
    map.insert(upload_id, value);
    Ok(())
}

impl Transactional for MemoryLsifStore {
    async fn transact(&self) -> Result<Self, StoreError> {
        Ok(MemoryLsifStore {
            data: self.data.transact(),
            meta_writes: self.meta_writes.clone(),
        })
    }

    async fn done<T, E>(&self, result: Result<T, E>) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
    {
        self.data.done(result)
    }
}

impl LsifStore for MemoryLsifStore {
    async fn write_meta(&self, upload_id: i64, meta: Meta) -> Result<(), StoreError> {
        self.meta_writes.fetch_add(1, Ordering::SeqCst);
        self.data.write("lsifstore.write_meta", |data| {
            insert_unique(&mut data.meta, "lsifstore.write_meta", upload_id, meta)
        })
    }

    async fn write_documents(
        &self,
        upload_id: i64,
        documents: &BTreeMap<String, DocumentData>,
    ) -> Result<(), StoreError> {
        self.data.write("lsifstore.write_documents", |data| {
            let op = "lsifstore.write_documents";
            insert_unique(&mut data.documents, op, upload_id, documents.clone())
        })
    }

    async fn write_result_chunks(
        &self,
        upload_id: i64,
        result_chunks: &BTreeMap<u32, ResultChunkData>,
    ) -> Result<(), StoreError> {
        self.data.write("lsifstore.write_result_chunks", |data| {
            let op = "lsifstore.write_result_chunks";
            insert_unique(&mut data.result_chunks, op, upload_id, result_chunks.clone())
        })
    }

    async fn write_definitions(
        &self,
        upload_id: i64,
        monikers: &[MonikerLocations],
    ) -> Result<(), StoreError> {
        self.data.write("lsifstore.write_definitions", |data| {
            let op = "lsifstore.write_definitions";
            insert_unique(&mut data.definitions, op, upload_id, monikers.to_vec())
        })
    }

    async fn write_references(
        &self,
        upload_id: i64,
        monikers: &[MonikerLocations],
    ) -> Result<(), StoreError> {
        self.data.write("lsifstore.write_references", |data| {
            let op = "lsifstore.write_references";
            insert_unique(&mut data.references, op, upload_id, monikers.to_vec())
        })
    }

    async fn write_implementations(
        &self,
        upload_id: i64,
        monikers: &[MonikerLocations],
    ) -> Result<(), StoreError> {
        self.data.write("lsifstore.write_implementations", |data| {
            let op = "lsifstore.write_implementations";
            insert_unique(&mut data.implementations, op, upload_id, monikers.to_vec())
        })
    }
}

// Collaborators

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    read_delay: Arc<Mutex<Option<Duration>>>,
}

impl MemoryBlobStore {
    pub fn put(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(key.into(), bytes);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Makes every subsequent `get` wait for `delay` before answering.
    pub fn delay_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }
}

impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<BlobReader, BoxError> {
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| format!("no blob with key {key}"))?;
        Ok(Box::pin(Cursor::new(bytes)))
    }

    async fn delete(&self, key: &str) -> Result<(), BoxError> {
        self.blobs.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Git service over a fixed set of files, identical at every commit.
#[derive(Clone, Default)]
pub struct MemoryGitserver {
    files: Arc<HashSet<String>>,
    commit_dates: Arc<HashMap<String, DateTime<Utc>>>,
    directory_lookups: Arc<AtomicUsize>,
}

impl MemoryGitserver {
    pub fn new<'a>(
        files: impl IntoIterator<Item = &'a str>,
        commits: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        MemoryGitserver {
            files: Arc::new(files.into_iter().map(str::to_string).collect()),
            commit_dates: Arc::new(
                commits
                    .into_iter()
                    .map(|commit| (commit.to_string(), commit_date()))
                    .collect(),
            ),
            directory_lookups: Arc::default(),
        }
    }

    pub fn directory_lookups(&self) -> usize {
        self.directory_lookups.load(Ordering::SeqCst)
    }
}

impl GitserverClient for MemoryGitserver {
    async fn resolve_revision(&self, _repository_id: i32, rev: &str) -> Result<String, BoxError> {
        Ok(rev.to_string())
    }

    async fn default_branch_contains(
        &self,
        _repository_id: i32,
        _commit: &str,
    ) -> Result<bool, BoxError> {
        Ok(true)
    }

    async fn directory_children(
        &self,
        _repository_id: i32,
        _commit: &str,
        dirnames: &[String],
    ) -> Result<HashMap<String, Vec<String>>, BoxError> {
        self.directory_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(dirnames
            .iter()
            .map(|dirname| {
                let mut children: Vec<String> = self
                    .files
                    .iter()
                    .filter(|file| match file.rfind('/') {
                        Some(i) => &file[..i] == dirname,
                        None => dirname.is_empty(),
                    })
                    .cloned()
                    .collect();
                children.sort();
                (dirname.clone(), children)
            })
            .collect())
    }

    async fn commit_date(
        &self,
        _repository_id: i32,
        commit: &str,
    ) -> Result<Option<(String, DateTime<Utc>)>, BoxError> {
        Ok(self
            .commit_dates
            .get(commit)
            .map(|date| (commit.to_string(), *date)))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Unresolvable {
    NotFound,
    Cloning,
}

#[derive(Clone, Default)]
pub struct MemoryRepoStore {
    unresolvable: Arc<Mutex<HashMap<String, Unresolvable>>>,
}

impl MemoryRepoStore {
    pub fn unresolvable(&self, commit: &str, reason: Unresolvable) {
        self.unresolvable
            .lock()
            .unwrap()
            .insert(commit.to_string(), reason);
    }
}

impl RepoStore for MemoryRepoStore {
    async fn get(&self, repository_id: i32) -> Result<Repo, BoxError> {
        Ok(Repo {
            id: repository_id,
            name: format!("github.com/example/repo-{repository_id}"),
        })
    }

    async fn resolve_rev(&self, _repo: &Repo, commit: &str) -> Result<String, ResolveRevError> {
        match self.unresolvable.lock().unwrap().get(commit) {
            Some(Unresolvable::NotFound) => Err(ResolveRevError::RevisionNotFound(commit.to_string())),
            Some(Unresolvable::Cloning) => Err(ResolveRevError::CloneInProgress),
            None => Ok(commit.to_string()),
        }
    }
}

// Scripted handler for engine tests

#[derive(thiserror::Error, Debug)]
pub enum ScriptedError {
    #[error("transient failure")]
    Transient,
    #[error("permanent failure")]
    Permanent,
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Complete,
    Fail,
    FailPermanently,
    Panic,
    Requeue,
    Sleep(Duration),
}

/// Handler whose outcome per record id is fixed up front.
#[derive(Clone, Default)]
pub struct ScriptedHandler {
    behaviors: Arc<HashMap<i64, Behavior>>,
    pub started: Arc<Mutex<Vec<i64>>>,
    pub finished: Arc<Mutex<Vec<i64>>>,
    pub pre_handled: Arc<AtomicUsize>,
    pub post_handled: Arc<AtomicUsize>,
}

impl ScriptedHandler {
    pub fn new(behaviors: impl IntoIterator<Item = (i64, Behavior)>) -> Self {
        ScriptedHandler {
            behaviors: Arc::new(behaviors.into_iter().collect()),
            ..ScriptedHandler::default()
        }
    }

    pub fn started(&self) -> Vec<i64> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<i64> {
        self.finished.lock().unwrap().clone()
    }

    pub fn post_handled(&self) -> usize {
        self.post_handled.load(Ordering::SeqCst)
    }
}

impl Handler<Upload> for ScriptedHandler {
    type Error = ScriptedError;
    type Condition = UploadCondition;

    async fn handle(&self, upload: Upload) -> Result<HandleOutcome, ScriptedError> {
        let id = upload.id();
        self.started.lock().unwrap().push(id);

        let behavior = self.behaviors.get(&id).copied().unwrap_or(Behavior::Complete);
        let result = match behavior {
            Behavior::Complete => Ok(HandleOutcome::Completed),
            Behavior::Fail => Err(ScriptedError::Transient),
            Behavior::FailPermanently => Err(ScriptedError::Permanent),
            Behavior::Panic => panic!("boom"),
            Behavior::Requeue => Ok(HandleOutcome::Requeued),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(HandleOutcome::Completed)
            }
        };

        self.finished.lock().unwrap().push(id);
        result
    }

    fn is_non_retryable(&self, error: &ScriptedError) -> bool {
        matches!(error, ScriptedError::Permanent)
    }

    async fn pre_handle(&self, _upload: &Upload) {
        self.pre_handled.fetch_add(1, Ordering::SeqCst);
    }

    async fn post_handle(&self, _upload: &Upload) {
        self.post_handled.fetch_add(1, Ordering::SeqCst);
    }
}

// Fixtures

pub const COMMIT: &str = "3b1b9a1f0c4d2e7a8b6c5d4e3f2a1b0c9d8e7f6a";

pub fn commit_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).unwrap()
}

pub fn upload(id: i64) -> Upload {
    Upload::builder()
        .id(id)
        .repository_id(50)
        .commit(COMMIT)
        .indexer("lsif-go")
        .build()
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// LSIF dump with one exported symbol defined in `main.go` and referenced
/// from `main.go` and `gen/gone.go`.
pub const LSIF_DUMP: &str = indoc! {r#"
    {"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///repo"}
    {"id":2,"type":"vertex","label":"document","uri":"file:///repo/main.go","languageId":"go"}
    {"id":3,"type":"vertex","label":"document","uri":"file:///repo/gen/gone.go","languageId":"go"}
    {"id":4,"type":"vertex","label":"range","start":{"line":1,"character":5},"end":{"line":1,"character":9}}
    {"id":5,"type":"vertex","label":"range","start":{"line":7,"character":2},"end":{"line":7,"character":6}}
    {"id":6,"type":"vertex","label":"range","start":{"line":0,"character":0},"end":{"line":0,"character":3}}
    {"id":7,"type":"vertex","label":"resultSet"}
    {"id":8,"type":"vertex","label":"definitionResult"}
    {"id":9,"type":"vertex","label":"referenceResult"}
    {"id":10,"type":"vertex","label":"hoverResult","result":{"contents":"func Main()"}}
    {"id":11,"type":"vertex","label":"moniker","kind":"export","scheme":"gomod","identifier":"example.com/repo:Main"}
    {"id":12,"type":"vertex","label":"packageInformation","name":"example.com/repo","manager":"gomod","version":"v1.0.0"}
    {"id":13,"type":"edge","label":"contains","outV":2,"inVs":[4,5]}
    {"id":14,"type":"edge","label":"contains","outV":3,"inVs":[6]}
    {"id":15,"type":"edge","label":"next","outV":4,"inV":7}
    {"id":16,"type":"edge","label":"next","outV":5,"inV":7}
    {"id":17,"type":"edge","label":"textDocument/definition","outV":7,"inV":8}
    {"id":18,"type":"edge","label":"textDocument/references","outV":7,"inV":9}
    {"id":19,"type":"edge","label":"textDocument/hover","outV":7,"inV":10}
    {"id":20,"type":"edge","label":"moniker","outV":7,"inV":11}
    {"id":21,"type":"edge","label":"packageInformation","outV":11,"inV":12}
    {"id":22,"type":"edge","label":"item","outV":8,"inVs":[4],"document":2}
    {"id":23,"type":"edge","label":"item","outV":9,"inVs":[4,5],"document":2,"property":"references"}
    {"id":24,"type":"edge","label":"item","outV":9,"inVs":[6],"document":3,"property":"references"}
"#};

pub const SCIP_DEFINED: &str = "scip-go gomod example.com/repo v1.0.0 Main().";
pub const SCIP_IMPORTED: &str = "scip-go gomod golang.org/x/text v0.14.0 language/Tag#";

fn occurrence(range: &[i32], symbol: &str, definition: bool) -> Occurrence {
    Occurrence {
        range: range.to_vec(),
        symbol: symbol.to_string(),
        symbol_roles: i32::from(definition),
    }
}

/// SCIP index defining one symbol and importing one from a dependency.
pub fn scip_index() -> Vec<u8> {
    Index {
        metadata: Some(Metadata {
            project_root: "file:///repo".into(),
            tool_info: Some(ToolInfo {
                name: "scip-go".into(),
                version: "0.1.0".into(),
                arguments: vec![],
            }),
            ..Metadata::default()
        }),
        documents: vec![
            Document {
                relative_path: "main.go".into(),
                occurrences: vec![
                    occurrence(&[1, 5, 9], SCIP_DEFINED, true),
                    occurrence(&[3, 1, 4], SCIP_IMPORTED, false),
                ],
                symbols: vec![SymbolInformation {
                    symbol: SCIP_DEFINED.into(),
                    documentation: vec!["func Main()".into()],
                    relationships: vec![],
                }],
                language: "go".into(),
            },
            Document {
                relative_path: "cmd/tool.go".into(),
                occurrences: vec![occurrence(&[7, 2, 6], SCIP_DEFINED, false)],
                ..Document::default()
            },
        ],
        external_symbols: vec![],
    }
    .encode_to_vec()
}
