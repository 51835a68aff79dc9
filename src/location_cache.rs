//! Request-scoped memoization of repository, commit and path lookups.
//!
//! Navigation requests resolve the same locations many times. The cache is a
//! tree of maps keyed by ascending specificity, each level behind its own
//! lock, so lookups for unrelated repositories or commits never contend.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::uploads::{BoxError, GitserverClient, Repo, RepoStore, ResolveRevError};

/// Resolves the three levels of a location.
///
/// `Ok(None)` means the location does not exist; it is cached like a hit.
pub trait LocationResolver: Send + Sync {
    type Repository: Clone + Send + Sync;
    type Commit: Clone + Send + Sync;
    type Path: Clone + Send + Sync;
    type Error: Send;

    fn repository(
        &self,
        repository_id: i32,
    ) -> impl Future<Output = Result<Option<Self::Repository>, Self::Error>> + Send;

    fn commit(
        &self,
        repository: &Self::Repository,
        commit: &str,
    ) -> impl Future<Output = Result<Option<Self::Commit>, Self::Error>> + Send;

    fn path(
        &self,
        repository: &Self::Repository,
        commit: &Self::Commit,
        path: &str,
    ) -> impl Future<Output = Result<Option<Self::Path>, Self::Error>> + Send;
}

struct CommitEntry<R: LocationResolver> {
    commit: Option<R::Commit>,
    paths: RwLock<HashMap<String, Option<R::Path>>>,
}

struct RepositoryEntry<R: LocationResolver> {
    repository: Option<R::Repository>,
    commits: RwLock<HashMap<String, Arc<CommitEntry<R>>>>,
}

/// Memoizes a [`LocationResolver`] for the lifetime of one request.
///
/// Each key is resolved at most once: concurrent lookups of the same key wait
/// for the first one. Errors are not cached.
pub struct LocationCache<R: LocationResolver> {
    resolver: R,
    repositories: RwLock<HashMap<i32, Arc<RepositoryEntry<R>>>>,
}

async fn get_or_resolve<K, V, E, F, Fut>(
    map: &RwLock<HashMap<K, V>>,
    key: &K,
    resolve: F,
) -> Result<V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    if let Some(value) = map.read().await.get(key) {
        return Ok(value.clone());
    }

    let mut entries = map.write().await;
    if let Some(value) = entries.get(key) {
        return Ok(value.clone());
    }

    let value = resolve().await?;
    entries.insert(key.clone(), value.clone());
    Ok(value)
}

impl<R: LocationResolver> LocationCache<R> {
    pub fn new(resolver: R) -> Self {
        LocationCache {
            resolver,
            repositories: RwLock::new(HashMap::new()),
        }
    }

    async fn repository_entry(&self, repository_id: i32) -> Result<Arc<RepositoryEntry<R>>, R::Error> {
        get_or_resolve(&self.repositories, &repository_id, || async {
            let repository = self.resolver.repository(repository_id).await?;
            Ok::<_, R::Error>(Arc::new(RepositoryEntry {
                repository,
                commits: RwLock::new(HashMap::new()),
            }))
        })
        .await
    }

    async fn commit_entry(
        &self,
        repository_id: i32,
        commit: &str,
    ) -> Result<Option<(Arc<RepositoryEntry<R>>, Arc<CommitEntry<R>>)>, R::Error> {
        let repository_entry = self.repository_entry(repository_id).await?;
        let Some(repository) = &repository_entry.repository else {
            return Ok(None);
        };

        let commit_entry = get_or_resolve(&repository_entry.commits, &commit.to_string(), || async {
            let commit = self.resolver.commit(repository, commit).await?;
            Ok::<_, R::Error>(Arc::new(CommitEntry {
                commit,
                paths: RwLock::new(HashMap::new()),
            }))
        })
        .await?;

        Ok(Some((repository_entry, commit_entry)))
    }

    pub async fn repository(&self, repository_id: i32) -> Result<Option<R::Repository>, R::Error> {
        Ok(self.repository_entry(repository_id).await?.repository.clone())
    }

    pub async fn commit(
        &self,
        repository_id: i32,
        commit: &str,
    ) -> Result<Option<R::Commit>, R::Error> {
        Ok(self
            .commit_entry(repository_id, commit)
            .await?
            .and_then(|(_, entry)| entry.commit.clone()))
    }

    pub async fn path(
        &self,
        repository_id: i32,
        commit: &str,
        path: &str,
    ) -> Result<Option<R::Path>, R::Error> {
        let Some((repository_entry, commit_entry)) = self.commit_entry(repository_id, commit).await?
        else {
            return Ok(None);
        };
        let (Some(repository), Some(resolved_commit)) =
            (&repository_entry.repository, &commit_entry.commit)
        else {
            return Ok(None);
        };

        get_or_resolve(&commit_entry.paths, &path.to_string(), || {
            self.resolver.path(repository, resolved_commit, path)
        })
        .await
    }
}

/// [`LocationResolver`] backed by the repository store and gitserver.
pub struct GitserverLocationResolver<R, G> {
    repos: R,
    gitserver: G,
}

impl<R: RepoStore, G: GitserverClient> GitserverLocationResolver<R, G> {
    pub fn new(repos: R, gitserver: G) -> Self {
        GitserverLocationResolver { repos, gitserver }
    }
}

impl<R: RepoStore, G: GitserverClient> LocationResolver for GitserverLocationResolver<R, G> {
    type Repository = Repo;
    type Commit = String;
    type Path = String;
    type Error = BoxError;

    async fn repository(&self, repository_id: i32) -> Result<Option<Repo>, BoxError> {
        Ok(Some(self.repos.get(repository_id).await?))
    }

    async fn commit(&self, repository: &Repo, commit: &str) -> Result<Option<String>, BoxError> {
        match self.repos.resolve_rev(repository, commit).await {
            Ok(commit) => Ok(Some(commit)),
            Err(ResolveRevError::RevisionNotFound(_) | ResolveRevError::CloneInProgress) => Ok(None),
            Err(ResolveRevError::Other(e)) => Err(e),
        }
    }

    async fn path(
        &self,
        repository: &Repo,
        commit: &String,
        path: &str,
    ) -> Result<Option<String>, BoxError> {
        let dirname = match path.rfind('/') {
            Some(i) => &path[..i],
            None => "",
        };
        let children = self
            .gitserver
            .directory_children(repository.id, commit, &[dirname.to_string()])
            .await?;

        let exists = children
            .get(dirname)
            .is_some_and(|entries| entries.iter().any(|entry| entry == path));
        Ok(exists.then(|| path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingResolver {
        repositories: AtomicUsize,
        commits: AtomicUsize,
        paths: AtomicUsize,
    }

    impl LocationResolver for CountingResolver {
        type Repository = i32;
        type Commit = String;
        type Path = String;
        type Error = String;

        async fn repository(&self, repository_id: i32) -> Result<Option<i32>, String> {
            self.repositories.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            match repository_id {
                0 => Ok(None),
                -1 => Err("boom".into()),
                id => Ok(Some(id)),
            }
        }

        async fn commit(&self, _repository: &i32, commit: &str) -> Result<Option<String>, String> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok((commit != "missing").then(|| commit.to_uppercase()))
        }

        async fn path(
            &self,
            repository: &i32,
            commit: &String,
            path: &str,
        ) -> Result<Option<String>, String> {
            self.paths.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("{repository}@{commit}:{path}")))
        }
    }

    #[tokio::test]
    async fn test_concurrent_lookups_resolve_once() {
        let cache = LocationCache::new(CountingResolver::default());

        let results = futures::future::join_all((0..8).map(|_| cache.path(7, "abc", "main.go"))).await;
        for result in results {
            assert_eq!(result.unwrap().as_deref(), Some("7@ABC:main.go"));
        }

        assert_eq!(cache.resolver.repositories.load(Ordering::SeqCst), 1);
        assert_eq!(cache.resolver.commits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.resolver.paths.load(Ordering::SeqCst), 1);

        cache.path(7, "abc", "lib.go").await.unwrap();
        cache.path(7, "def", "lib.go").await.unwrap();
        assert_eq!(cache.resolver.repositories.load(Ordering::SeqCst), 1);
        assert_eq!(cache.resolver.commits.load(Ordering::SeqCst), 2);
        assert_eq!(cache.resolver.paths.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_locations_are_cached() {
        let cache = LocationCache::new(CountingResolver::default());

        assert_eq!(cache.repository(0).await.unwrap(), None);
        assert_eq!(cache.path(0, "abc", "main.go").await.unwrap(), None);
        assert_eq!(cache.resolver.repositories.load(Ordering::SeqCst), 1);
        assert_eq!(cache.resolver.commits.load(Ordering::SeqCst), 0);

        assert_eq!(cache.commit(7, "missing").await.unwrap(), None);
        assert_eq!(cache.path(7, "missing", "main.go").await.unwrap(), None);
        assert_eq!(cache.resolver.commits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.resolver.paths.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = LocationCache::new(CountingResolver::default());

        assert!(cache.repository(-1).await.is_err());
        assert!(cache.repository(-1).await.is_err());
        assert_eq!(cache.resolver.repositories.load(Ordering::SeqCst), 2);
    }
}
