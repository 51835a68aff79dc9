use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;

/// Directory part of a repository-relative path, `""` for top-level files.
pub(crate) fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Returns the subset of `paths` that exist in the repository.
///
/// `directory_children` is called once with every distinct parent directory
/// and must return, for each of them, the paths of its entries.
pub(crate) async fn existing_paths<'a, F, Fut, E>(
    paths: impl IntoIterator<Item = &'a str>,
    directory_children: F,
) -> Result<HashSet<String>, E>
where
    F: FnOnce(Vec<String>) -> Fut,
    Fut: Future<Output = Result<HashMap<String, Vec<String>>, E>>,
{
    let paths: Vec<&str> = paths.into_iter().collect();
    if paths.is_empty() {
        return Ok(HashSet::new());
    }

    let dirnames: BTreeSet<String> = paths.iter().map(|p| dirname(p).to_string()).collect();
    let children = directory_children(dirnames.into_iter().collect()).await?;

    let known: HashSet<&str> = children
        .values()
        .flat_map(|entries| entries.iter().map(String::as_str))
        .collect();

    Ok(paths
        .into_iter()
        .filter(|p| known.contains(p))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn test_dirname() {
        assert_eq!(dirname("main.go"), "");
        assert_eq!(dirname("a/b/c.go"), "a/b");
    }

    #[tokio::test]
    async fn test_existing_paths_queries_each_directory_once() {
        let paths = ["main.go", "lib/a.go", "lib/b.go", "gen/missing.go"];

        let existing = existing_paths(paths, |dirnames| async move {
            assert_eq!(dirnames, vec!["", "gen", "lib"]);
            Ok::<_, Infallible>(HashMap::from([
                (String::new(), vec!["main.go".to_string(), "lib".to_string()]),
                ("lib".to_string(), vec!["lib/a.go".to_string()]),
                ("gen".to_string(), vec![]),
            ]))
        })
        .await
        .unwrap();

        assert_eq!(
            existing,
            HashSet::from(["main.go".to_string(), "lib/a.go".to_string()])
        );
    }

    #[tokio::test]
    async fn test_no_paths_skips_lookup() {
        let existing = existing_paths(std::iter::empty(), |_| async {
            Err::<HashMap<String, Vec<String>>, _>("must not be called")
        })
        .await
        .unwrap();
        assert!(existing.is_empty());
    }
}
