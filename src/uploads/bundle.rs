//! Correlated form of an index, as written to the codeintel database.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Zero-based, end-exclusive source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start_line: i32,
    pub start_character: i32,
    pub end_line: i32,
    pub end_character: i32,
}

impl Range {
    pub fn new(start_line: i32, start_character: i32, end_line: i32, end_character: i32) -> Self {
        Range {
            start_line,
            start_character,
            end_line,
            end_character,
        }
    }
}

/// A range of a document together with the results attached to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeData {
    pub range: Option<Range>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hover_result_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub moniker_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonikerData {
    pub kind: String,
    pub scheme: String,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_information_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInformationData {
    pub manager: String,
    pub name: String,
    pub version: String,
}

/// Everything needed to answer hover and range queries for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentData {
    pub ranges: BTreeMap<String, RangeData>,
    pub hover_results: BTreeMap<String, String>,
    pub monikers: BTreeMap<String, MonikerData>,
    pub package_information: BTreeMap<String, PackageInformationData>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentIdRangeId {
    pub document_id: String,
    pub range_id: String,
}

/// A shard of the definition, reference and implementation results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultChunkData {
    pub document_paths: BTreeMap<String, String>,
    pub document_id_range_ids: BTreeMap<String, Vec<DocumentIdRangeId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub range: Range,
}

/// Locations attached to one moniker, used for cross-index navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonikerLocations {
    pub kind: String,
    pub scheme: String,
    pub identifier: String,
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub num_result_chunks: u32,
}

/// A package provided by an index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Package {
    pub scheme: String,
    pub manager: String,
    pub name: String,
    pub version: String,
}

/// A package an index depends on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageReference {
    pub package: Package,
}

/// Correlated content of one upload, keyed the way the codeintel tables are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleData {
    pub meta: Meta,
    /// Documents keyed by repository-relative path
    pub documents: BTreeMap<String, DocumentData>,
    /// Result chunks keyed by chunk index
    pub result_chunks: BTreeMap<u32, ResultChunkData>,
    pub definitions: Vec<MonikerLocations>,
    pub references: Vec<MonikerLocations>,
    pub implementations: Vec<MonikerLocations>,
}

/// Output of correlating one upload, whatever its format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelatedUpload {
    pub bundle: BundleData,
    /// Packages the upload provides
    pub packages: Vec<Package>,
    /// Packages the upload depends on
    pub package_references: Vec<PackageReference>,
}

/// Number of result chunks for `num_results` results.
pub fn num_result_chunks(num_results: usize) -> u32 {
    const RESULTS_PER_RESULT_CHUNK: usize = 500;

    num_results.div_ceil(RESULTS_PER_RESULT_CHUNK).max(1) as u32
}

/// Index of the result chunk holding `id`, stable across runs.
pub fn result_chunk_index(id: &str, num_result_chunks: u32) -> u32 {
    // FNV-1a
    let mut hash: u32 = 0x811c_9dc5;
    for byte in id.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % num_result_chunks.max(1)
}

/// Joins an upload root and a path relative to it into a repository-relative path.
pub fn join_root(root: &str, relative: &str) -> String {
    let root = normalize_root(root);
    let relative = relative.trim_start_matches("./").trim_start_matches('/');
    format!("{root}{relative}")
}

/// Strips leading `/` and `./` and guarantees a trailing `/` on non-empty roots.
pub fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_start_matches("./").trim_start_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        String::new()
    } else if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_result_chunks() {
        assert_eq!(num_result_chunks(0), 1);
        assert_eq!(num_result_chunks(1), 1);
        assert_eq!(num_result_chunks(500), 1);
        assert_eq!(num_result_chunks(501), 2);
        assert_eq!(num_result_chunks(1500), 3);
    }

    #[test]
    fn test_result_chunk_index_is_stable_and_bounded() {
        for id in ["1", "42", "result:17", ""] {
            let a = result_chunk_index(id, 7);
            assert_eq!(a, result_chunk_index(id, 7));
            assert!(a < 7);
            assert_eq!(result_chunk_index(id, 1), 0);
        }
        // Reference FNV-1a value of "a".
        assert_eq!(result_chunk_index("a", u32::MAX), 0xe40c_292c % u32::MAX);
    }

    #[test]
    fn test_join_root() {
        assert_eq!(join_root("", "main.go"), "main.go");
        assert_eq!(join_root("/", "main.go"), "main.go");
        assert_eq!(join_root("sub", "a/b.go"), "sub/a/b.go");
        assert_eq!(join_root("sub/", "./a.go"), "sub/a.go");
        assert_eq!(join_root("./sub", "a.go"), "sub/a.go");
    }
}
