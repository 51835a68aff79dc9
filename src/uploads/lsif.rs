//! Correlation of newline-delimited LSIF dumps.
//!
//! The dump is read in one pass into a [`Correlator`], which only keeps the
//! vertices and edges needed to answer code navigation queries. Once the set
//! of documents that exist in the repository is known,
//! [`Correlator::into_bundle`] groups everything into [`BundleData`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::BufRead;

use serde::Deserialize;
use serde_json::Value;

use crate::uploads::bundle::{
    join_root, num_result_chunks, result_chunk_index, BundleData, CorrelatedUpload, DocumentData, DocumentIdRangeId,
    Location, Meta, MonikerData, MonikerLocations, Package, PackageInformationData,
    PackageReference, Range, RangeData, ResultChunkData,
};
use crate::uploads::error::CorrelateError;

const MAX_NEXT_CHAIN: usize = 1024;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

#[derive(Deserialize)]
struct Position {
    line: i32,
    character: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Element {
    id: RawId,
    #[serde(rename = "type")]
    element_type: String,
    label: String,

    project_root: Option<String>,
    uri: Option<String>,
    start: Option<Position>,
    end: Option<Position>,
    result: Option<Value>,
    kind: Option<String>,
    scheme: Option<String>,
    identifier: Option<String>,
    name: Option<String>,
    version: Option<String>,
    manager: Option<String>,

    out_v: Option<RawId>,
    in_v: Option<RawId>,
    in_vs: Option<Vec<RawId>>,
    document: Option<RawId>,
}

type ResultMap = HashMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ResultKind {
    Definition,
    Reference,
    Implementation,
}

/// In-memory state accumulated while reading an LSIF dump.
#[derive(Default)]
pub struct Correlator {
    project_root: Option<String>,
    documents: HashMap<String, String>,
    ranges: HashMap<String, RangeData>,
    result_sets: HashMap<String, RangeData>,
    definition_results: ResultMap,
    reference_results: ResultMap,
    implementation_results: ResultMap,
    hover_results: HashMap<String, String>,
    monikers: HashMap<String, MonikerData>,
    package_information: HashMap<String, PackageInformationData>,
    contains: HashMap<String, BTreeSet<String>>,
    next: HashMap<String, String>,
    next_moniker: HashMap<String, Vec<String>>,
    linked_results: Vec<(ResultKind, String, String)>,
}

/// Reads a whole LSIF dump.
pub fn read<R: BufRead>(reader: R) -> Result<Correlator, CorrelateError> {
    let mut correlator = Correlator::default();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let element: Element = serde_json::from_str(&line)
            .map_err(|source| CorrelateError::Json { line: i + 1, source })?;

        match element.element_type.as_str() {
            "vertex" => correlator.vertex(element)?,
            "edge" => correlator.edge(element)?,
            other => {
                return Err(CorrelateError::malformed(
                    element.id.into_string(),
                    format!("unknown element type {other:?}"),
                ))
            }
        }
    }

    if correlator.project_root.is_none() {
        return Err(CorrelateError::MissingMetadata);
    }

    Ok(correlator)
}

impl Correlator {
    fn vertex(&mut self, element: Element) -> Result<(), CorrelateError> {
        let id = element.id.into_string();

        match element.label.as_str() {
            "metaData" => {
                let root = element
                    .project_root
                    .ok_or_else(|| CorrelateError::malformed(&id, "metaData without projectRoot"))?;
                self.project_root = Some(root);
            }
            "document" => {
                let uri = element
                    .uri
                    .ok_or_else(|| CorrelateError::malformed(&id, "document without uri"))?;
                self.documents.insert(id, uri);
            }
            "range" => {
                let (Some(start), Some(end)) = (element.start, element.end) else {
                    return Err(CorrelateError::malformed(&id, "range without start or end"));
                };
                self.ranges.insert(
                    id,
                    RangeData {
                        range: Some(Range::new(start.line, start.character, end.line, end.character)),
                        ..RangeData::default()
                    },
                );
            }
            "resultSet" => {
                self.result_sets.insert(id, RangeData::default());
            }
            "definitionResult" => {
                self.definition_results.entry(id).or_default();
            }
            "referenceResult" => {
                self.reference_results.entry(id).or_default();
            }
            "implementationResult" => {
                self.implementation_results.entry(id).or_default();
            }
            "hoverResult" => {
                let text = element.result.as_ref().map(hover_text).unwrap_or_default();
                self.hover_results.insert(id, text);
            }
            "moniker" => {
                let (Some(scheme), Some(identifier)) = (element.scheme, element.identifier) else {
                    return Err(CorrelateError::malformed(&id, "moniker without scheme or identifier"));
                };
                self.monikers.insert(
                    id,
                    MonikerData {
                        kind: element.kind.unwrap_or_default(),
                        scheme,
                        identifier,
                        package_information_id: None,
                    },
                );
            }
            "packageInformation" => {
                self.package_information.insert(
                    id,
                    PackageInformationData {
                        manager: element.manager.unwrap_or_default(),
                        name: element.name.unwrap_or_default(),
                        version: element.version.unwrap_or_default(),
                    },
                );
            }
            _ => {}
        }

        Ok(())
    }

    fn edge(&mut self, element: Element) -> Result<(), CorrelateError> {
        let id = element.id.into_string();
        let out_v = element
            .out_v
            .map(RawId::into_string)
            .ok_or_else(|| CorrelateError::malformed(&id, "edge without outV"))?;
        let mut targets: Vec<String> = element
            .in_vs
            .unwrap_or_default()
            .into_iter()
            .map(RawId::into_string)
            .collect();
        if let Some(in_v) = element.in_v {
            targets.push(in_v.into_string());
        }
        let document = element.document.map(RawId::into_string);

        match element.label.as_str() {
            "contains" => {
                // Projects also contain documents; only document contents matter.
                if self.documents.contains_key(&out_v) {
                    for target in targets {
                        if !self.ranges.contains_key(&target) {
                            return Err(CorrelateError::malformed(&id, format!("unknown range {target}")));
                        }
                        self.contains.entry(out_v.clone()).or_default().insert(target);
                    }
                }
            }
            "item" => self.item(&id, out_v, targets, document)?,
            "next" => {
                let target = single(&id, targets)?;
                self.next.insert(out_v, target);
            }
            "textDocument/definition" => {
                let target = single(&id, targets)?;
                self.range_like(&id, &out_v)?.definition_result_id = Some(target);
            }
            "textDocument/references" => {
                let target = single(&id, targets)?;
                self.range_like(&id, &out_v)?.reference_result_id = Some(target);
            }
            "textDocument/implementation" => {
                let target = single(&id, targets)?;
                self.range_like(&id, &out_v)?.implementation_result_id = Some(target);
            }
            "textDocument/hover" => {
                let target = single(&id, targets)?;
                self.range_like(&id, &out_v)?.hover_result_id = Some(target);
            }
            "moniker" => {
                let target = single(&id, targets)?;
                self.range_like(&id, &out_v)?.moniker_ids.push(target);
            }
            "nextMoniker" => {
                let target = single(&id, targets)?;
                self.next_moniker.entry(out_v).or_default().push(target);
            }
            "packageInformation" => {
                let target = single(&id, targets)?;
                let moniker = self
                    .monikers
                    .get_mut(&out_v)
                    .ok_or_else(|| CorrelateError::malformed(&id, format!("unknown moniker {out_v}")))?;
                moniker.package_information_id = Some(target);
            }
            _ => {}
        }

        Ok(())
    }

    fn item(
        &mut self,
        id: &str,
        out_v: String,
        targets: Vec<String>,
        document: Option<String>,
    ) -> Result<(), CorrelateError> {
        let kind = if self.definition_results.contains_key(&out_v) {
            ResultKind::Definition
        } else if self.reference_results.contains_key(&out_v) {
            ResultKind::Reference
        } else if self.implementation_results.contains_key(&out_v) {
            ResultKind::Implementation
        } else {
            // Items of other results (diagnostics, declarations) are not kept.
            return Ok(());
        };

        for target in targets {
            if self.ranges.contains_key(&target) {
                let document = document
                    .clone()
                    .ok_or_else(|| CorrelateError::malformed(id, "item edge without document"))?;
                self.results_mut(kind)
                    .entry(out_v.clone())
                    .or_default()
                    .entry(document)
                    .or_default()
                    .push(target);
            } else {
                // A reference result including another one.
                self.linked_results
                    .push((kind, out_v.clone(), target));
            }
        }

        Ok(())
    }

    fn results(&self, kind: ResultKind) -> &ResultMap {
        match kind {
            ResultKind::Definition => &self.definition_results,
            ResultKind::Reference => &self.reference_results,
            ResultKind::Implementation => &self.implementation_results,
        }
    }

    fn results_mut(&mut self, kind: ResultKind) -> &mut ResultMap {
        match kind {
            ResultKind::Definition => &mut self.definition_results,
            ResultKind::Reference => &mut self.reference_results,
            ResultKind::Implementation => &mut self.implementation_results,
        }
    }

    fn range_like(&mut self, edge_id: &str, id: &str) -> Result<&mut RangeData, CorrelateError> {
        match self.ranges.get_mut(id) {
            Some(range) => Ok(range),
            None => self.result_sets.get_mut(id).ok_or_else(|| {
                CorrelateError::malformed(edge_id, format!("unknown range or result set {id}"))
            }),
        }
    }

    /// Repository-relative path of every document under the project root.
    pub fn document_paths(&self, upload_root: &str) -> HashMap<String, String> {
        let Some(project_root) = &self.project_root else {
            return HashMap::new();
        };
        let prefix = format!("{}/", project_root.trim_end_matches('/'));

        self.documents
            .iter()
            .filter_map(|(id, uri)| {
                let relative = uri.strip_prefix(&prefix)?;
                Some((id.clone(), join_root(upload_root, relative)))
            })
            .collect()
    }

    /// Folds into each result the ranges of every result reachable from it
    /// through item edges, however deep the chain.
    fn merge_linked_results(&mut self) {
        let mut graph: BTreeMap<(ResultKind, String), Vec<String>> = BTreeMap::new();
        for (kind, from, to) in std::mem::take(&mut self.linked_results) {
            graph.entry((kind, from)).or_default().push(to);
        }

        let mut merged = Vec::with_capacity(graph.len());
        for (kind, from) in graph.keys() {
            let results = self.results(*kind);
            let mut seen: HashSet<&str> = HashSet::from([from.as_str()]);
            let mut stack = vec![from.as_str()];
            let mut linked: BTreeMap<String, Vec<String>> = BTreeMap::new();

            while let Some(current) = stack.pop() {
                for to in graph.get(&(*kind, current.to_string())).into_iter().flatten() {
                    if !seen.insert(to.as_str()) {
                        continue;
                    }
                    for (document, ranges) in results.get(to).into_iter().flatten() {
                        linked
                            .entry(document.clone())
                            .or_default()
                            .extend(ranges.iter().cloned());
                    }
                    stack.push(to.as_str());
                }
            }
            merged.push((*kind, from.clone(), linked));
        }

        for (kind, from, linked) in merged {
            let target = self.results_mut(kind).entry(from).or_default();
            for (document, ranges) in linked {
                let existing = target.entry(document).or_default();
                let mut present: HashSet<String> = existing.iter().cloned().collect();
                existing.extend(ranges.into_iter().filter(|range| present.insert(range.clone())));
            }
        }
    }

    /// Range data of `id` with the results of its result set chain folded in.
    fn resolve_range(&self, id: &str) -> Option<RangeData> {
        let mut data = self.ranges.get(id)?.clone();
        let mut cursor = self.next.get(id);

        for _ in 0..MAX_NEXT_CHAIN {
            let Some(set_id) = cursor else { break };
            if let Some(set) = self.result_sets.get(set_id) {
                data.definition_result_id = data
                    .definition_result_id
                    .or_else(|| set.definition_result_id.clone());
                data.reference_result_id = data
                    .reference_result_id
                    .or_else(|| set.reference_result_id.clone());
                data.implementation_result_id = data
                    .implementation_result_id
                    .or_else(|| set.implementation_result_id.clone());
                data.hover_result_id = data.hover_result_id.or_else(|| set.hover_result_id.clone());
                data.moniker_ids.extend(set.moniker_ids.iter().cloned());
            }
            cursor = self.next.get(set_id);
        }

        data.moniker_ids = self.moniker_closure(&data.moniker_ids);
        Some(data)
    }

    fn moniker_closure(&self, ids: &[String]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&String> = ids.iter().collect();
        while let Some(id) = stack.pop() {
            if !self.monikers.contains_key(id) || !seen.insert(id.clone()) {
                continue;
            }
            if let Some(next) = self.next_moniker.get(id) {
                stack.extend(next.iter());
            }
        }
        seen.into_iter().collect()
    }

    /// Groups the correlated data of the documents in `existing_paths`.
    ///
    /// `paths` maps document ids to repository-relative paths, as returned by
    /// [`Correlator::document_paths`].
    pub fn into_bundle(
        mut self,
        paths: &HashMap<String, String>,
        existing_paths: &HashSet<String>,
    ) -> CorrelatedUpload {
        self.merge_linked_results();

        let kept: BTreeMap<&String, &String> = paths
            .iter()
            .filter(|(_, path)| existing_paths.contains(*path))
            .collect();

        let mut documents = BTreeMap::new();
        let mut resolved: HashMap<String, RangeData> = HashMap::new();

        for (document_id, path) in &kept {
            let mut data = DocumentData::default();
            for range_id in self.contains.get(*document_id).into_iter().flatten() {
                let Some(range) = self.resolve_range(range_id) else {
                    continue;
                };
                if let Some(hover_id) = &range.hover_result_id {
                    if let Some(text) = self.hover_results.get(hover_id) {
                        data.hover_results.insert(hover_id.clone(), text.clone());
                    }
                }
                for moniker_id in &range.moniker_ids {
                    let Some(moniker) = self.monikers.get(moniker_id) else {
                        continue;
                    };
                    if let Some(package_id) = &moniker.package_information_id {
                        if let Some(package) = self.package_information.get(package_id) {
                            data.package_information.insert(package_id.clone(), package.clone());
                        }
                    }
                    data.monikers.insert(moniker_id.clone(), moniker.clone());
                }
                resolved.insert(range_id.clone(), range.clone());
                data.ranges.insert(range_id.clone(), range);
            }
            documents.insert((*path).clone(), data);
        }

        let locations = |kind: ResultKind, result_id: &str| -> Vec<Location> {
            let mut out = Vec::new();
            if let Some(by_document) = self.results(kind).get(result_id) {
                for (document_id, range_ids) in by_document {
                    let Some(path) = kept.get(document_id) else {
                        continue;
                    };
                    for range_id in range_ids {
                        if let Some(range) = self.ranges.get(range_id).and_then(|r| r.range) {
                            out.push(Location {
                                path: (*path).clone(),
                                range,
                            });
                        }
                    }
                }
            }
            out
        };

        // Result chunks
        let mut result_ids: BTreeSet<(ResultKind, String)> = BTreeSet::new();
        for range in resolved.values() {
            for (kind, id) in [
                (ResultKind::Definition, &range.definition_result_id),
                (ResultKind::Reference, &range.reference_result_id),
                (ResultKind::Implementation, &range.implementation_result_id),
            ] {
                if let Some(id) = id {
                    result_ids.insert((kind, id.clone()));
                }
            }
        }

        let num_chunks = num_result_chunks(result_ids.len());
        let mut result_chunks: BTreeMap<u32, ResultChunkData> = (0..num_chunks)
            .map(|i| (i, ResultChunkData::default()))
            .collect();

        for (kind, result_id) in &result_ids {
            let chunk = result_chunks
                .entry(result_chunk_index(result_id, num_chunks))
                .or_default();
            let mut entries = Vec::new();
            if let Some(by_document) = self.results(*kind).get(result_id) {
                for (document_id, range_ids) in by_document {
                    let Some(path) = kept.get(document_id) else {
                        continue;
                    };
                    chunk
                        .document_paths
                        .insert(document_id.clone(), (*path).clone());
                    for range_id in range_ids {
                        entries.push(DocumentIdRangeId {
                            document_id: document_id.clone(),
                            range_id: range_id.clone(),
                        });
                    }
                }
            }
            entries.sort();
            entries.dedup();
            chunk.document_id_range_ids.insert(result_id.clone(), entries);
        }

        // Moniker locations and packages
        // Keyed like the moniker tables; the first kind seen wins.
        type Grouped = BTreeMap<(String, String), (String, BTreeSet<Location>)>;
        let mut definitions = Grouped::new();
        let mut references = Grouped::new();
        let mut implementations = Grouped::new();
        let mut packages = BTreeSet::new();
        let mut package_references = BTreeSet::new();

        for range in resolved.values() {
            for moniker_id in &range.moniker_ids {
                let Some(moniker) = self.monikers.get(moniker_id) else {
                    continue;
                };

                if let Some(info) = moniker
                    .package_information_id
                    .as_ref()
                    .and_then(|id| self.package_information.get(id))
                {
                    let package = Package {
                        scheme: moniker.scheme.clone(),
                        manager: info.manager.clone(),
                        name: info.name.clone(),
                        version: info.version.clone(),
                    };
                    match moniker.kind.as_str() {
                        "export" => {
                            packages.insert(package);
                        }
                        "import" => {
                            package_references.insert(PackageReference { package });
                        }
                        _ => {}
                    }
                }

                if moniker.kind == "local" {
                    continue;
                }

                let key = (moniker.scheme.clone(), moniker.identifier.clone());
                for (kind, result_id, target) in [
                    (ResultKind::Definition, &range.definition_result_id, &mut definitions),
                    (ResultKind::Reference, &range.reference_result_id, &mut references),
                    (ResultKind::Implementation, &range.implementation_result_id, &mut implementations),
                ] {
                    if let Some(result_id) = result_id {
                        let found = locations(kind, result_id);
                        if !found.is_empty() {
                            target
                                .entry(key.clone())
                                .or_insert_with(|| (moniker.kind.clone(), BTreeSet::new()))
                                .1
                                .extend(found);
                        }
                    }
                }
            }
        }

        let flatten = |grouped: Grouped| -> Vec<MonikerLocations> {
            grouped
                .into_iter()
                .map(|((scheme, identifier), (kind, locations))| MonikerLocations {
                    kind,
                    scheme,
                    identifier,
                    locations: locations.into_iter().collect(),
                })
                .collect()
        };

        CorrelatedUpload {
            bundle: BundleData {
                meta: Meta {
                    num_result_chunks: num_chunks,
                },
                documents,
                result_chunks,
                definitions: flatten(definitions),
                references: flatten(references),
                implementations: flatten(implementations),
            },
            packages: packages.into_iter().collect(),
            package_references: package_references.into_iter().collect(),
        }
    }
}

fn single(edge_id: &str, mut targets: Vec<String>) -> Result<String, CorrelateError> {
    match targets.len() {
        1 => Ok(targets.remove(0)),
        _ => Err(CorrelateError::malformed(edge_id, "expected exactly one inV")),
    }
}

/// Flattens the contents of a hover result into markdown.
fn hover_text(result: &Value) -> String {
    result.get("contents").map(contents_text).unwrap_or_default()
}

fn contents_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(contents_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n"),
        Value::Object(object) => {
            let text = object.get("value").and_then(Value::as_str).unwrap_or_default();
            match object.get("language").and_then(Value::as_str) {
                Some(language) if !language.is_empty() => format!("```{language}\n{text}\n```"),
                _ => text.to_string(),
            }
        }
        _ => String::new(),
    }
}
