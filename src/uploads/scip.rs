//! Correlation of protobuf SCIP indexes.
//!
//! The top-level `Index` message is never decoded as a whole: its fields are
//! walked one by one from the stream and each `Document` is decoded on its own,
//! so memory use is bounded by the largest document rather than the index.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{self, Read};

use prost::Message;
use tracing::debug;

use crate::uploads::bundle::{
    join_root, num_result_chunks, result_chunk_index, BundleData, CorrelatedUpload, DocumentData,
    DocumentIdRangeId, Location, Meta, MonikerData, MonikerLocations, Package,
    PackageInformationData, PackageReference, Range, RangeData, ResultChunkData,
};
use crate::uploads::error::CorrelateError;

const INDEX_METADATA_FIELD: u64 = 1;
const INDEX_DOCUMENTS_FIELD: u64 = 2;

const SYMBOL_ROLE_DEFINITION: i32 = 0x1;
const LOCAL_SYMBOL_PREFIX: &str = "local ";

/// Top-level SCIP message. Only used to produce indexes, see [`read`].
#[derive(Clone, PartialEq, Message)]
pub struct Index {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<Metadata>,
    #[prost(message, repeated, tag = "2")]
    pub documents: Vec<Document>,
    #[prost(message, repeated, tag = "3")]
    pub external_symbols: Vec<SymbolInformation>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Metadata {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(message, optional, tag = "2")]
    pub tool_info: Option<ToolInfo>,
    #[prost(string, tag = "3")]
    pub project_root: String,
    #[prost(int32, tag = "4")]
    pub text_document_encoding: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ToolInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(string, repeated, tag = "3")]
    pub arguments: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Document {
    #[prost(string, tag = "1")]
    pub relative_path: String,
    #[prost(message, repeated, tag = "2")]
    pub occurrences: Vec<Occurrence>,
    #[prost(message, repeated, tag = "3")]
    pub symbols: Vec<SymbolInformation>,
    #[prost(string, tag = "4")]
    pub language: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Occurrence {
    /// `[start_line, start_character, end_character]` or
    /// `[start_line, start_character, end_line, end_character]`
    #[prost(int32, repeated, tag = "1")]
    pub range: Vec<i32>,
    #[prost(string, tag = "2")]
    pub symbol: String,
    #[prost(int32, tag = "3")]
    pub symbol_roles: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SymbolInformation {
    #[prost(string, tag = "1")]
    pub symbol: String,
    #[prost(string, repeated, tag = "3")]
    pub documentation: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub relationships: Vec<Relationship>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Relationship {
    #[prost(string, tag = "1")]
    pub symbol: String,
    #[prost(bool, tag = "2")]
    pub is_reference: bool,
    #[prost(bool, tag = "3")]
    pub is_implementation: bool,
    #[prost(bool, tag = "4")]
    pub is_type_definition: bool,
    #[prost(bool, tag = "5")]
    pub is_definition: bool,
}

struct ScipOccurrence {
    range: Range,
    symbol: String,
    is_definition: bool,
}

struct ScipDocument {
    relative_path: String,
    occurrences: Vec<ScipOccurrence>,
    documentation: HashMap<String, String>,
    /// `(implementor, implemented)` symbol pairs
    implementations: Vec<(String, String)>,
}

/// Compact state accumulated while reading a SCIP index.
#[derive(Default)]
pub struct Correlator {
    has_metadata: bool,
    documents: Vec<ScipDocument>,
    /// Package of every global symbol seen so far
    packages: HashMap<String, Package>,
}

/// Reads a SCIP index from `reader`, field by field.
pub fn read<R: Read>(mut reader: R) -> Result<Correlator, CorrelateError> {
    let mut correlator = Correlator::default();

    while let Some(key) = read_varint(&mut reader)? {
        let (field, wire_type) = (key >> 3, key & 0x7);

        match (field, wire_type) {
            (INDEX_METADATA_FIELD, 2) => {
                let buf = read_length_delimited(&mut reader)?;
                let metadata = Metadata::decode(buf.as_slice())
                    .map_err(|source| CorrelateError::Protobuf { what: "metadata", source })?;
                debug!(
                    tool = metadata.tool_info.as_ref().map(|t| t.name.as_str()).unwrap_or_default(),
                    project_root = %metadata.project_root,
                    "Reading SCIP index"
                );
                correlator.has_metadata = true;
            }
            (INDEX_DOCUMENTS_FIELD, 2) => {
                let buf = read_length_delimited(&mut reader)?;
                let document = Document::decode(buf.as_slice())
                    .map_err(|source| CorrelateError::Protobuf { what: "document", source })?;
                correlator.add_document(document)?;
            }
            _ => skip_field(&mut reader, wire_type)?,
        }
    }

    if !correlator.has_metadata {
        return Err(CorrelateError::MissingMetadata);
    }

    Ok(correlator)
}

fn unexpected_eof() -> CorrelateError {
    io::Error::from(io::ErrorKind::UnexpectedEof).into()
}

/// `None` on a clean end of stream.
fn read_varint<R: Read>(reader: &mut R) -> Result<Option<u64>, CorrelateError> {
    let mut value = 0u64;
    for i in 0..10 {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte)? == 0 {
            return if i == 0 { Ok(None) } else { Err(unexpected_eof()) };
        }
        value |= u64::from(byte[0] & 0x7f) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(CorrelateError::malformed("index", "varint is longer than 10 bytes"))
}

fn read_length_delimited<R: Read>(reader: &mut R) -> Result<Vec<u8>, CorrelateError> {
    let len = read_varint(reader)?.ok_or_else(unexpected_eof)?;
    let mut buf = Vec::new();
    // Bounded read so that a corrupt length does not allocate up front.
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(unexpected_eof());
    }
    Ok(buf)
}

fn skip_field<R: Read>(reader: &mut R, wire_type: u64) -> Result<(), CorrelateError> {
    let len = match wire_type {
        0 => {
            read_varint(reader)?.ok_or_else(unexpected_eof)?;
            return Ok(());
        }
        1 => 8,
        2 => read_varint(reader)?.ok_or_else(unexpected_eof)?,
        5 => 4,
        other => {
            return Err(CorrelateError::malformed(
                "index",
                format!("unsupported wire type {other}"),
            ))
        }
    };

    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped != len {
        return Err(unexpected_eof());
    }
    Ok(())
}

fn scip_range(path: &str, range: &[i32]) -> Result<Range, CorrelateError> {
    match *range {
        [line, start, end] => Ok(Range::new(line, start, line, end)),
        [start_line, start, end_line, end] => Ok(Range::new(start_line, start, end_line, end)),
        _ => Err(CorrelateError::malformed(
            path,
            format!("occurrence range has {} elements", range.len()),
        )),
    }
}

fn is_local(symbol: &str) -> bool {
    symbol.starts_with(LOCAL_SYMBOL_PREFIX)
}

/// Extracts the package of a global symbol, `None` for local symbols.
///
/// Symbols read `<scheme> <manager> <name> <version> <descriptors>`, where a
/// doubled space escapes a space and `.` stands for an empty field.
pub fn parse_symbol(symbol: &str) -> Result<Option<Package>, CorrelateError> {
    if is_local(symbol) {
        return Ok(None);
    }

    let invalid = |reason| CorrelateError::InvalidSymbol {
        symbol: symbol.to_string(),
        reason,
    };

    let mut rest = symbol;
    let mut fields = Vec::with_capacity(4);
    for _ in 0..4 {
        let (field, tail) = next_field(rest).ok_or_else(|| invalid("missing package fields"))?;
        fields.push(field);
        rest = tail;
    }
    if rest.is_empty() {
        return Err(invalid("missing descriptors"));
    }

    let [scheme, manager, name, version]: [String; 4] = fields
        .try_into()
        .map_err(|_| invalid("missing package fields"))?;
    if scheme.is_empty() || scheme == "." {
        return Err(invalid("empty scheme"));
    }

    let placeholder = |field: String| if field == "." { String::new() } else { field };
    Ok(Some(Package {
        scheme,
        manager: placeholder(manager),
        name: placeholder(name),
        version: placeholder(version),
    }))
}

fn next_field(s: &str) -> Option<(String, &str)> {
    let mut field = String::new();
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != ' ' {
            field.push(c);
            continue;
        }
        if let Some((_, ' ')) = chars.peek() {
            chars.next();
            field.push(' ');
            continue;
        }
        return Some((field, &s[i + 1..]));
    }
    None
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ResultKind {
    Definition,
    Reference,
    Implementation,
}

impl ResultKind {
    fn result_id(self, key: &str) -> String {
        let prefix = match self {
            ResultKind::Definition => "definition",
            ResultKind::Reference => "reference",
            ResultKind::Implementation => "implementation",
        };
        format!("{prefix}:{key}")
    }
}

/// A range of a kept document: document id, range id and location.
type Site = (String, String, Location);

impl Correlator {
    fn add_document(&mut self, document: Document) -> Result<(), CorrelateError> {
        let mut occurrences = Vec::with_capacity(document.occurrences.len());
        for occurrence in document.occurrences {
            if occurrence.symbol.is_empty() {
                continue;
            }
            let range = scip_range(&document.relative_path, &occurrence.range)?;
            self.remember_package(&occurrence.symbol)?;
            occurrences.push(ScipOccurrence {
                range,
                is_definition: occurrence.symbol_roles & SYMBOL_ROLE_DEFINITION != 0,
                symbol: occurrence.symbol,
            });
        }

        let mut documentation = HashMap::new();
        let mut implementations = Vec::new();
        for info in document.symbols {
            for relationship in &info.relationships {
                if relationship.is_implementation {
                    self.remember_package(&relationship.symbol)?;
                    implementations.push((info.symbol.clone(), relationship.symbol.clone()));
                }
            }
            let docs: Vec<&str> = info
                .documentation
                .iter()
                .map(String::as_str)
                .filter(|d| !d.is_empty())
                .collect();
            if !docs.is_empty() {
                documentation.insert(info.symbol, docs.join("\n\n---\n\n"));
            }
        }

        self.documents.push(ScipDocument {
            relative_path: document.relative_path,
            occurrences,
            documentation,
            implementations,
        });
        Ok(())
    }

    fn remember_package(&mut self, symbol: &str) -> Result<(), CorrelateError> {
        if self.packages.contains_key(symbol) {
            return Ok(());
        }
        if let Some(package) = parse_symbol(symbol)? {
            self.packages.insert(symbol.to_string(), package);
        }
        Ok(())
    }

    /// Repository-relative path of every document, keyed by document id.
    pub fn document_paths(&self, upload_root: &str) -> HashMap<String, String> {
        self.documents
            .iter()
            .enumerate()
            .map(|(i, document)| (i.to_string(), join_root(upload_root, &document.relative_path)))
            .collect()
    }

    /// Groups the documents in `existing_paths` into bundle data.
    pub fn into_bundle(
        self,
        paths: &HashMap<String, String>,
        existing_paths: &HashSet<String>,
    ) -> CorrelatedUpload {
        let kept: Vec<(String, &String, &ScipDocument)> = self
            .documents
            .iter()
            .enumerate()
            .filter_map(|(i, document)| {
                let id = i.to_string();
                let path = paths.get(&id).filter(|path| existing_paths.contains(*path))?;
                Some((id, path, document))
            })
            .collect();

        // Local symbols are only meaningful inside their document.
        let key = |document_id: &str, symbol: &str| {
            if is_local(symbol) {
                format!("{document_id}#{symbol}")
            } else {
                symbol.to_string()
            }
        };

        let mut definitions: HashMap<String, Vec<Site>> = HashMap::new();
        let mut references: HashMap<String, Vec<Site>> = HashMap::new();
        let mut implementors: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut hovers: HashMap<String, &String> = HashMap::new();

        for (document_id, path, document) in &kept {
            for (i, occurrence) in document.occurrences.iter().enumerate() {
                let site = (
                    document_id.clone(),
                    format!("{document_id}:{i}"),
                    Location {
                        path: (*path).clone(),
                        range: occurrence.range,
                    },
                );
                let symbol = key(document_id, &occurrence.symbol);
                if occurrence.is_definition {
                    definitions.entry(symbol.clone()).or_default().push(site.clone());
                }
                references.entry(symbol).or_default().push(site);
            }
            for (implementor, implemented) in &document.implementations {
                implementors
                    .entry(key(document_id, implemented))
                    .or_default()
                    .insert(key(document_id, implementor));
            }
            for (symbol, text) in &document.documentation {
                hovers.insert(key(document_id, symbol), text);
            }
        }

        let implementations: HashMap<String, Vec<Site>> = implementors
            .into_iter()
            .filter_map(|(implemented, sources)| {
                let sites: Vec<Site> = sources
                    .iter()
                    .filter_map(|source| definitions.get(source))
                    .flatten()
                    .cloned()
                    .collect();
                (!sites.is_empty()).then_some((implemented, sites))
            })
            .collect();

        let defined: HashSet<&str> = definitions
            .keys()
            .filter(|k| self.packages.contains_key(*k))
            .map(String::as_str)
            .collect();
        let moniker_kind = |symbol: &str| if defined.contains(symbol) { "export" } else { "import" };

        // Documents
        let mut documents = BTreeMap::new();
        let mut used_globals: BTreeSet<&str> = BTreeSet::new();
        for (document_id, path, document) in &kept {
            let mut data = DocumentData::default();
            for (i, occurrence) in document.occurrences.iter().enumerate() {
                let symbol = key(document_id, &occurrence.symbol);
                let hover_result_id = hovers.get(&symbol).map(|text| {
                    let id = format!("hover:{symbol}");
                    data.hover_results.insert(id.clone(), (*text).clone());
                    id
                });

                let mut moniker_ids = Vec::new();
                if let Some(package) = self.packages.get(&occurrence.symbol) {
                    used_globals.insert(&occurrence.symbol);
                    let package_information_id = (!package.name.is_empty()).then(|| {
                        let id = format!("{}:{}:{}", package.manager, package.name, package.version);
                        data.package_information.insert(
                            id.clone(),
                            PackageInformationData {
                                manager: package.manager.clone(),
                                name: package.name.clone(),
                                version: package.version.clone(),
                            },
                        );
                        id
                    });
                    data.monikers.insert(
                        occurrence.symbol.clone(),
                        MonikerData {
                            kind: moniker_kind(&occurrence.symbol).to_string(),
                            scheme: package.scheme.clone(),
                            identifier: occurrence.symbol.clone(),
                            package_information_id,
                        },
                    );
                    moniker_ids.push(occurrence.symbol.clone());
                }

                data.ranges.insert(
                    format!("{document_id}:{i}"),
                    RangeData {
                        range: Some(occurrence.range),
                        definition_result_id: definitions
                            .contains_key(&symbol)
                            .then(|| ResultKind::Definition.result_id(&symbol)),
                        reference_result_id: Some(ResultKind::Reference.result_id(&symbol)),
                        implementation_result_id: implementations
                            .contains_key(&symbol)
                            .then(|| ResultKind::Implementation.result_id(&symbol)),
                        hover_result_id,
                        moniker_ids,
                    },
                );
            }
            documents.insert((*path).clone(), data);
        }

        // Result chunks
        let mut results: BTreeMap<String, &Vec<Site>> = BTreeMap::new();
        for (kind, grouped) in [
            (ResultKind::Definition, &definitions),
            (ResultKind::Reference, &references),
            (ResultKind::Implementation, &implementations),
        ] {
            for (symbol, sites) in grouped {
                results.insert(kind.result_id(symbol), sites);
            }
        }

        let num_chunks = num_result_chunks(results.len());
        let mut result_chunks: BTreeMap<u32, ResultChunkData> = (0..num_chunks)
            .map(|i| (i, ResultChunkData::default()))
            .collect();
        for (result_id, sites) in results {
            let chunk = result_chunks
                .entry(result_chunk_index(&result_id, num_chunks))
                .or_default();
            let mut entries = Vec::with_capacity(sites.len());
            for (document_id, range_id, location) in sites {
                chunk
                    .document_paths
                    .insert(document_id.clone(), location.path.clone());
                entries.push(DocumentIdRangeId {
                    document_id: document_id.clone(),
                    range_id: range_id.clone(),
                });
            }
            entries.sort();
            entries.dedup();
            chunk.document_id_range_ids.insert(result_id, entries);
        }

        // Monikers and packages
        let moniker_locations = |grouped: &HashMap<String, Vec<Site>>| -> Vec<MonikerLocations> {
            used_globals
                .iter()
                .filter_map(|symbol| {
                    let package = self.packages.get(*symbol)?;
                    let sites = grouped.get(*symbol)?;
                    let locations: BTreeSet<Location> =
                        sites.iter().map(|(_, _, location)| location.clone()).collect();
                    Some(MonikerLocations {
                        kind: moniker_kind(symbol).to_string(),
                        scheme: package.scheme.clone(),
                        identifier: (*symbol).to_string(),
                        locations: locations.into_iter().collect(),
                    })
                })
                .collect()
        };

        let mut packages = BTreeSet::new();
        let mut referenced = BTreeSet::new();
        for symbol in &used_globals {
            let Some(package) = self.packages.get(*symbol) else {
                continue;
            };
            if package.name.is_empty() {
                continue;
            }
            if defined.contains(symbol) {
                packages.insert(package.clone());
            } else {
                referenced.insert(package.clone());
            }
        }
        let package_references = referenced
            .into_iter()
            .filter(|package| !packages.contains(package))
            .map(|package| PackageReference { package })
            .collect();

        CorrelatedUpload {
            bundle: BundleData {
                meta: Meta {
                    num_result_chunks: num_chunks,
                },
                documents,
                result_chunks,
                definitions: moniker_locations(&definitions),
                references: moniker_locations(&references),
                implementations: moniker_locations(&implementations),
            },
            packages: packages.into_iter().collect(),
            package_references,
        }
    }
}
