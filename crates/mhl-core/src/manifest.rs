use std::collections::HashSet;

use roxmltree::{Document, Node};
use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use crate::record::FileRecord;

/// Errors that make a manifest unusable. Any of these aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("{name}: not a well-formed manifest: {source}")]
    Xml {
        name: String,
        #[source]
        source: roxmltree::Error,
    },
    #[error("{name}: root element has no version attribute")]
    MissingVersion { name: String },
    #[error("{name}: version {value:?} is not a number")]
    InvalidVersion { name: String, value: String },
    #[error("{name}: no hash records found")]
    NoRecords { name: String },
    #[error("{name}: hash record #{index} has no file path")]
    MissingPath { name: String, index: usize },
    #[error("{name}: size {value:?} recorded for {path} is not a number")]
    InvalidSize {
        name: String,
        path: String,
        value: String,
    },
}

/// Element layout of a manifest, decided by its declared version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Schema {
    /// Flat `file`/`size`/`xxhash64be`/`md5`/`hashdate` siblings under each `hash`.
    V1,
    /// Namespaced `path`/`xxh64`/`md5` children with size and hash date as attributes.
    V2,
}

impl Schema {
    pub fn for_version(version: f64) -> Self {
        if version < 2.0 {
            Schema::V1
        } else {
            Schema::V2
        }
    }

    fn fields(self) -> &'static [FieldRule] {
        match self {
            Schema::V1 => V1_FIELDS,
            Schema::V2 => V2_FIELDS,
        }
    }
}

/// Tool that wrote a manifest. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Producer {
    #[default]
    Unknown,
    Silverstack,
    YoYotta,
    Arri,
}

/// Lowercase substrings of the free-text `tool` field
const PRODUCER_VOCABULARY: &[(&str, Producer)] = &[
    ("yoyotta", Producer::YoYotta),
    ("silverstack", Producer::Silverstack),
    ("mhl ver", Producer::Silverstack),
    ("arri", Producer::Arri),
];

impl Producer {
    pub fn identify(tool: &str) -> Self {
        let tool = tool.to_lowercase();
        PRODUCER_VOCABULARY
            .iter()
            .find(|(needle, _)| tool.contains(needle))
            .map(|(_, producer)| *producer)
            .unwrap_or_default()
    }
}

/// A parsed manifest: its records in document order.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub name: String,
    pub version: f64,
    pub schema: Schema,
    pub producer: Producer,
    pub records: Vec<FileRecord>,
    /// Paths listed more than once in this document. The first listing is
    /// the authoritative one.
    pub repeated: HashSet<String>,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Path,
    Size,
    Xxhash64,
    Md5,
    HashDate,
}

#[derive(Debug, Clone, Copy)]
enum TagMatch {
    Exact(&'static str),
    /// Local-name substring, so any namespace or vendor prefix is accepted
    Contains(&'static str),
}

impl TagMatch {
    fn matches(self, local_name: &str) -> bool {
        match self {
            TagMatch::Exact(tag) => local_name == tag,
            TagMatch::Contains(tag) => local_name.contains(tag),
        }
    }
}

struct FieldRule {
    tag: TagMatch,
    text: Field,
    attributes: &'static [(&'static str, Field)],
}

const V1_FIELDS: &[FieldRule] = &[
    FieldRule { tag: TagMatch::Exact("file"), text: Field::Path, attributes: &[] },
    FieldRule { tag: TagMatch::Exact("size"), text: Field::Size, attributes: &[] },
    FieldRule { tag: TagMatch::Exact("xxhash64be"), text: Field::Xxhash64, attributes: &[] },
    FieldRule { tag: TagMatch::Exact("md5"), text: Field::Md5, attributes: &[] },
    FieldRule { tag: TagMatch::Exact("hashdate"), text: Field::HashDate, attributes: &[] },
];

const V2_FIELDS: &[FieldRule] = &[
    FieldRule {
        tag: TagMatch::Contains("path"),
        text: Field::Path,
        attributes: &[("size", Field::Size)],
    },
    FieldRule {
        tag: TagMatch::Contains("xxh64"),
        text: Field::Xxhash64,
        attributes: &[("hashdate", Field::HashDate)],
    },
    FieldRule { tag: TagMatch::Contains("md5"), text: Field::Md5, attributes: &[] },
];

#[derive(Default)]
struct RawFields {
    path: Option<String>,
    size: Option<String>,
    xxhash64: Option<String>,
    md5: Option<String>,
    hash_date: Option<String>,
}

impl RawFields {
    fn set(&mut self, field: Field, value: Option<&str>) {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return;
        };
        let slot = match field {
            Field::Path => &mut self.path,
            Field::Size => &mut self.size,
            Field::Xxhash64 => &mut self.xxhash64,
            Field::Md5 => &mut self.md5,
            Field::HashDate => &mut self.hash_date,
        };
        *slot = Some(value.to_string());
    }
}

/// Parse one manifest document into its records.
pub fn parse(name: &str, text: &str) -> Result<Manifest, ManifestError> {
    let doc = Document::parse(text).map_err(|source| ManifestError::Xml {
        name: name.to_string(),
        source,
    })?;
    let root = doc.root_element();

    let raw_version = root
        .attribute("version")
        .ok_or_else(|| ManifestError::MissingVersion { name: name.to_string() })?;
    let version: f64 = raw_version
        .trim()
        .parse()
        .map_err(|_| ManifestError::InvalidVersion {
            name: name.to_string(),
            value: raw_version.to_string(),
        })?;
    let schema = Schema::for_version(version);

    let producer = tool_name(root)
        .map(Producer::identify)
        .unwrap_or_default();
    tracing::debug!(manifest = name, version, ?producer, "parsing manifest");

    let records = hash_elements(root, schema)
        .enumerate()
        .map(|(index, node)| read_hash(node, schema, name, index))
        .collect::<Result<Vec<_>, _>>()?;

    if records.is_empty() {
        return Err(ManifestError::NoRecords { name: name.to_string() });
    }

    let repeated = {
        let mut seen = HashSet::with_capacity(records.len());
        records
            .iter()
            .filter(|r| !seen.insert(r.path.as_str()))
            .map(|r| r.path.clone())
            .collect()
    };

    Ok(Manifest {
        name: name.to_string(),
        version,
        schema,
        producer,
        records,
        repeated,
    })
}

fn tool_name<'a>(root: Node<'a, '_>) -> Option<&'a str> {
    root.children()
        .filter(|n| n.is_element() && n.tag_name().name().contains("creatorinfo"))
        .flat_map(|info| info.descendants())
        .find(|n| n.is_element() && n.tag_name().name() == "tool")
        .and_then(|tool| tool.text())
}

fn hash_elements<'a, 'input: 'a>(
    root: Node<'a, 'input>,
    schema: Schema,
) -> Box<dyn Iterator<Item = Node<'a, 'input>> + 'a> {
    match schema {
        Schema::V1 => Box::new(root.children().filter(is_hash)),
        Schema::V2 => {
            let container = root
                .children()
                .find(|n| n.is_element() && n.tag_name().name().contains("hashes"))
                .unwrap_or(root);
            Box::new(container.descendants().filter(is_hash))
        }
    }
}

fn is_hash(node: &Node) -> bool {
    node.is_element() && node.tag_name().name() == "hash"
}

/// Read one `hash` element with the field table of `schema`.
pub(crate) fn read_hash(
    node: Node,
    schema: Schema,
    manifest: &str,
    index: usize,
) -> Result<FileRecord, ManifestError> {
    let mut raw = RawFields::default();
    for child in node.children().filter(|n| n.is_element()) {
        let local_name = child.tag_name().name();
        for rule in schema.fields().iter().filter(|r| r.tag.matches(local_name)) {
            raw.set(rule.text, child.text());
            for (attribute, field) in rule.attributes {
                raw.set(*field, child.attribute(*attribute));
            }
        }
    }

    let path: String = raw
        .path
        .ok_or_else(|| ManifestError::MissingPath {
            name: manifest.to_string(),
            index,
        })?
        .nfc()
        .collect();

    let size = match raw.size {
        Some(value) => Some(value.parse::<u64>().map_err(|_| ManifestError::InvalidSize {
            name: manifest.to_string(),
            path: path.clone(),
            value,
        })?),
        None => None,
    };

    Ok(FileRecord {
        path,
        size,
        xxhash64: raw.xxhash64,
        md5: raw.md5,
        hash_date: raw.hash_date,
    })
}
