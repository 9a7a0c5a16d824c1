use std::fmt;

use serde::{Deserialize, Serialize};

/// Text written wherever a manifest did not carry a field.
pub const NOT_AVAILABLE: &str = "Not available";

/// Which recorded checksum decides whether two records match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    #[default]
    Xxhash64,
    Md5,
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumKind::Xxhash64 => f.write_str("xxHash64"),
            ChecksumKind::Md5 => f.write_str("MD5"),
        }
    }
}

/// One hash record from a manifest, or a synthetic record standing in for a
/// whole image sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path as recorded, NFC-normalised. Unique within one tier after dedup.
    pub path: String,
    /// Size in bytes
    pub size: Option<u64>,
    /// xxHash64 as hex text
    pub xxhash64: Option<String>,
    /// MD5 as hex text
    pub md5: Option<String>,
    pub hash_date: Option<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
            xxhash64: None,
            md5: None,
            hash_date: None,
        }
    }

    pub fn checksum(&self, kind: ChecksumKind) -> Option<&str> {
        match kind {
            ChecksumKind::Xxhash64 => self.xxhash64.as_deref(),
            ChecksumKind::Md5 => self.md5.as_deref(),
        }
    }

    /// Lower-cased checksum, used as a lookup key.
    pub fn checksum_key(&self, kind: ChecksumKind) -> Option<String> {
        self.checksum(kind).map(|c| c.to_ascii_lowercase())
    }

    /// True when both records carry the selected checksum and the values agree.
    /// An absent checksum never matches, not even another absent one.
    pub fn checksum_matches(&self, other: &FileRecord, kind: ChecksumKind) -> bool {
        match (self.checksum(kind), other.checksum(kind)) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }

    /// The five report cells: file, size, xxHash, MD5, hash date.
    pub fn cells(&self) -> [String; 5] {
        [
            self.path.clone(),
            self.size
                .map(|s| s.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            or_not_available(self.xxhash64.as_deref()),
            or_not_available(self.md5.as_deref()),
            or_not_available(self.hash_date.as_deref()),
        ]
    }
}

fn or_not_available(value: Option<&str>) -> String {
    value.unwrap_or(NOT_AVAILABLE).to_string()
}
