use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;

/// Sidecar and metadata files that never belong in an integrity report
pub const DEFAULT_IGNORE_EXTENSIONS: &[&str] = &[
    ".mhl",
    ".txt",
    ".bk",
    ".db",
    ".url",
    ".sav",
    ".pdf",
    ".bin",
    ".csv",
    ".json",
    ".metadata_never_index",
    ".xml",
    ".fmtsig_sounddev",
    ".cdl",
    ".cube",
    ".drp",
    ".psla",
    "_sounddev",
];

/// Folders holding material that is not camera original
pub const DEFAULT_EXCLUDED_TOKENS: &[&str] = &[
    "TRANSCODES",
    "DOCUMENTATION",
    "MEZZANINE",
    "RESUPPLY",
    "RENAME",
    "SUBMASTER",
];

/// Decides which records are dropped from every tier before matching.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    ignore_extensions: Vec<String>,
    excluded_tokens: Vec<String>,
}

impl RecordFilter {
    pub fn new(ignore_extensions: &[String], excluded_tokens: &[String]) -> Self {
        Self {
            ignore_extensions: ignore_extensions
                .iter()
                .filter(|e| !e.is_empty())
                .map(|e| e.to_lowercase())
                .collect(),
            excluded_tokens: excluded_tokens
                .iter()
                .filter(|t| !t.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// Extension match ignores case, administrative tokens do not.
    pub fn is_excluded(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        self.ignore_extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
            || self.excluded_tokens.iter().any(|token| path.contains(token.as_str()))
    }
}

/// Record counts of one tier before and after screening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenCounts {
    pub parsed: u64,
    pub duplicates: u64,
    pub excluded: u64,
}

/// Drop duplicate paths across all manifests of one tier (first seen wins),
/// then drop excluded records. Manifests keep their order, even when emptied.
pub fn screen_tier(
    manifests: Vec<Manifest>,
    filter: &RecordFilter,
) -> (Vec<Manifest>, ScreenCounts) {
    let mut counts = ScreenCounts::default();
    let mut seen: HashSet<String> = HashSet::new();

    let screened = manifests
        .into_iter()
        .map(|mut manifest| {
            counts.parsed += manifest.records.len() as u64;
            manifest.records.retain(|record| {
                if !seen.insert(record.path.clone()) {
                    tracing::debug!(
                        manifest = %manifest.name,
                        path = %record.path,
                        "duplicate path dropped"
                    );
                    counts.duplicates += 1;
                    return false;
                }
                if filter.is_excluded(&record.path) {
                    counts.excluded += 1;
                    return false;
                }
                true
            });
            manifest
        })
        .collect();

    (screened, counts)
}
