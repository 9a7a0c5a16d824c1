//! Classification of source records against the downstream tiers.
//!
//! A [`ReconciliationRun`] owns every piece of mutable state of one run: the
//! search cursors and consumption marks of the destination tiers, the results
//! so far and the counters. Two runs never share anything.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::filter::ScreenCounts;
use crate::index::{Lookup, RecordPool, TextIndex};
use crate::record::{ChecksumKind, FileRecord};
use crate::sequence::{self, AggregateError, Aggregated};

/// Terminal classification of one report row. Declaration order is the order
/// of the status buckets in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Matched,
    Mismatched,
    UnmatchedSameFile,
    Unfound,
    RemainingFromSource,
    MissingSourceFromDestination,
    MissingSourceFromRestore,
    SourceHash,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Matched,
        Status::Mismatched,
        Status::UnmatchedSameFile,
        Status::Unfound,
        Status::RemainingFromSource,
        Status::MissingSourceFromDestination,
        Status::MissingSourceFromRestore,
        Status::SourceHash,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Matched => "MATCHED",
            Status::Mismatched => "MISMATCHED",
            Status::UnmatchedSameFile => "UNMATCHED_SAME_FILE",
            Status::Unfound => "UNFOUND",
            Status::RemainingFromSource => "REMAINING_FROM_SOURCE",
            Status::MissingSourceFromDestination => "MISSING_SOURCE_FROM_DESTINATION",
            Status::MissingSourceFromRestore => "MISSING_SOURCE_FROM_RESTORE",
            Status::SourceHash => "SOURCE_HASH",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manifest role in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Source,
    Destination,
    Restore,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Source => f.write_str("Source"),
            Tier::Destination => f.write_str("Destination"),
            Tier::Restore => f.write_str("Restore"),
        }
    }
}

/// A record and the manifest it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Located {
    pub manifest: String,
    pub record: FileRecord,
}

impl Located {
    pub fn new(manifest: impl Into<String>, record: FileRecord) -> Self {
        Self {
            manifest: manifest.into(),
            record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub status: Status,
    /// Absent only for downstream records nothing upstream accounted for
    pub source: Option<Located>,
    pub destination: Option<Located>,
    pub restore: Option<Located>,
}

impl MatchResult {
    fn new(status: Status) -> Self {
        Self {
            status,
            source: None,
            destination: None,
            restore: None,
        }
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub source: ScreenCounts,
    pub destination: ScreenCounts,
    pub restore: ScreenCounts,
    /// Source records after aggregation, one per comparison
    pub compared: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub unmatched_same_file: u64,
    /// Source records (or whole clips) with no counterpart
    pub unfound: u64,
    /// Individual frames of partly copied clips, reported on their own rows
    pub unfound_frames: u64,
    pub remaining_from_source: u64,
    pub missing_from_destination: u64,
    pub missing_from_restore: u64,
    pub listed: u64,
}

impl RunStats {
    pub fn duplicates(&self) -> u64 {
        self.source.duplicates + self.destination.duplicates + self.restore.duplicates
    }

    pub fn excluded(&self) -> u64 {
        self.source.excluded + self.destination.excluded + self.restore.excluded
    }

    fn count(&mut self, status: Status) {
        let counter = match status {
            Status::Matched => &mut self.matched,
            Status::Mismatched => &mut self.mismatched,
            Status::UnmatchedSameFile => &mut self.unmatched_same_file,
            Status::Unfound => &mut self.unfound,
            Status::RemainingFromSource => &mut self.remaining_from_source,
            Status::MissingSourceFromDestination => &mut self.missing_from_destination,
            Status::MissingSourceFromRestore => &mut self.missing_from_restore,
            Status::SourceHash => &mut self.listed,
        };
        *counter += 1;
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub results: Vec<MatchResult>,
    pub stats: RunStats,
    pub warnings: Vec<String>,
}

impl Reconciliation {
    pub fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

enum Targets {
    SourceOnly,
    Single(Vec<TextIndex>),
    Paired {
        destination: RecordPool,
        restore: RecordPool,
    },
}

/// Mutable state of one reconciliation pass.
pub struct ReconciliationRun {
    checksum: ChecksumKind,
    aggregate_leftovers: bool,
    targets: Targets,
    results: Vec<MatchResult>,
    stats: RunStats,
    warnings: Vec<String>,
}

impl ReconciliationRun {
    fn with_targets(targets: Targets, checksum: ChecksumKind) -> Self {
        Self {
            checksum,
            aggregate_leftovers: true,
            targets,
            results: Vec::new(),
            stats: RunStats::default(),
            warnings: Vec::new(),
        }
    }

    /// No downstream tier: every source record is listed.
    pub fn source_only(checksum: ChecksumKind) -> Self {
        Self::with_targets(Targets::SourceOnly, checksum)
    }

    /// One destination tier, searched by path in its manifest text.
    pub fn single(indexes: Vec<TextIndex>, checksum: ChecksumKind) -> Self {
        Self::with_targets(Targets::Single(indexes), checksum)
    }

    /// Destination and restore tiers, matched as pairs by checksum.
    pub fn paired(destination: RecordPool, restore: RecordPool, checksum: ChecksumKind) -> Self {
        Self::with_targets(Targets::Paired { destination, restore }, checksum)
    }

    /// Whether unclaimed destination frames are folded into clips when the
    /// single-tier run finishes.
    pub fn aggregate_leftovers(mut self, enabled: bool) -> Self {
        self.aggregate_leftovers = enabled;
        self
    }

    pub fn record_tier(&mut self, tier: Tier, counts: ScreenCounts) {
        match tier {
            Tier::Source => self.stats.source = counts,
            Tier::Destination => self.stats.destination = counts,
            Tier::Restore => self.stats.restore = counts,
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Classify one (possibly aggregated) source record read from `manifest`.
    pub fn reconcile(&mut self, manifest: &str, item: Aggregated) -> Result<(), AggregateError> {
        self.stats.compared += 1;
        let source = Located::new(manifest, item.record);

        match self.targets {
            Targets::SourceOnly => {
                self.push(MatchResult {
                    source: Some(source),
                    ..MatchResult::new(Status::SourceHash)
                });
            }
            Targets::Single(_) if item.frames.is_empty() => {
                let found = self.lookup(&source.record.path);
                self.compare(source, found);
            }
            Targets::Single(_) => self.compare_clip(source, item.frames)?,
            Targets::Paired {
                ref mut destination,
                ref mut restore,
            } => {
                let result = match_pair(destination, restore, source, self.checksum);
                self.push(result);
            }
        }
        Ok(())
    }

    /// Emit the downstream records nothing claimed and hand back the results.
    pub fn finish(mut self) -> Result<Reconciliation, AggregateError> {
        match std::mem::replace(&mut self.targets, Targets::SourceOnly) {
            Targets::SourceOnly => {}
            Targets::Single(indexes) => {
                for index in indexes {
                    let (name, records) = index.into_unconsumed();
                    let records = if self.aggregate_leftovers {
                        sequence::aggregate(records)?
                    } else {
                        records
                    };
                    for record in records {
                        self.push(MatchResult {
                            destination: Some(Located::new(name.as_str(), record)),
                            ..MatchResult::new(Status::MissingSourceFromDestination)
                        });
                    }
                }
            }
            Targets::Paired { destination, restore } => {
                for entry in destination.unconsumed() {
                    self.push(MatchResult {
                        destination: Some(Located::new(&entry.manifest, entry.record.clone())),
                        ..MatchResult::new(Status::MissingSourceFromDestination)
                    });
                }
                for entry in restore.unconsumed() {
                    self.push(MatchResult {
                        restore: Some(Located::new(&entry.manifest, entry.record.clone())),
                        ..MatchResult::new(Status::MissingSourceFromRestore)
                    });
                }
            }
        }

        tracing::info!(
            compared = self.stats.compared,
            matched = self.stats.matched,
            mismatched = self.stats.mismatched,
            unfound = self.stats.unfound,
            "reconciliation finished"
        );
        Ok(Reconciliation {
            results: self.results,
            stats: self.stats,
            warnings: self.warnings,
        })
    }

    fn push(&mut self, result: MatchResult) {
        self.stats.count(result.status);
        self.results.push(result);
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    /// Search the destination manifests in order; the first hit wins.
    fn lookup(&mut self, path: &str) -> Option<Located> {
        let Targets::Single(indexes) = &mut self.targets else {
            return None;
        };
        let mut unreadable = Vec::new();
        let mut found = None;
        for index in indexes.iter_mut() {
            match index.locate(path) {
                Lookup::Hit(record) => {
                    found = Some(Located::new(index.name(), record));
                    break;
                }
                Lookup::Miss => {}
                Lookup::Unreadable { reason } => {
                    unreadable.push(format!(
                        "{}: cannot read hash record of {path}: {reason}",
                        index.name()
                    ));
                }
            }
        }
        for message in unreadable {
            self.warn(message);
        }
        found
    }

    fn compare(&mut self, source: Located, found: Option<Located>) {
        let status = match &found {
            None => Status::Unfound,
            Some(dest) if source.record.checksum_matches(&dest.record, self.checksum) => {
                Status::Matched
            }
            Some(dest) => {
                self.warn(format!(
                    "{} checksum of {} differs between {} and {}",
                    self.checksum, source.record.path, source.manifest, dest.manifest
                ));
                Status::Mismatched
            }
        };
        self.push(MatchResult {
            source: Some(source),
            destination: found,
            ..MatchResult::new(status)
        });
    }

    /// Locate every frame of a clip. Frames that are missing downstream get
    /// their own rows, and the clip is compared with the frames that were found.
    fn compare_clip(
        &mut self,
        source: Located,
        frames: Vec<FileRecord>,
    ) -> Result<(), AggregateError> {
        let mut found: Vec<Located> = Vec::with_capacity(frames.len());
        let mut missing = Vec::new();
        for frame in frames {
            match self.lookup(&frame.path) {
                Some(hit) => found.push(hit),
                None => missing.push(frame),
            }
        }

        if found.is_empty() {
            self.compare(source, None);
            return Ok(());
        }

        for frame in missing {
            self.stats.unfound_frames += 1;
            self.results.push(MatchResult {
                source: Some(Located::new(source.manifest.as_str(), frame)),
                ..MatchResult::new(Status::Unfound)
            });
        }

        let manifest = found[0].manifest.clone();
        let records: Vec<FileRecord> = found.into_iter().map(|l| l.record).collect();
        let folded = sequence::fold_frames(&records)?;
        self.compare(source, Some(Located::new(manifest, folded)));
        Ok(())
    }
}

fn match_pair(
    destination: &mut RecordPool,
    restore: &mut RecordPool,
    source: Located,
    checksum: ChecksumKind,
) -> MatchResult {
    let by_checksum = source.record.checksum_key(checksum).and_then(|key| {
        Some((destination.first_by_checksum(&key)?, restore.first_by_checksum(&key)?))
    });
    let (status, pair) = match by_checksum {
        Some(pair) => (Status::Matched, Some(pair)),
        None => {
            let path = &source.record.path;
            match (destination.first_by_path(path), restore.first_by_path(path)) {
                (Some(d), Some(r)) => (Status::UnmatchedSameFile, Some((d, r))),
                _ => (Status::RemainingFromSource, None),
            }
        }
    };

    let mut result = MatchResult {
        source: Some(source),
        ..MatchResult::new(status)
    };
    if let Some((d, r)) = pair {
        let d = destination.consume(d);
        result.destination = Some(Located::new(d.manifest.as_str(), d.record.clone()));
        let r = restore.consume(r);
        result.restore = Some(Located::new(r.manifest.as_str(), r.record.clone()));
    }
    if let (Status::UnmatchedSameFile, Some(source)) = (status, &result.source) {
        tracing::warn!(
            path = %source.record.path,
            "same file name with different checksum downstream"
        );
    }
    result
}
