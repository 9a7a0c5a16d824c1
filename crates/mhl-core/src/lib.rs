pub mod filter;
pub mod index;
pub mod input;
pub mod manifest;
pub mod reconcile;
pub mod record;
pub mod report;
pub mod sequence;
pub mod writer;

#[cfg(test)]
mod fixtures;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::filter::{RecordFilter, ScreenCounts};
use crate::index::{RecordPool, TextIndex};
use crate::input::ManifestSource;
use crate::manifest::Manifest;
use crate::reconcile::{ReconciliationRun, RunStats, Tier};
use crate::report::{Report, TierLayout};
use crate::sequence::Aggregated;

pub use crate::reconcile::{MatchResult, Status};
pub use crate::record::{ChecksumKind, FileRecord};

pub const DEFAULT_OUTPUT_DIR: &str = "MHL_Verification_Reports";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    /// Manifests or directories of manifests that were copied from
    pub sources: Vec<PathBuf>,
    /// First downstream tier; empty lists the sources only
    pub destination: Vec<PathBuf>,
    /// Second downstream tier; needs a destination
    pub restore: Vec<PathBuf>,
    pub checksum: ChecksumKind,
    pub skip_sequences: bool,
    pub output_dir: PathBuf,
    pub ignore_extensions: Vec<String>,
    pub excluded_path_tokens: Vec<String>,
    pub write_summary: bool,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            destination: Vec::new(),
            restore: Vec::new(),
            checksum: ChecksumKind::default(),
            skip_sequences: false,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            ignore_extensions: owned(filter::DEFAULT_IGNORE_EXTENSIONS),
            excluded_path_tokens: owned(filter::DEFAULT_EXCLUDED_TOKENS),
            write_summary: false,
        }
    }
}

impl ReconcileOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sources.is_empty() {
            anyhow::bail!("no source manifests given");
        }
        if !self.restore.is_empty() && self.destination.is_empty() {
            anyhow::bail!("a restore tier needs a destination tier");
        }
        Ok(())
    }

    pub fn layout(&self) -> TierLayout {
        layout_for(!self.destination.is_empty(), !self.restore.is_empty())
    }
}

fn layout_for(destination: bool, restore: bool) -> TierLayout {
    match (destination, restore) {
        (false, _) => TierLayout::SourceOnly,
        (true, false) => TierLayout::Destination,
        (true, true) => TierLayout::DestinationAndRestore,
    }
}

/// Type alias for progress callback: stage, current, total, message
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

/// Throttled progress reporter, emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        let start = Instant::now();
        Self {
            inner,
            last_emit: Mutex::new(start.checked_sub(Duration::from_secs(1)).unwrap_or(start)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(PoisonError::into_inner);
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Decoded manifests of each tier, in the order given by the caller.
#[derive(Debug, Clone, Default)]
pub struct ReconcileInputs {
    pub sources: Vec<ManifestSource>,
    pub destination: Vec<ManifestSource>,
    pub restore: Vec<ManifestSource>,
}

impl ReconcileInputs {
    pub fn load(options: &ReconcileOptions) -> anyhow::Result<Self> {
        Ok(Self {
            sources: input::load_manifests(&options.sources)
                .context("failed to load source manifests")?,
            destination: input::load_manifests(&options.destination)
                .context("failed to load destination manifests")?,
            restore: input::load_manifests(&options.restore)
                .context("failed to load restore manifests")?,
        })
    }

    fn total(&self) -> u64 {
        (self.sources.len() + self.destination.len() + self.restore.len()) as u64
    }
}

/// Result of [`reconcile`]
#[derive(Debug, Clone)]
pub struct Outcome {
    pub report: Report,
    pub results: Vec<MatchResult>,
    pub stats: RunStats,
    pub warnings: Vec<String>,
}

impl Outcome {
    pub fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    pub report_path: PathBuf,
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
    pub stats: RunStats,
    #[serde(default)]
    pub warnings: Vec<String>,
}

fn display_name(source: &ManifestSource) -> String {
    source
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| source.name.clone())
}

/// Parse one tier, then drop duplicates and excluded records.
fn parse_tier(
    sources: &[ManifestSource],
    filter: &RecordFilter,
    tp: &ThrottledProgress,
    done: &mut u64,
    total: u64,
) -> anyhow::Result<(Vec<Manifest>, ScreenCounts)> {
    let mut manifests = Vec::with_capacity(sources.len());
    for source in sources {
        tp.report("parse", *done, total, &source.name);
        let parsed = manifest::parse(&source.name, &source.text)
            .with_context(|| format!("failed to parse {}", display_name(source)))?;
        manifests.push(parsed);
        *done += 1;
    }
    Ok(filter::screen_tier(manifests, filter))
}

fn aggregate_manifest(
    manifest: Manifest,
    skip_sequences: bool,
) -> anyhow::Result<(String, Vec<Aggregated>)> {
    let items = if skip_sequences {
        manifest.records.into_iter().map(Aggregated::single).collect()
    } else {
        sequence::aggregate_clips(manifest.records)
            .with_context(|| format!("failed to aggregate sequences of {}", manifest.name))?
    };
    Ok((manifest.name, items))
}

/// Compare already-loaded manifests and assemble the report.
pub fn reconcile(
    inputs: &ReconcileInputs,
    options: &ReconcileOptions,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<Outcome> {
    let tp = ThrottledProgress::new(progress_callback);

    if inputs.sources.is_empty() {
        anyhow::bail!("no source manifests given");
    }
    if !inputs.restore.is_empty() && inputs.destination.is_empty() {
        anyhow::bail!("a restore tier needs a destination tier");
    }
    let layout = layout_for(!inputs.destination.is_empty(), !inputs.restore.is_empty());
    let filter = RecordFilter::new(&options.ignore_extensions, &options.excluded_path_tokens);

    // Phase 1: parse every manifest of every tier
    let total = inputs.total();
    let mut done = 0;
    let (sources, source_counts) = parse_tier(&inputs.sources, &filter, &tp, &mut done, total)?;
    let (destination, destination_counts) =
        parse_tier(&inputs.destination, &filter, &tp, &mut done, total)?;
    let (restore, restore_counts) = parse_tier(&inputs.restore, &filter, &tp, &mut done, total)?;
    tracing::info!(
        sources = source_counts.parsed,
        destination = destination_counts.parsed,
        restore = restore_counts.parsed,
        "parsed manifests"
    );

    // Phase 2: fold image sequences
    let source_items = sources
        .into_iter()
        .enumerate()
        .map(|(i, manifest)| {
            tp.report("aggregate", i as u64, inputs.sources.len() as u64, &manifest.name);
            aggregate_manifest(manifest, options.skip_sequences)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut run = match layout {
        TierLayout::SourceOnly => ReconciliationRun::source_only(options.checksum),
        TierLayout::Destination => {
            let indexes = destination
                .into_iter()
                .zip(&inputs.destination)
                .map(|(manifest, source)| TextIndex::new(manifest, &source.text))
                .collect();
            ReconciliationRun::single(indexes, options.checksum)
                .aggregate_leftovers(!options.skip_sequences)
        }
        TierLayout::DestinationAndRestore => {
            let pool = |manifests: Vec<Manifest>| -> anyhow::Result<RecordPool> {
                let tier = manifests
                    .into_iter()
                    .map(|m| -> anyhow::Result<(String, Vec<FileRecord>)> {
                        let (name, items) = aggregate_manifest(m, options.skip_sequences)?;
                        Ok((name, items.into_iter().map(|item| item.record).collect()))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(RecordPool::new(tier, options.checksum))
            };
            ReconciliationRun::paired(pool(destination)?, pool(restore)?, options.checksum)
        }
    };
    run.record_tier(Tier::Source, source_counts);
    run.record_tier(Tier::Destination, destination_counts);
    run.record_tier(Tier::Restore, restore_counts);

    // Phase 3: classify every source record
    let compared: u64 = source_items.iter().map(|(_, items)| items.len() as u64).sum();
    let mut current = 0;
    for (name, items) in source_items {
        for item in items {
            tp.report("reconcile", current, compared, &item.record.path);
            run.reconcile(&name, item)
                .with_context(|| format!("failed to compare sequences of {name}"))?;
            current += 1;
        }
    }
    let reconciliation = run.finish().context("failed to aggregate unclaimed destination records")?;

    // Phase 4: arrange the report
    tp.report("report", 0, 1, "assembling report");
    let report = report::assemble(&reconciliation.results, layout);

    Ok(Outcome {
        report,
        results: reconciliation.results,
        stats: reconciliation.stats,
        warnings: reconciliation.warnings,
    })
}

/// Run the full pipeline: load manifests from disk, reconcile them and write
/// the report (and optionally the summary) under the output directory.
pub fn process(
    options: &ReconcileOptions,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    options.validate()?;

    let inputs = ReconcileInputs::load(options)?;
    let outcome = reconcile(&inputs, options, progress_callback)?;

    fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("failed to create {}", options.output_dir.display()))?;
    let prefix = writer::report_prefix(&options.sources);
    let report_path = writer::report_path(&options.output_dir, &prefix);
    writer::write_report(&outcome.report, &report_path)?;
    tracing::info!(path = %report_path.display(), "report written");

    let summary_path = if options.write_summary {
        let path = writer::summary_path(&options.output_dir, &prefix);
        writer::Summary::new(options, &outcome.stats, &outcome.warnings)
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Some(path)
    } else {
        None
    };

    Ok(ProcessResult {
        report_path,
        summary_path,
        stats: outcome.stats,
        warnings: outcome.warnings,
    })
}
