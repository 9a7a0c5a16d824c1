use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reconcile::RunStats;
use crate::report::Report;
use crate::ReconcileOptions;

pub const REPORT_SUFFIX: &str = "_verified.csv";
pub const SUMMARY_SUFFIX: &str = "_summary.json";

/// Write the header and every report line as CSV.
pub fn write_report_to<W: Write>(report: &Report, out: W) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(out);
    csv.write_record(&report.header)?;
    for row in report.rows() {
        csv.write_record(&row)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_report(report: &Report, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write_report_to(report, BufWriter::new(file))
}

/// Machine-readable record of one run, written next to the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub generated_at: DateTime<Utc>,
    pub options: ReconcileOptions,
    pub stats: RunStats,
    pub warnings: Vec<String>,
}

impl Summary {
    pub fn new(options: &ReconcileOptions, stats: &RunStats, warnings: &[String]) -> Self {
        Self {
            generated_at: Utc::now(),
            options: options.clone(),
            stats: stats.clone(),
            warnings: warnings.to_vec(),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let temp_path = path.with_extension("json.tmp");

        // Write to temp file first, then rename
        let file = File::create(&temp_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;

        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// Report file prefix: the start of each source name up to its first `_` or `.`, joined by `_`.
pub fn report_prefix(sources: &[PathBuf]) -> String {
    let parts: Vec<String> = sources
        .iter()
        .filter_map(|p| p.file_name())
        .map(|name| {
            let name = name.to_string_lossy();
            let cut = name.split('_').next().unwrap_or_default();
            cut.split('.').next().unwrap_or_default().to_string()
        })
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        "mhl".to_string()
    } else {
        parts.join("_")
    }
}

pub fn report_path(output_dir: &Path, prefix: &str) -> PathBuf {
    output_dir.join(format!("{prefix}{REPORT_SUFFIX}"))
}

pub fn summary_path(output_dir: &Path, prefix: &str) -> PathBuf {
    output_dir.join(format!("{prefix}{SUMMARY_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{Located, MatchResult, Status};
    use crate::report::{assemble, TierLayout};
    use crate::fixtures;
    use tempfile::tempdir;

    #[test]
    fn test_report_prefix() {
        let sources = vec![
            PathBuf::from("/mnt/A001_20230501_CARD01.mhl"),
            PathBuf::from("B002.2023.mhl"),
            PathBuf::from("/mnt/Day01/"),
        ];
        assert_eq!(report_prefix(&sources), "A001_B002_Day01");
        assert_eq!(report_prefix(&[]), "mhl");
    }

    #[test]
    fn test_write_report_csv() {
        let results = vec![MatchResult {
            status: Status::SourceHash,
            source: Some(Located::new("a", fixtures::record("A, B.mov"))),
            destination: None,
            restore: None,
        }];
        let report = assemble(&results, TierLayout::SourceOnly);
        let mut out = Vec::new();
        write_report_to(&report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "Status,Source File,Source Size,Source xxHash,Source MD5,Source Hash Date"
        );
        assert_eq!(lines[1], ",,,,,");
        assert_eq!(lines[2], "SOURCE_HASH,a,,,,");
        assert!(lines[3].starts_with("SOURCE_HASH,\"A, B.mov\","));
    }

    #[test]
    fn test_summary_save() {
        let dir = tempdir().unwrap();
        let path = summary_path(dir.path(), "A001");
        let stats = RunStats {
            matched: 3,
            ..RunStats::default()
        };
        Summary::new(&ReconcileOptions::default(), &stats, &["w".to_string()])
            .save(&path)
            .unwrap();

        let loaded: Summary = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.stats.matched, 3);
        assert_eq!(loaded.warnings, ["w"]);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
