use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mhl_core::{ChecksumKind, ReconcileOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mhl-verify",
    version,
    about = "Compare MHL manifests of camera originals against their copies"
)]
struct Cli {
    /// Source manifests, or directories searched for *.mhl
    #[arg(short, long, num_args = 1.., required_unless_present = "config")]
    sources: Vec<PathBuf>,

    /// Destination manifests or directories
    #[arg(short, long, visible_alias = "yoyo", num_args = 1..)]
    destination: Vec<PathBuf>,

    /// Restore manifests or directories (needs --destination)
    #[arg(short, long, num_args = 1..)]
    restore: Vec<PathBuf>,

    /// Compare MD5 checksums
    #[arg(long, conflicts_with = "xxhash")]
    md5: bool,

    /// Compare xxHash64 checksums (default)
    #[arg(long)]
    xxhash: bool,

    /// Compare image-sequence frames one by one instead of per clip
    #[arg(long)]
    skip_summarise_img_seq: bool,

    /// Directory the report is written to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// JSON file with options; command-line values take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write a JSON summary next to the report
    #[arg(long)]
    summary: bool,
}

impl Cli {
    fn into_options(self) -> anyhow::Result<ReconcileOptions> {
        let mut options = match &self.config {
            Some(path) => ReconcileOptions::load(path)?,
            None => ReconcileOptions::default(),
        };
        if !self.sources.is_empty() {
            options.sources = self.sources;
        }
        if !self.destination.is_empty() {
            options.destination = self.destination;
        }
        if !self.restore.is_empty() {
            options.restore = self.restore;
        }
        if self.md5 {
            options.checksum = ChecksumKind::Md5;
        } else if self.xxhash {
            options.checksum = ChecksumKind::Xxhash64;
        }
        if self.skip_summarise_img_seq {
            options.skip_sequences = true;
        }
        if let Some(dir) = self.output_dir {
            options.output_dir = dir;
        }
        if self.summary {
            options.write_summary = true;
        }
        Ok(options)
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = Cli::parse().into_options()?;
    options.validate()?;
    let t_total = std::time::Instant::now();

    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} {prefix} {msg}")?);

    let result = mhl_core::process(&options, &|stage, current, total, message| {
        pb.set_prefix(stage.to_string());
        pb.set_length(total);
        pb.set_position(current + 1);
        pb.set_message(message.to_string());
    });
    pb.finish_and_clear();
    let result = result?;

    let stats = &result.stats;
    eprintln!(
        "Done! {} compared ({} checksum): {} matched, {} mismatched, {} unfound ({} frames), \
         {} same name/different checksum, {} remaining from source ({:.2}s)",
        stats.compared,
        options.checksum,
        stats.matched,
        stats.mismatched,
        stats.unfound,
        stats.unfound_frames,
        stats.unmatched_same_file,
        stats.remaining_from_source,
        t_total.elapsed().as_secs_f64()
    );
    eprintln!(
        "{} missing from destination, {} missing from restore, {} listed, \
         {} duplicates dropped, {} excluded",
        stats.missing_from_destination,
        stats.missing_from_restore,
        stats.listed,
        stats.duplicates(),
        stats.excluded()
    );
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
    eprintln!("Report: {}", result.report_path.display());
    if let Some(path) = &result.summary_path {
        eprintln!("Summary: {}", path.display());
    }

    Ok(())
}
