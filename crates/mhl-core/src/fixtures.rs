//! MHL documents for tests.

use md5::{Digest, Md5};
use xxhash_rust::xxh64::xxh64;

use crate::record::FileRecord;

/// A fully populated record whose size and checksums derive from its path.
pub fn record(path: &str) -> FileRecord {
    let seed = xxh64(path.as_bytes(), 0);
    FileRecord {
        path: path.to_string(),
        size: Some(1_000 + seed % 1_000_000),
        xxhash64: Some(format!("{:016x}", seed)),
        md5: Some(hex::encode(Md5::digest(path.as_bytes()))),
        hash_date: Some("2023-05-01 10:00:00".to_string()),
    }
}

pub fn records(paths: &[&str]) -> Vec<FileRecord> {
    paths.iter().map(|p| record(p)).collect()
}

/// `count` ordinary clips named `{prefix}C001.mov`, `{prefix}C002.mov`, ...
pub fn clips(prefix: &str, count: usize) -> Vec<FileRecord> {
    (1..=count)
        .map(|i| record(&format!("{prefix}C{i:03}.mov")))
        .collect()
}

/// ARRI-style frames `{clip}.{n:07}.{ext}`.
pub fn dotted_frames(
    clip: &str,
    ext: &str,
    frames: std::ops::RangeInclusive<u32>,
) -> Vec<FileRecord> {
    frames
        .map(|n| record(&format!("{clip}.{n:07}.{ext}")))
        .collect()
}

/// DNG frames `{clip}R{n:05}.dng`.
pub fn dng_frames(clip: &str, frames: std::ops::RangeInclusive<u32>) -> Vec<FileRecord> {
    frames.map(|n| record(&format!("{clip}R{n:05}.dng"))).collect()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn v1_manifest(records: &[FileRecord]) -> String {
    let mut out = String::from(concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<hashlist version=\"1.1\">\n",
        "  <creatorinfo>\n",
        "    <tool>Silverstack 7.3 (mhl ver 1.1)</tool>\n",
        "  </creatorinfo>\n",
    ));
    for r in records {
        out.push_str("  <hash>\n");
        out.push_str(&format!("    <file>{}</file>\n", escape(&r.path)));
        if let Some(size) = r.size {
            out.push_str(&format!("    <size>{size}</size>\n"));
        }
        if let Some(x) = &r.xxhash64 {
            out.push_str(&format!("    <xxhash64be>{x}</xxhash64be>\n"));
        }
        if let Some(m) = &r.md5 {
            out.push_str(&format!("    <md5>{m}</md5>\n"));
        }
        if let Some(d) = &r.hash_date {
            out.push_str(&format!("    <hashdate>{d}</hashdate>\n"));
        }
        out.push_str("  </hash>\n");
    }
    out.push_str("</hashlist>\n");
    out
}

pub fn v2_manifest(records: &[FileRecord]) -> String {
    let mut out = String::from(concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<hashlist version=\"2.0\" xmlns=\"urn:ASC:MHL:v2.0\">\n",
        "  <creatorinfo>\n",
        "    <tool version=\"4.2\">YoYotta</tool>\n",
        "  </creatorinfo>\n",
        "  <hashes>\n",
    ));
    for r in records {
        out.push_str("    <hash>\n");
        let size = r.size.map(|size| format!(" size=\"{size}\"")).unwrap_or_default();
        out.push_str(&format!("      <path{size}>{}</path>\n", escape(&r.path)));
        if let Some(x) = &r.xxhash64 {
            let date = match &r.hash_date {
                Some(d) => format!(" hashdate=\"{d}\""),
                None => String::new(),
            };
            out.push_str(&format!("      <xxh64 action=\"original\"{date}>{x}</xxh64>\n"));
        }
        if let Some(m) = &r.md5 {
            out.push_str(&format!("      <md5 action=\"original\">{m}</md5>\n"));
        }
        out.push_str("    </hash>\n");
    }
    out.push_str("  </hashes>\n</hashlist>\n");
    out
}
