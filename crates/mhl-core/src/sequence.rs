//! Collapse runs of image-sequence frames into one synthetic record per clip.
//!
//! A clip recorded as `.ari`, `.arx` or numbered `.dng` frames shows up in a
//! manifest as one hash record per frame. Consecutive frames sharing a clip key
//! are folded into a single record whose checksum is a digest of the frame
//! checksums, fed in file order.

use std::sync::LazyLock;

use md5::{Digest, Md5};
use regex::Regex;
use xxhash_rust::xxh64::Xxh64;

use crate::record::FileRecord;

static DNG_FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[a-z](\d{5})\.dng$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("cannot total the size of {clip}: frame {frame} has no size")]
    MissingSize { clip: String, frame: String },
    #[error("total size of {clip} overflows")]
    SizeOverflow { clip: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStyle {
    /// `CLIP.0000001.ari`
    Dotted,
    /// `CLIP_R00001.dng`
    Dng,
}

/// A path recognised as one frame of an image sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Path with the frame number and extension removed
    pub clip: &'a str,
    /// Frame number digits as written
    pub number: &'a str,
    /// Extension without the dot, case preserved
    pub extension: &'a str,
    style: FrameStyle,
}

impl Frame<'_> {
    fn group_key(&self) -> (String, String) {
        (self.clip.to_string(), self.extension.to_ascii_lowercase())
    }
}

/// Recognise `path` as a sequence frame.
pub fn frame_of(path: &str) -> Option<Frame<'_>> {
    let (stem, extension) = path.rsplit_once('.')?;
    match extension.to_ascii_lowercase().as_str() {
        "ari" | "arx" => {
            let (clip, number) = stem.rsplit_once('.')?;
            if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            Some(Frame {
                clip,
                number,
                extension,
                style: FrameStyle::Dotted,
            })
        }
        "dng" => {
            let digits = DNG_FRAME_RE.captures(path)?.get(1)?;
            Some(Frame {
                clip: &path[..digits.start()],
                number: digits.as_str(),
                extension,
                style: FrameStyle::Dng,
            })
        }
        _ => None,
    }
}

/// An entry of an aggregated sequence: either an ordinary record (no frames)
/// or a synthetic clip record together with the frames it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregated {
    pub record: FileRecord,
    pub frames: Vec<FileRecord>,
}

impl Aggregated {
    pub fn single(record: FileRecord) -> Self {
        Self {
            record,
            frames: Vec::new(),
        }
    }

    pub fn is_clip(&self) -> bool {
        !self.frames.is_empty()
    }
}

/// Fold frame runs into synthetic records, keeping everything else in place.
pub fn aggregate(records: Vec<FileRecord>) -> Result<Vec<FileRecord>, AggregateError> {
    Ok(aggregate_clips(records)?
        .into_iter()
        .map(|entry| entry.record)
        .collect())
}

/// Like [`aggregate`], but every clip keeps its member frames.
pub fn aggregate_clips(records: Vec<FileRecord>) -> Result<Vec<Aggregated>, AggregateError> {
    let mut out = Vec::with_capacity(records.len());
    let mut group: Vec<FileRecord> = Vec::new();
    let mut group_key: Option<(String, String)> = None;

    for record in records {
        let key = frame_of(&record.path).map(|f| f.group_key());
        if !group.is_empty() && key != group_key {
            out.push(close_group(std::mem::take(&mut group))?);
        }
        match key {
            Some(key) => {
                group_key = Some(key);
                group.push(record);
            }
            None => {
                group_key = None;
                out.push(Aggregated::single(record));
            }
        }
    }
    if !group.is_empty() {
        out.push(close_group(group)?);
    }

    Ok(out)
}

fn close_group(frames: Vec<FileRecord>) -> Result<Aggregated, AggregateError> {
    let record = fold_frames(&frames)?;
    Ok(Aggregated { record, frames })
}

/// Combine frames into one record: sizes summed, checksums digested in order,
/// hash date taken from the last frame.
pub fn fold_frames(frames: &[FileRecord]) -> Result<FileRecord, AggregateError> {
    let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
        return Ok(FileRecord::new(String::new()));
    };
    let path = clip_name(&first.path, &last.path);

    let mut size: u64 = 0;
    let mut xxh = Xxh64::new(0);
    let mut md5 = Md5::new();
    let mut has_xxhash = true;
    let mut has_md5 = true;

    for frame in frames {
        let frame_size = frame.size.ok_or_else(|| AggregateError::MissingSize {
            clip: path.clone(),
            frame: frame.path.clone(),
        })?;
        size = size
            .checked_add(frame_size)
            .ok_or_else(|| AggregateError::SizeOverflow { clip: path.clone() })?;

        match &frame.xxhash64 {
            Some(x) => xxh.update(x.to_ascii_lowercase().as_bytes()),
            None => has_xxhash = false,
        }
        match &frame.md5 {
            Some(m) => md5.update(m.to_ascii_lowercase().as_bytes()),
            None => has_md5 = false,
        }
    }

    Ok(FileRecord {
        path,
        size: Some(size),
        xxhash64: has_xxhash.then(|| format!("{:016x}", xxh.digest())),
        md5: has_md5.then(|| hex::encode(md5.finalize())),
        hash_date: last.hash_date.clone(),
    })
}

/// `CLIP.0000001-0000240.ari` or `CLIP_R00001-00240.dng`.
fn clip_name(first: &str, last: &str) -> String {
    let (Some(first), Some(last)) = (frame_of(first), frame_of(last)) else {
        return first.to_string();
    };
    let separator = match first.style {
        FrameStyle::Dotted => ".",
        FrameStyle::Dng => "",
    };
    format!(
        "{}{separator}{}-{}.{}",
        first.clip, first.number, last.number, first.extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use xxhash_rust::xxh64::xxh64;

    #[test]
    fn test_frame_of() {
        let f = frame_of("Card/A001C001_230501_R1AB.0000123.ari").unwrap();
        assert_eq!(f.clip, "Card/A001C001_230501_R1AB");
        assert_eq!(f.number, "0000123");
        assert_eq!(f.extension, "ari");

        let f = frame_of("Card/B002C004_R00017.DNG").unwrap();
        assert_eq!(f.clip, "Card/B002C004_R");
        assert_eq!(f.number, "00017");

        assert!(frame_of("Card/A001C001.ari").is_none());
        assert!(frame_of("Card/A001C001.take2.ari").is_none());
        assert!(frame_of("Card/A001C001.mov").is_none());
        assert!(frame_of("Card/clip_0017.dng").is_none());
    }

    #[test]
    fn test_dotted_clips_collapse() {
        let mut records = fixtures::dotted_frames("A001C001", "ari", 1..=10);
        records.extend(fixtures::dotted_frames("A001C002", "ari", 1..=10));
        let expected_size: u64 = records[..10].iter().map(|r| r.size.unwrap()).sum();

        let out = aggregate(records).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path, "A001C001.0000001-0000010.ari");
        assert_eq!(out[1].path, "A001C002.0000001-0000010.ari");
        assert_eq!(out[0].size, Some(expected_size));
    }

    #[test]
    fn test_dng_clip_name() {
        let out = aggregate(fixtures::dng_frames("Card/B002C004_", 1..=20)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "Card/B002C004_R00001-00020.dng");
    }

    #[test]
    fn test_ordinary_records_keep_their_place() {
        let mut records = fixtures::records(&["A.mov"]);
        records.extend(fixtures::dotted_frames("B", "arx", 1..=3));
        records.extend(fixtures::records(&["C.wav"]));
        let out = aggregate(records.clone()).unwrap();
        let paths: Vec<_> = out.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["A.mov", "B.0000001-0000003.arx", "C.wav"]);
        assert_eq!(out[0], records[0]);
        assert_eq!(out[2], records[4]);
    }

    #[test]
    fn test_checksum_is_digest_of_lowercase_checksums() {
        let mut a = FileRecord::new("S.0000001.ari");
        a.size = Some(1);
        a.xxhash64 = Some("ABCDEF0123456789".to_string());
        a.md5 = Some("D41D8CD98F00B204E9800998ECF8427E".to_string());
        let mut b = FileRecord::new("S.0000002.ari");
        b.size = Some(2);
        b.xxhash64 = Some("0011223344556677".to_string());
        b.md5 = Some("0cc175b9c0f1b6a831c399e269772661".to_string());
        b.hash_date = Some("2023-05-01".to_string());

        let folded = fold_frames(&[a, b]).unwrap();
        let expected = xxh64(b"abcdef01234567890011223344556677", 0);
        assert_eq!(folded.xxhash64, Some(format!("{:016x}", expected)));
        assert_eq!(folded.md5.as_deref(), Some("8b2ebdea48beed0a3621a0be3c850207"));
        assert_eq!(folded.size, Some(3));
        assert_eq!(folded.hash_date.as_deref(), Some("2023-05-01"));
    }

    #[test]
    fn test_frame_order_changes_digest() {
        let ordered = fixtures::dotted_frames("A001C001", "ari", 1..=5);
        let mut swapped = ordered.clone();
        swapped.swap(1, 3);

        let a = aggregate(ordered).unwrap();
        let b = aggregate(swapped).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_ne!(a[0].xxhash64, b[0].xxhash64);
        assert_ne!(a[0].md5, b[0].md5);
        assert_eq!(a[0].size, b[0].size);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let mut records = fixtures::dotted_frames("A001C001", "ari", 1..=4);
        records.extend(fixtures::records(&["A001C002.mov"]));
        records.extend(fixtures::dng_frames("B001C001_", 1..=4));
        records.extend(fixtures::dotted_frames("A001C003", "arx", 7..=7));

        let once = aggregate(records).unwrap();
        let twice = aggregate(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_trailing_single_frame_forms_its_own_clip() {
        let mut records = fixtures::dotted_frames("A001C001", "ari", 1..=3);
        records.extend(fixtures::dotted_frames("A001C002", "ari", 9..=9));
        let out = aggregate_clips(records).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].frames.len(), 3);
        assert_eq!(out[1].record.path, "A001C002.0000009-0000009.ari");
        assert_eq!(out[1].frames.len(), 1);
    }

    #[test]
    fn test_extension_change_closes_group() {
        let mut records = fixtures::dotted_frames("A001C001", "ari", 1..=2);
        records.extend(fixtures::dotted_frames("A001C001", "arx", 3..=4));
        assert_eq!(aggregate(records).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_size_is_an_error() {
        let mut records = fixtures::dotted_frames("A001C001", "ari", 1..=3);
        records[1].size = None;
        assert!(matches!(
            aggregate(records),
            Err(AggregateError::MissingSize { .. })
        ));
    }

    #[test]
    fn test_missing_checksum_leaves_aggregate_without_it() {
        let mut records = fixtures::dotted_frames("A001C001", "ari", 1..=3);
        records[2].md5 = None;
        let out = aggregate(records).unwrap();
        assert!(out[0].xxhash64.is_some());
        assert_eq!(out[0].md5, None);
    }
}
