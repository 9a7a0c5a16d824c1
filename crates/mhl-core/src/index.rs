//! Lookup structures over destination tiers.
//!
//! [`TextIndex`] searches a destination manifest's text directly, starting at
//! the previous hit, because source and destination manifests usually list
//! files in a similar order. [`RecordPool`] indexes parsed records by checksum
//! and path, and hands each record out at most once.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::manifest::{self, Manifest};
use crate::record::{ChecksumKind, FileRecord};

/// Characters kept on each side of a hit when cutting out its hash record
const EXTRACT_RADIUS: usize = 1000;

/// Fraction of the document searched backwards from the cursor before
/// falling back to a scan from the start
const RETRY_WINDOW_DIVISOR: usize = 20;

static HASH_RECORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<(?:[A-Za-z_][\w.-]*:)?hash\b[^>]*>.*?</(?:[A-Za-z_][\w.-]*:)?hash\s*>",
    )
    .unwrap()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]+>").unwrap());

/// Element prefix whose `xmlns:` declaration lies outside an extracted record
static ELEMENT_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(/?)[A-Za-z_][\w.-]*:").unwrap());

static PREFIXED_ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s[A-Za-z_][\w.-]*:[\w.-]+\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap()
});

/// Outcome of a [`TextIndex`] lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(FileRecord),
    Miss,
    /// The path was found but its hash record could not be read.
    Unreadable { reason: String },
}

/// Locality-biased text search over one destination manifest.
#[derive(Debug)]
pub struct TextIndex {
    manifest: Manifest,
    /// Paths of the manifest's records that survived screening
    kept: HashSet<String>,
    text: String,
    cursor: usize,
    retry_window: usize,
    consumed: HashSet<String>,
}

impl TextIndex {
    /// `manifest` is the parsed (and screened) form of `text`.
    pub fn new(manifest: Manifest, text: &str) -> Self {
        let text: String = text.nfc().collect();
        let retry_window = text.len() / RETRY_WINDOW_DIVISOR;
        let kept = manifest.records.iter().map(|r| r.path.clone()).collect();
        Self {
            manifest,
            kept,
            text,
            cursor: 0,
            retry_window,
            consumed: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Find the hash record for `path`.
    ///
    /// Searches forward from the previous hit, then from a window before it,
    /// then from the start of the document. A miss leaves the cursor alone.
    ///
    /// Paths dropped while screening never hit, and a path listed more than
    /// once resolves to its first listing.
    pub fn locate(&mut self, path: &str) -> Lookup {
        if !self.kept.contains(path) || self.consumed.contains(path) {
            return Lookup::Miss;
        }
        let needle = escape_text(path);
        let len = self.text.len();

        let mut hit = self.find_exact(&needle, self.cursor, len);
        if hit.is_none() && self.cursor > 0 {
            let back = self.cursor.saturating_sub(self.retry_window);
            let retry = floor_char_boundary(&self.text, back);
            let until = ceil_char_boundary(&self.text, self.cursor + needle.len());
            hit = self.find_exact(&needle, retry, until);
            if hit.is_none() && retry > 0 {
                hit = self.find_exact(&needle, 0, len);
            }
        }

        let Some(mut pos) = hit else {
            tracing::debug!(manifest = %self.manifest.name, path, "not found");
            return Lookup::Miss;
        };
        if self.manifest.repeated.contains(path) {
            if let Some(first) = self.find_exact(&needle, 0, pos) {
                pos = first;
            }
        }
        self.cursor = pos;

        match self.extract(pos, needle.len(), path) {
            Ok(record) => {
                self.consumed.insert(record.path.clone());
                Lookup::Hit(record)
            }
            Err(reason) => Lookup::Unreadable { reason },
        }
    }

    /// Records of the manifest that no lookup has returned.
    pub fn into_unconsumed(self) -> (String, Vec<FileRecord>) {
        let consumed = self.consumed;
        let records = self
            .manifest
            .records
            .into_iter()
            .filter(|r| !consumed.contains(&r.path))
            .collect();
        (self.manifest.name, records)
    }

    /// First occurrence in `from..until` that is the whole text of an element.
    fn find_exact(&self, needle: &str, from: usize, until: usize) -> Option<usize> {
        let mut start = from;
        while start < until {
            let pos = start + self.text.get(start..until)?.find(needle)?;
            if self.is_element_text(pos, needle.len()) {
                return Some(pos);
            }
            start = pos + needle.len();
        }
        None
    }

    fn is_element_text(&self, pos: usize, len: usize) -> bool {
        self.text[..pos].trim_end().ends_with('>')
            && self.text[pos + len..].trim_start().starts_with('<')
    }

    fn extract(&self, pos: usize, needle_len: usize, path: &str) -> Result<FileRecord, String> {
        let lo = floor_char_boundary(&self.text, pos.saturating_sub(EXTRACT_RADIUS));
        let hi = ceil_char_boundary(&self.text, pos + needle_len + EXTRACT_RADIUS);
        let window = &self.text[lo..hi];
        let (start, end) = (pos - lo, pos - lo + needle_len);

        let found = HASH_RECORD_RE
            .find_iter(window)
            .find(|m| m.start() <= start && end <= m.end())
            .ok_or_else(|| "no enclosing hash record".to_string())?;
        let snippet = unbind_prefixes(found.as_str());
        let doc = roxmltree::Document::parse(&snippet).map_err(|e| e.to_string())?;
        let schema = self.manifest.schema;
        let record = manifest::read_hash(doc.root_element(), schema, &self.manifest.name, 0)
            .map_err(|e| e.to_string())?;

        if record.path != path {
            return Err(format!("enclosing hash record describes {}", record.path));
        }
        Ok(record)
    }
}

/// Strip element prefixes and drop prefixed attributes, whose namespace
/// declarations live on an ancestor outside the extracted record.
fn unbind_prefixes(snippet: &str) -> Cow<'_, str> {
    TAG_RE.replace_all(snippet, |caps: &regex::Captures| {
        let tag = ELEMENT_PREFIX_RE.replace(&caps[0], "<$1");
        PREFIXED_ATTRIBUTE_RE.replace_all(&tag, "").into_owned()
    })
}

fn escape_text(text: &str) -> Cow<'_, str> {
    if text.contains(['&', '<', '>']) {
        Cow::Owned(text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;"))
    } else {
        Cow::Borrowed(text)
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// A record in a [`RecordPool`] together with the manifest it came from.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub manifest: String,
    pub record: FileRecord,
    consumed: bool,
}

/// Parsed records of one tier, each of which can be consumed once.
#[derive(Debug, Default)]
pub struct RecordPool {
    entries: Vec<PoolEntry>,
    by_checksum: HashMap<String, Vec<usize>>,
    by_path: HashMap<String, Vec<usize>>,
}

impl RecordPool {
    pub fn new<I>(manifests: I, kind: ChecksumKind) -> Self
    where
        I: IntoIterator<Item = (String, Vec<FileRecord>)>,
    {
        let mut pool = RecordPool::default();
        for (manifest, records) in manifests {
            for record in records {
                let idx = pool.entries.len();
                if let Some(key) = record.checksum_key(kind) {
                    pool.by_checksum.entry(key).or_default().push(idx);
                }
                pool.by_path.entry(record.path.clone()).or_default().push(idx);
                pool.entries.push(PoolEntry {
                    manifest: manifest.clone(),
                    record,
                    consumed: false,
                });
            }
        }
        pool
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First unconsumed record carrying checksum `key` (lower-case).
    pub fn first_by_checksum(&self, key: &str) -> Option<usize> {
        self.first_available(self.by_checksum.get(key))
    }

    pub fn first_by_path(&self, path: &str) -> Option<usize> {
        self.first_available(self.by_path.get(path))
    }

    fn first_available(&self, candidates: Option<&Vec<usize>>) -> Option<usize> {
        candidates?
            .iter()
            .copied()
            .find(|&idx| !self.entries[idx].consumed)
    }

    /// Mark `idx` consumed and return it.
    pub fn consume(&mut self, idx: usize) -> &PoolEntry {
        let entry = &mut self.entries[idx];
        debug_assert!(!entry.consumed, "{} consumed twice", entry.record.path);
        entry.consumed = true;
        entry
    }

    pub fn unconsumed(&self) -> impl Iterator<Item = &PoolEntry> {
        self.entries.iter().filter(|e| !e.consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn index_for(text: &str) -> TextIndex {
        let manifest = manifest::parse("dest", text).unwrap();
        TextIndex::new(manifest, text)
    }

    #[test]
    fn test_locate_v1_and_v2() {
        let records = fixtures::clips("A001", 5);
        for text in [fixtures::v1_manifest(&records), fixtures::v2_manifest(&records)] {
            let mut index = index_for(&text);
            for r in &records {
                assert_eq!(index.locate(&r.path), Lookup::Hit(r.clone()));
            }
            assert_eq!(index.locate("A001C999.mov"), Lookup::Miss);
        }
    }

    #[test]
    fn test_cursor_follows_hits_and_survives_misses() {
        let records = fixtures::clips("A001", 50);
        let mut index = index_for(&fixtures::v1_manifest(&records));

        assert!(matches!(index.locate(&records[30].path), Lookup::Hit(_)));
        let cursor = index.cursor();
        assert!(cursor > 0);
        assert_eq!(index.locate("B001C001.mov"), Lookup::Miss);
        assert_eq!(index.cursor(), cursor);

        // behind the cursor, outside the retry window
        assert!(matches!(index.locate(&records[0].path), Lookup::Hit(_)));
        assert!(index.cursor() < cursor);
    }

    #[test]
    fn test_out_of_order_lookups_all_hit() {
        let records = fixtures::clips("A001", 200);
        let mut index = index_for(&fixtures::v2_manifest(&records));

        // interleave from both ends so the cursor keeps jumping
        let order: Vec<usize> = (0..100).flat_map(|i| [199 - i, i]).collect();
        for i in order {
            assert_eq!(index.locate(&records[i].path), Lookup::Hit(records[i].clone()));
        }
        let (_, leftover) = index.into_unconsumed();
        assert!(leftover.is_empty());
    }

    #[test]
    fn test_tiny_document() {
        let records = fixtures::records(&["a"]);
        let mut index = index_for(&fixtures::v1_manifest(&records));
        assert_eq!(index.locate("a"), Lookup::Hit(records[0].clone()));
        assert_eq!(index.locate("b"), Lookup::Miss);
    }

    #[test]
    fn test_substring_of_other_path_is_not_a_hit() {
        let records = fixtures::records(&["Card/XA001C001.mov", "Card/A001C001.mov.bak"]);
        let mut index = index_for(&fixtures::v1_manifest(&records));
        assert_eq!(index.locate("A001C001.mov"), Lookup::Miss);
        assert_eq!(index.locate("Card/A001C001.mov"), Lookup::Miss);
    }

    #[test]
    fn test_escaped_path() {
        let records = fixtures::records(&["Day 1 & 2/A001C001.mov"]);
        let mut index = index_for(&fixtures::v1_manifest(&records));
        assert_eq!(index.locate("Day 1 & 2/A001C001.mov"), Lookup::Hit(records[0].clone()));
    }

    #[test]
    fn test_prefixed_record_is_readable() {
        let text = r#"<?xml version="1.0"?>
<ascmhl:hashlist version="2.0" xmlns:ascmhl="urn:ASC:MHL:v2.0">
  <ascmhl:hashes>
    <ascmhl:hash>
      <ascmhl:path size="10">A/B.mov</ascmhl:path>
      <ascmhl:xxh64 action="original">0123456789abcdef</ascmhl:xxh64>
    </ascmhl:hash>
  </ascmhl:hashes>
</ascmhl:hashlist>"#;
        let mut index = index_for(text);
        let Lookup::Hit(record) = index.locate("A/B.mov") else {
            panic!("expected a hit");
        };
        assert_eq!(record.size, Some(10));
        assert_eq!(record.xxhash64.as_deref(), Some("0123456789abcdef"));
    }

    #[test]
    fn test_path_is_handed_out_once() {
        let records = fixtures::clips("A001", 3);
        let mut index = index_for(&fixtures::v1_manifest(&records));
        assert_eq!(index.locate(&records[1].path), Lookup::Hit(records[1].clone()));
        assert_eq!(index.locate(&records[1].path), Lookup::Miss);
    }

    #[test]
    fn test_repeated_path_resolves_to_first_listing() {
        let good = fixtures::record("Card01/A.mov");
        let mut stale = good.clone();
        stale.xxhash64 = Some("ffffffffffffffff".to_string());
        let listed = vec![good.clone(), fixtures::record("Card01/B.mov"), stale];
        let mut index = index_for(&fixtures::v2_manifest(&listed));

        // the cursor now sits past the first listing of A
        assert!(matches!(index.locate("Card01/B.mov"), Lookup::Hit(_)));
        assert_eq!(index.locate("Card01/A.mov"), Lookup::Hit(good));
    }

    #[test]
    fn test_screened_out_path_never_hits() {
        let records = fixtures::records(&["A.mov", "B.mov"]);
        let text = fixtures::v1_manifest(&records);
        let mut manifest = manifest::parse("dest", &text).unwrap();
        manifest.records.retain(|r| r.path != "B.mov");
        let mut index = TextIndex::new(manifest, &text);
        assert_eq!(index.locate("B.mov"), Lookup::Miss);
        assert!(matches!(index.locate("A.mov"), Lookup::Hit(_)));
    }

    #[test]
    fn test_prefixed_attribute_is_ignored() {
        let text = r#"<?xml version="1.0"?>
<hashlist version="2.0" xmlns="urn:ASC:MHL:v2.0"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <hashes>
    <hash xsi:type="file">
      <path size="10" xsi:nil='false'>A/B.mov</path>
      <xxh64 action="original">0123456789abcdef</xxh64>
    </hash>
  </hashes>
</hashlist>"#;
        let mut index = index_for(text);
        let Lookup::Hit(record) = index.locate("A/B.mov") else {
            panic!("expected a hit");
        };
        assert_eq!(record.size, Some(10));
        assert_eq!(record.xxhash64.as_deref(), Some("0123456789abcdef"));
    }

    #[test]
    fn test_broken_record_is_unreadable() {
        let good = fixtures::v1_manifest(&fixtures::records(&["A001C001.mov"]));
        let manifest = manifest::parse("dest", &good).unwrap();
        let broken =
            r#"<hashlist version="1.0"><hash><file>A001C001.mov</file><size>12</hash></hashlist>"#;
        let mut index = TextIndex::new(manifest, broken);
        assert!(matches!(index.locate("A001C001.mov"), Lookup::Unreadable { .. }));
    }

    #[test]
    fn test_into_unconsumed() {
        let records = fixtures::clips("A001", 3);
        let mut index = index_for(&fixtures::v1_manifest(&records));
        assert!(matches!(index.locate(&records[1].path), Lookup::Hit(_)));
        let (name, leftover) = index.into_unconsumed();
        assert_eq!(name, "dest");
        assert_eq!(leftover, vec![records[0].clone(), records[2].clone()]);
    }

    #[test]
    fn test_pool_consumes_once() {
        let mut a = fixtures::record("A.mov");
        let mut b = fixtures::record("B.mov");
        a.xxhash64 = Some("00000000000000AA".to_string());
        b.xxhash64 = Some("00000000000000aa".to_string());
        let mut pool = RecordPool::new([("dest".to_string(), vec![a, b])], ChecksumKind::Xxhash64);

        let first = pool.first_by_checksum("00000000000000aa").unwrap();
        assert_eq!(pool.consume(first).record.path, "A.mov");
        let second = pool.first_by_checksum("00000000000000aa").unwrap();
        assert_eq!(pool.consume(second).record.path, "B.mov");
        assert_eq!(pool.first_by_checksum("00000000000000aa"), None);
        assert_eq!(pool.first_by_path("A.mov"), None);
        assert_eq!(pool.unconsumed().count(), 0);
    }
}
