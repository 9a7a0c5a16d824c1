//! Arrange match results into report rows.
//!
//! Rows are bucketed by status, then grouped by the manifests they came from.
//! Each group is introduced by a blank row and a header row naming those
//! manifests. Every row has the same width for a given tier layout.

use std::collections::BTreeMap;

use crate::reconcile::{Located, MatchResult, Status, Tier};

const CELLS_PER_TIER: usize = 5;
const CELL_TITLES: [&str; CELLS_PER_TIER] = ["File", "Size", "xxHash", "MD5", "Hash Date"];

/// Which tiers take part in a run, and therefore how wide the rows are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierLayout {
    SourceOnly,
    Destination,
    DestinationAndRestore,
}

impl TierLayout {
    pub fn tiers(self) -> &'static [Tier] {
        match self {
            TierLayout::SourceOnly => &[Tier::Source],
            TierLayout::Destination => &[Tier::Source, Tier::Destination],
            TierLayout::DestinationAndRestore => &[Tier::Source, Tier::Destination, Tier::Restore],
        }
    }

    pub fn width(self) -> usize {
        1 + CELLS_PER_TIER * self.tiers().len()
    }

    pub fn header(self) -> Vec<String> {
        let mut header = vec!["Status".to_string()];
        for tier in self.tiers() {
            header.extend(CELL_TITLES.iter().map(|title| format!("{tier} {title}")));
        }
        header
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportLine {
    /// Separator before a group
    Blank,
    /// Status and the manifest names of the group
    Group(Vec<String>),
    Data(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Report {
    pub layout: TierLayout,
    pub header: Vec<String>,
    pub lines: Vec<ReportLine>,
}

impl Report {
    /// Every line as cells, blanks expanded to the full width.
    pub fn rows(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        let width = self.layout.width();
        self.lines.iter().map(move |line| match line {
            ReportLine::Blank => vec![String::new(); width],
            ReportLine::Group(cells) | ReportLine::Data(cells) => cells.clone(),
        })
    }

    pub fn data_rows(&self) -> impl Iterator<Item = &[String]> {
        self.lines.iter().filter_map(|line| match line {
            ReportLine::Data(cells) => Some(cells.as_slice()),
            _ => None,
        })
    }

    pub fn groups(&self) -> impl Iterator<Item = &[String]> {
        self.lines.iter().filter_map(|line| match line {
            ReportLine::Group(cells) => Some(cells.as_slice()),
            _ => None,
        })
    }
}

type GroupKey<'a> = [Option<&'a str>; 3];

fn located(result: &MatchResult, tier: Tier) -> Option<&Located> {
    match tier {
        Tier::Source => result.source.as_ref(),
        Tier::Destination => result.destination.as_ref(),
        Tier::Restore => result.restore.as_ref(),
    }
}

fn group_key(result: &MatchResult) -> GroupKey<'_> {
    [Tier::Source, Tier::Destination, Tier::Restore]
        .map(|tier| located(result, tier).map(|l| l.manifest.as_str()))
}

/// Path of the most upstream record of a row.
fn primary_path(result: &MatchResult) -> &str {
    [Tier::Source, Tier::Destination, Tier::Restore]
        .into_iter()
        .find_map(|tier| located(result, tier))
        .map_or("", |l| l.record.path.as_str())
}

/// Order results into buckets and manifest groups, ready to be written.
pub fn assemble(results: &[MatchResult], layout: TierLayout) -> Report {
    let mut buckets: BTreeMap<Status, Vec<&MatchResult>> = BTreeMap::new();
    for result in results {
        buckets.entry(result.status).or_default().push(result);
    }

    let mut lines = Vec::new();
    for (status, mut rows) in buckets {
        rows.sort_by(|a, b| (group_key(a), primary_path(a)).cmp(&(group_key(b), primary_path(b))));

        let mut current: Option<GroupKey> = None;
        let mut previous: Option<Vec<String>> = None;
        for result in rows {
            let key = group_key(result);
            if current != Some(key) {
                lines.push(ReportLine::Blank);
                lines.push(ReportLine::Group(group_row(status, key, layout)));
                current = Some(key);
                previous = None;
            }
            let row = data_row(result, layout);
            if previous.as_ref() == Some(&row) {
                continue;
            }
            lines.push(ReportLine::Data(row.clone()));
            previous = Some(row);
        }
    }

    Report {
        layout,
        header: layout.header(),
        lines,
    }
}

fn group_row(status: Status, key: GroupKey, layout: TierLayout) -> Vec<String> {
    let mut row = vec![String::new(); layout.width()];
    row[0] = status.to_string();
    for (i, tier) in layout.tiers().iter().enumerate() {
        let name = match tier {
            Tier::Source => key[0],
            Tier::Destination => key[1],
            Tier::Restore => key[2],
        };
        if let Some(name) = name {
            row[1 + i * CELLS_PER_TIER] = name.to_string();
        }
    }
    row
}

fn data_row(result: &MatchResult, layout: TierLayout) -> Vec<String> {
    let mut row = Vec::with_capacity(layout.width());
    row.push(result.status.to_string());
    for &tier in layout.tiers() {
        match located(result, tier) {
            Some(l) => row.extend(l.record.cells()),
            None => row.extend(std::iter::repeat(String::new()).take(CELLS_PER_TIER)),
        }
    }
    row
}
