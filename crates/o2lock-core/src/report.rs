//! Report text.
//!
//! Every report comes in two variants sharing one header: `summary` has one
//! row per cluster, `detailed` adds the per-node rows under each cluster.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};

use crate::cluster::{AcquisitionTally, LockCluster};
use crate::identity::LockIdentity;
use crate::series::TimeUnit;

const LABEL_WIDTH: usize = 21;
const COLUMN_WIDTH: usize = 12;

/// Lay out one report row: a label column then six value columns.
pub(crate) fn format_row(label: &str, cells: [&str; 6]) -> String {
    let mut row = format!("{label:LABEL_WIDTH$}");
    for cell in cells {
        row.push_str(&format!("{cell:<COLUMN_WIDTH$}"));
    }
    row.trim_end().to_owned()
}

fn title_row(unit: TimeUnit) -> String {
    let ex_time = format!("EX TIME({unit})");
    let ex_avg = format!("EX AVG({unit})");
    let pr_time = format!("PR TIME({unit})");
    let pr_avg = format!("PR AVG({unit})");
    format_row(
        "TYPE/INODE",
        ["EX NUM", &ex_time, &ex_avg, "PR NUM", &pr_time, &pr_avg],
    )
}

/// Per-cycle count of active lock resources by lock type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockTypeHistogram {
    counts: BTreeMap<char, u64>,
}

impl LockTypeHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, identity: &LockIdentity) {
        *self.counts.entry(identity.lock_type()).or_default() += 1;
    }

    pub fn merge(&mut self, other: &LockTypeHistogram) {
        for (&lock_type, &count) in &other.counts {
            *self.counts.entry(lock_type).or_default() += count;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn get(&self, lock_type: char) -> u64 {
        self.counts.get(&lock_type).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// `total N, <type> <count>, ...` with types by descending count.
    pub fn render(&self) -> String {
        let mut by_count: Vec<(char, u64)> = self.counts.iter().map(|(&t, &c)| (t, c)).collect();
        by_count.sort_by(|a, b| b.1.cmp(&a.1));

        let mut line = format!("total {}", self.total());
        for (lock_type, count) in by_count {
            line.push_str(&format!(", {lock_type} {count}"));
        }
        line
    }
}

/// Fixed inputs of one report.
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub lockspace: &'a str,
    pub unit: TimeUnit,
    pub timestamp: DateTime<Local>,
}

/// One rendered cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub cycle: u64,
    pub summary: String,
    pub detailed: String,
    pub tally: AcquisitionTally,
}

impl Report {
    pub fn text(&self, detailed: bool) -> &str {
        if detailed { &self.detailed } else { &self.summary }
    }

    /// Render `clusters` (already ranked) with the cycle's histogram.
    pub fn render(
        cycle: u64,
        clusters: &[&LockCluster<'_>],
        histogram: &LockTypeHistogram,
        ctx: &ReportContext<'_>,
    ) -> Self {
        let mut tally = AcquisitionTally::default();
        let mut summary_rows = String::new();
        let mut detailed_rows = String::new();
        for cluster in clusters {
            let rendered = cluster.render(ctx.unit, &mut tally);
            summary_rows.push('\n');
            summary_rows.push_str(&rendered.summary);
            detailed_rows.push('\n');
            detailed_rows.push_str(&rendered.detailed);
        }

        let header = format!(
            "{} lockspace: {}\nlock acquisitions: total {}, EX {}, PR {}\nlock resources: {}\n\n{}",
            ctx.timestamp.format("%Y-%m-%d %H:%M:%S"),
            ctx.lockspace,
            tally.total(),
            tally.ex,
            tally.pr,
            histogram.render(),
            title_row(ctx.unit),
        );

        Self {
            cycle,
            summary: format!("{header}{summary_rows}"),
            detailed: format!("{header}{detailed_rows}"),
            tally,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(token: &str) -> LockIdentity {
        LockIdentity::decode(token).unwrap()
    }

    #[test]
    fn test_row_layout() {
        let row = format_row("M 5", ["1", "22", "333", "4", "55", "666"]);
        assert_eq!(row.find('1'), Some(LABEL_WIDTH));
        assert_eq!(row.find("22"), Some(LABEL_WIDTH + COLUMN_WIDTH));
        assert!(row.ends_with("666"));
    }

    #[test]
    fn test_title_carries_unit() {
        let title = title_row(TimeUnit::Us);
        assert!(title.starts_with("TYPE/INODE"));
        assert!(title.contains("EX TIME(us)"));
        assert!(title.contains("PR AVG(us)"));
    }

    #[test]
    fn test_histogram_sorted_by_count() {
        let mut histogram = LockTypeHistogram::new();
        assert_eq!(histogram.render(), "total 0");

        histogram.record(&identity("M00000000000000000000056434f530"));
        histogram.record(&identity("W00000000000000000000066434f530"));
        histogram.record(&identity("W00000000000000000000076434f530"));
        assert_eq!(histogram.render(), "total 3, W 2, M 1");

        let mut other = LockTypeHistogram::new();
        other.record(&identity("N00000000000000050000c603"));
        histogram.merge(&other);
        assert_eq!(histogram.total(), 4);
        assert_eq!(histogram.get('N'), 1);
    }

    #[test]
    fn test_empty_report_has_header() {
        let ctx = ReportContext {
            lockspace: "D7B6C0D2A1F94B3C8E5D2F1A0B9C8D7E",
            unit: TimeUnit::Ns,
            timestamp: Local::now(),
        };
        let report = Report::render(3, &[], &LockTypeHistogram::new(), &ctx);

        assert_eq!(report.cycle, 3);
        assert_eq!(report.summary, report.detailed);
        let lines: Vec<&str> = report.summary.lines().collect();
        assert!(lines[0].ends_with("lockspace: D7B6C0D2A1F94B3C8E5D2F1A0B9C8D7E"));
        assert_eq!(lines[1], "lock acquisitions: total 0, EX 0, PR 0");
        assert_eq!(lines[2], "lock resources: total 0");
        assert_eq!(lines[3], "");
        assert!(lines[4].starts_with("TYPE/INODE"));
        assert_eq!(lines.len(), 5);
        assert_eq!(report.text(true), report.detailed);
    }
}
