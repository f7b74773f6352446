//! Cluster-wide view of one lock.
//!
//! A [`LockCluster`] borrows the series every node holds for the same
//! identity and is rebuilt from scratch each report cycle.

use crate::error::IngestError;
use crate::identity::LockIdentity;
use crate::report::format_row;
use crate::sample::LockLevel;
use crate::series::{LevelMetrics, LockSeries, TimeUnit};

/// Marker appended to values of a hung level.
pub const HANG_MARKER: &str = "(hang)";

const BRANCH: &str = "├─";
const LAST_BRANCH: &str = "└─";

/// Acquisitions counted while rendering one report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionTally {
    pub ex: u64,
    pub pr: u64,
}

impl AcquisitionTally {
    pub fn total(&self) -> u64 {
        self.ex + self.pr
    }

    fn add(&mut self, level: LockLevel, count: u64) {
        match level {
            LockLevel::Ex => self.ex += count,
            LockLevel::Pr => self.pr += count,
        }
    }
}

/// Sum of one level's metrics across the nodes of a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelAggregate {
    pub count: u64,
    /// Summed time of the members that are not hung.
    pub time: u64,
    /// Summed hang durations, present when any member is hung.
    pub hang: Option<f64>,
}

impl LevelAggregate {
    fn add(&mut self, metrics: &LevelMetrics) {
        self.count += metrics.count();
        match *metrics {
            LevelMetrics::Active { time, .. } => self.time += time,
            LevelMetrics::Hung { waited, .. } => {
                *self.hang.get_or_insert(0.0) += waited;
            }
            LevelMetrics::Idle => {}
        }
    }

    pub fn is_hung(&self) -> bool {
        self.hang.is_some()
    }

    pub fn average(&self) -> u64 {
        self.time.checked_div(self.count).unwrap_or(0)
    }

    fn cells(&self) -> [String; 3] {
        match self.hang {
            Some(waited) => hung_cells(self.count, waited),
            None => [
                self.count.to_string(),
                self.time.to_string(),
                self.average().to_string(),
            ],
        }
    }
}

/// Per-level totals of a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClusterAggregate {
    pub ex: LevelAggregate,
    pub pr: LevelAggregate,
}

/// Text produced for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCluster {
    pub summary: String,
    /// Summary row followed by one row per active node.
    pub detailed: String,
}

/// Same-identity series gathered from every node.
#[derive(Debug, Clone)]
pub struct LockCluster<'a> {
    identity: LockIdentity,
    members: Vec<(&'a str, &'a LockSeries)>,
}

impl<'a> LockCluster<'a> {
    pub fn new(identity: LockIdentity) -> Self {
        Self {
            identity,
            members: Vec::new(),
        }
    }

    /// Add `node`'s series. Each node contributes at most once.
    pub fn append(&mut self, node: &'a str, series: &'a LockSeries) -> Result<(), IngestError> {
        if let Some(found) = series.identity()
            && found != &self.identity
        {
            return Err(IngestError::IdentityMismatch {
                expected: self.identity.clone(),
                found: found.clone(),
            });
        }
        if self.members.iter().any(|(name, _)| *name == node) {
            return Err(IngestError::DuplicateNode {
                node: node.to_owned(),
                identity: self.identity.clone(),
            });
        }
        self.members.push((node, series));
        Ok(())
    }

    pub fn identity(&self) -> &LockIdentity {
        &self.identity
    }

    pub fn inode(&self) -> u64 {
        self.identity.inode()
    }

    pub fn node_count(&self) -> usize {
        self.members.len()
    }

    /// Sum of the members' key indexes.
    pub fn key_index(&self) -> f64 {
        self.members.iter().map(|(_, series)| series.key_index()).sum()
    }

    /// Per-level totals across members. Counts are added to `tally`.
    pub fn aggregate(&self, unit: TimeUnit, tally: &mut AcquisitionTally) -> ClusterAggregate {
        let mut aggregate = ClusterAggregate::default();
        for (_, series) in &self.members {
            for level in LockLevel::ALL {
                let metrics = series.metrics(level, unit);
                tally.add(level, metrics.count());
                match level {
                    LockLevel::Ex => aggregate.ex.add(&metrics),
                    LockLevel::Pr => aggregate.pr.add(&metrics),
                }
            }
        }
        aggregate
    }

    /// Summary row and detailed block. Counts are added to `tally`.
    pub fn render(&self, unit: TimeUnit, tally: &mut AcquisitionTally) -> RenderedCluster {
        let aggregate = self.aggregate(unit, tally);
        let [ex_num, ex_time, ex_avg] = aggregate.ex.cells();
        let [pr_num, pr_time, pr_avg] = aggregate.pr.cells();
        let summary = format_row(
            &self.identity.short_label(),
            [&ex_num, &ex_time, &ex_avg, &pr_num, &pr_time, &pr_avg],
        );

        let active: Vec<_> = self
            .members
            .iter()
            .filter_map(|(node, series)| {
                let ex = series.metrics(LockLevel::Ex, unit);
                let pr = series.metrics(LockLevel::Pr, unit);
                let idle = ex.count() == 0 && pr.count() == 0 && !ex.is_hung() && !pr.is_hung();
                (!idle).then_some((*node, ex, pr))
            })
            .collect();

        let mut detailed = summary.clone();
        for (i, (node, ex, pr)) in active.iter().enumerate() {
            let branch = if i + 1 == active.len() { LAST_BRANCH } else { BRANCH };
            let [ex_num, ex_time, ex_avg] = metric_cells(ex);
            let [pr_num, pr_time, pr_avg] = metric_cells(pr);
            detailed.push('\n');
            detailed.push_str(&format_row(
                &format!("{branch}{node}"),
                [&ex_num, &ex_time, &ex_avg, &pr_num, &pr_time, &pr_avg],
            ));
        }

        RenderedCluster { summary, detailed }
    }
}

fn metric_cells(metrics: &LevelMetrics) -> [String; 3] {
    match *metrics {
        LevelMetrics::Idle => ["0".into(), "0".into(), "0".into()],
        LevelMetrics::Active {
            time,
            count,
            average,
        } => [count.to_string(), time.to_string(), average.to_string()],
        LevelMetrics::Hung { count, waited } => hung_cells(count, waited),
    }
}

fn hung_cells(count: u64, waited: f64) -> [String; 3] {
    [
        count.to_string(),
        format!("{waited:.0}{HANG_MARKER}"),
        HANG_MARKER.to_owned(),
    ]
}
