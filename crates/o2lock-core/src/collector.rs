//! Per-node lock series and the ingestion step that updates them.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use crate::error::IngestError;
use crate::identity::LockIdentity;
use crate::report::LockTypeHistogram;
use crate::sample::Sample;
use crate::series::{Freshness, LockSeries};

/// What the nodes observed during one cycle.
///
/// Each node fills its own ledger while ingesting and merges it into the
/// coordinator's shared ledger once the batch is done.
#[derive(Debug, Clone, Default)]
pub struct CycleLedger {
    identities: Vec<LockIdentity>,
    lock_types: LockTypeHistogram,
}

impl CycleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, identity: &LockIdentity) {
        self.identities.push(identity.clone());
    }

    pub fn count_active(&mut self, identity: &LockIdentity) {
        self.lock_types.record(identity);
    }

    pub fn merge(&mut self, other: CycleLedger) {
        self.identities.extend(other.identities);
        self.lock_types.merge(&other.lock_types);
    }

    /// Observed identities without duplicates, in first-seen order.
    pub fn unique_identities(&self) -> Vec<LockIdentity> {
        let mut seen = HashSet::with_capacity(self.identities.len());
        self.identities
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect()
    }

    pub fn lock_types(&self) -> &LockTypeHistogram {
        &self.lock_types
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Counts from one ingested batch.
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub lines: usize,
    pub accepted: usize,
    pub malformed: usize,
    pub illegal: usize,
    pub evicted: usize,
    pub ledger: CycleLedger,
}

/// Owns the series of one node.
#[derive(Debug)]
pub struct NodeCollector {
    name: String,
    series: HashMap<LockIdentity, LockSeries>,
    hang_threshold: Duration,
}

impl NodeCollector {
    /// `hang_threshold` is the polling interval.
    pub fn new(name: impl Into<String>, hang_threshold: Duration) -> Self {
        Self {
            name: name.into(),
            series: HashMap::new(),
            hang_threshold,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse and ingest one fetched batch, then age the series that received
    /// nothing.
    pub fn ingest<I, S>(&mut self, lines: I, now: SystemTime) -> Result<IngestSummary, IngestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut summary = IngestSummary::default();

        for line in lines {
            summary.lines += 1;
            let sample = match Sample::parse(line.as_ref(), now, self.hang_threshold) {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::debug!(node = %self.name, error = %e, "discarding record");
                    summary.malformed += 1;
                    continue;
                }
            };
            if !sample.legal() {
                summary.illegal += 1;
                continue;
            }

            let identity = sample.identity().clone();
            match self.series.get_mut(&identity) {
                Some(series) => {
                    series.append(sample)?;
                    if series.key_index() > 0.0 {
                        summary.ledger.count_active(&identity);
                    }
                }
                None => {
                    let mut series = LockSeries::new();
                    series.append(sample)?;
                    self.series.insert(identity.clone(), series);
                }
            }
            summary.ledger.observe(&identity);
            summary.accepted += 1;
        }

        let before = self.series.len();
        self.series
            .retain(|_, series| series.mark_cycle_end() == Freshness::Fresh);
        summary.evicted = before - self.series.len();

        tracing::debug!(
            node = %self.name,
            lines = summary.lines,
            accepted = summary.accepted,
            malformed = summary.malformed,
            evicted = summary.evicted,
            "batch ingested"
        );
        Ok(summary)
    }

    pub fn series(&self, identity: &LockIdentity) -> Option<&LockSeries> {
        self.series.get(identity)
    }

    pub fn identities(&self) -> impl Iterator<Item = &LockIdentity> {
        self.series.keys()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
