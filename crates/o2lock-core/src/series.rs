//! Per-node rolling history of one lock.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::IngestError;
use crate::identity::LockIdentity;
use crate::sample::{LockLevel, Sample};

/// Unit used when scaling raw nanosecond counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Ns,
    Us,
    Ms,
}

impl TimeUnit {
    /// Divisor applied to raw nanosecond counters.
    pub fn ratio(self) -> u64 {
        match self {
            TimeUnit::Ns => 1,
            TimeUnit::Us => 1_000,
            TimeUnit::Ms => 1_000_000,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ns" => Ok(TimeUnit::Ns),
            "us" => Ok(TimeUnit::Us),
            "ms" => Ok(TimeUnit::Ms),
            other => Err(format!("unknown time unit {other:?}, expected ns, us or ms")),
        }
    }
}

/// Contention observed for one lock level between the two latest samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LevelMetrics {
    /// No usable delta: fewer than two samples, or nothing happened.
    Idle,
    /// `time` and `count` are deltas; `average` is `time / count`, truncated.
    Active { time: u64, count: u64, average: u64 },
    /// The newest sample shows a request pending longer than the interval.
    Hung { count: u64, waited: f64 },
}

impl LevelMetrics {
    /// Total time, `+inf` when hung.
    pub fn time(&self) -> f64 {
        match *self {
            LevelMetrics::Idle => 0.0,
            LevelMetrics::Active { time, .. } => time as f64,
            LevelMetrics::Hung { .. } => f64::INFINITY,
        }
    }

    pub fn count(&self) -> u64 {
        match *self {
            LevelMetrics::Idle => 0,
            LevelMetrics::Active { count, .. } | LevelMetrics::Hung { count, .. } => count,
        }
    }

    /// Per-request latency, `+inf` when hung.
    pub fn average(&self) -> f64 {
        match *self {
            LevelMetrics::Idle => 0.0,
            LevelMetrics::Active { average, .. } => average as f64,
            LevelMetrics::Hung { .. } => f64::INFINITY,
        }
    }

    pub fn is_hung(&self) -> bool {
        matches!(self, LevelMetrics::Hung { .. })
    }

    /// Seconds waited by the pending request, if hung.
    pub fn waited(&self) -> Option<f64> {
        match *self {
            LevelMetrics::Hung { waited, .. } => Some(waited),
            _ => None,
        }
    }
}

/// Result of the end-of-cycle freshness step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Two-slot history of one lock on one node.
///
/// The identity is fixed by the first sample appended; every later sample
/// must carry the same identity.
#[derive(Debug, Clone, Default)]
pub struct LockSeries {
    identity: Option<LockIdentity>,
    oldest: Option<Sample>,
    newest: Option<Sample>,
    fresh: i8,
    touched: bool,
}

impl LockSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a sample received this cycle.
    pub fn append(&mut self, sample: Sample) -> Result<(), IngestError> {
        match &self.identity {
            Some(expected) if expected != sample.identity() => {
                return Err(IngestError::IdentityMismatch {
                    expected: expected.clone(),
                    found: sample.identity().clone(),
                });
            }
            Some(_) => {}
            None => self.identity = Some(sample.identity().clone()),
        }

        self.fresh = 1;
        self.touched = true;
        self.push(sample);
        Ok(())
    }

    fn push(&mut self, sample: Sample) {
        self.oldest = self.newest.replace(sample);
    }

    /// Empty both slots. The identity is kept.
    pub fn reset(&mut self) {
        self.oldest = None;
        self.newest = None;
    }

    /// Age the series once the cycle's batch has been ingested.
    ///
    /// A series that received data this cycle only has its touched flag
    /// cleared. Otherwise freshness decrements; while still fresh the newest
    /// sample is repeated so the next delta is zero, and once stale both slots
    /// are emptied.
    pub fn mark_cycle_end(&mut self) -> Freshness {
        if std::mem::take(&mut self.touched) {
            return Freshness::Fresh;
        }

        self.fresh = if self.fresh > 0 { self.fresh - 1 } else { -1 };
        match self.newest.clone() {
            Some(newest) if self.is_fresh() => {
                self.push(newest);
                Freshness::Fresh
            }
            _ => {
                self.reset();
                Freshness::Stale
            }
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh >= 0
    }

    pub fn identity(&self) -> Option<&LockIdentity> {
        self.identity.as_ref()
    }

    pub fn newest(&self) -> Option<&Sample> {
        self.newest.as_ref()
    }

    pub fn sample_count(&self) -> usize {
        usize::from(self.oldest.is_some()) + usize::from(self.newest.is_some())
    }

    /// Contention for `level` between the two latest samples.
    ///
    /// A negative delta on either counter means it was reset, so the newest
    /// sample's raw values are used instead.
    pub fn metrics(&self, level: LockLevel, unit: TimeUnit) -> LevelMetrics {
        let (Some(oldest), Some(newest)) = (&self.oldest, &self.newest) else {
            return LevelMetrics::Idle;
        };

        let new_count = newest.total_count(level);
        let old_count = oldest.total_count(level);

        let Some(new_time) = newest.total_time(level) else {
            return LevelMetrics::Hung {
                count: new_count.checked_sub(old_count).unwrap_or(new_count),
                waited: newest.hang_duration(level).unwrap_or_default(),
            };
        };

        let deltas = oldest.total_time(level).and_then(|old_time| {
            Some((
                new_time.checked_sub(old_time)?,
                new_count.checked_sub(old_count)?,
            ))
        });
        let (raw_time, count) = deltas.unwrap_or((new_time, new_count));
        let time = raw_time / unit.ratio();

        if time != 0 && count != 0 {
            LevelMetrics::Active {
                time,
                count,
                average: time / count,
            }
        } else {
            LevelMetrics::Idle
        }
    }

    /// Hotness: mean of the PR and EX per-request latency in nanoseconds,
    /// infinite when either level is hung.
    pub fn key_index(&self) -> f64 {
        let pr = self.metrics(LockLevel::Pr, TimeUnit::Ns);
        let ex = self.metrics(LockLevel::Ex, TimeUnit::Ns);
        if pr.is_hung() || ex.is_hung() {
            return f64::INFINITY;
        }
        (pr.average() + ex.average()) / 2.0
    }
}
