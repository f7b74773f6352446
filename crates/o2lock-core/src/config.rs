//! Monitor configuration.

use std::time::Duration;

use crate::ranking::DEFAULT_CAPACITY;
use crate::series::TimeUnit;

/// Default polling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of clusters shown per report.
pub const DEFAULT_DISPLAY_ROWS: usize = 20;

/// Wait before the second report, so the screen fills quickly.
pub const DEFAULT_FIRST_CYCLE_WAIT: Duration = Duration::from_secs(1);

/// Upper bound on one remote fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings consumed by the collectors and the coordinator.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between two reports. Also the hang threshold: a request pending
    /// for longer than one interval is reported as hung.
    pub interval: Duration,

    /// Number of clusters rendered per report.
    pub display_rows: usize,

    /// Inodes at or below this number are filesystem metadata and are hidden
    /// unless `debug` is set.
    pub sys_inode_floor: u64,

    /// Clusters kept by the per-cycle ranking.
    pub ranking_capacity: usize,

    pub debug: bool,

    /// Lockspace id, only displayed.
    pub lockspace: String,

    pub time_unit: TimeUnit,

    pub first_cycle_wait: Duration,

    pub fetch_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            display_rows: DEFAULT_DISPLAY_ROWS,
            sys_inode_floor: 0,
            ranking_capacity: DEFAULT_CAPACITY,
            debug: false,
            lockspace: String::new(),
            time_unit: TimeUnit::default(),
            first_cycle_wait: DEFAULT_FIRST_CYCLE_WAIT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl MonitorConfig {
    pub fn new(lockspace: impl Into<String>) -> Self {
        Self {
            lockspace: lockspace.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn display_rows(mut self, rows: usize) -> Self {
        self.display_rows = rows;
        self
    }

    #[must_use]
    pub fn sys_inode_floor(mut self, floor: u64) -> Self {
        self.sys_inode_floor = floor;
        self
    }

    #[must_use]
    pub fn ranking_capacity(mut self, capacity: usize) -> Self {
        self.ranking_capacity = capacity;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = unit;
        self
    }

    #[must_use]
    pub fn first_cycle_wait(mut self, wait: Duration) -> Self {
        self.first_cycle_wait = wait;
        self
    }

    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}
