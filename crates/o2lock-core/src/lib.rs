//! Cluster-wide lock contention engine for OCFS2.
//!
//! Every node of the cluster exposes the live counters of the DLM locks it
//! holds in `/sys/kernel/debug/ocfs2/<lockspace>/locking_state`. This crate
//! samples that file on every node, keeps the two latest samples of every
//! lock, turns them into per-interval contention metrics, merges the same
//! lock across nodes and ranks the hottest locks of the whole cluster.
//!
//! # Pipeline
//!
//! ```text
//! Transport ─▶ Sample ─▶ LockSeries ─▶ LockCluster ─▶ TopNRanking ─▶ Report
//!  (per node)  (parse)   (per node)    (per lock)     (per cycle)
//! ```
//!
//! [`ClusterCoordinator`] runs the pipeline on one thread per node and
//! publishes a [`Report`] per interval to a [`ReportSink`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::mpsc;
//! use o2lock_core::{ClusterCoordinator, FileTransport, MonitorConfig, Shutdown};
//!
//! let config = MonitorConfig::new("7635D31F539A483C8E2F4CC606D5D628");
//! let transports = vec![FileTransport::local(&config.lockspace)];
//! let (tx, rx) = mpsc::sync_channel::<o2lock_core::Report>(1);
//!
//! let printer = std::thread::spawn(move || {
//!     for report in rx {
//!         println!("{}", report.summary);
//!     }
//! });
//!
//! ClusterCoordinator::start(config, transports, tx, Shutdown::new())?
//!     .max_cycles(Some(3))
//!     .run()?;
//! printer.join().unwrap();
//! # Ok::<(), o2lock_core::CoordinatorError>(())
//! ```

pub mod cluster;
pub mod collector;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod ranking;
pub mod report;
pub mod sample;
pub mod series;
pub mod shutdown;
pub mod transport;

pub use cluster::{AcquisitionTally, LockCluster, RenderedCluster, HANG_MARKER};
pub use collector::{CycleLedger, IngestSummary, NodeCollector};
pub use config::MonitorConfig;
pub use coordinator::{ClusterCoordinator, ReportSink};
pub use error::{CoordinatorError, IdentityError, IngestError, ParseError, TransportError};
pub use identity::LockIdentity;
pub use ranking::{Ranked, TopNRanking, DEFAULT_CAPACITY};
pub use report::{LockTypeHistogram, Report};
pub use sample::{LockLevel, Sample};
pub use series::{Freshness, LevelMetrics, LockSeries, TimeUnit};
pub use shutdown::Shutdown;
pub use transport::{FileTransport, SshTransport, Transport};
