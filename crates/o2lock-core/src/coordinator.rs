//! Cycle driver.
//!
//! Every node gets a long-lived fetch thread. Each cycle the coordinator
//! opens the node's gate, the fetch thread pulls one batch from its
//! transport and hands it to a short-lived ingestion thread, which reports
//! back on the node's done channel. Once every live node has reported the
//! coordinator builds the clusters, ranks them, renders the report and
//! publishes it. Gates only reopen after the report has been published, so
//! a report never mixes batches from different cycles.
//!
//! ```text
//!  coordinator            fetch thread (per node)      ingestion thread
//!  ───────────            ───────────────────────      ────────────────
//!  open gate ───────────▶ fetch()
//!                         spawn ────────────────────▶ ingest, merge ledger
//!  wait done ◀─────────────────────────────────────── done
//!  rank, render, publish
//!  sleep
//! ```

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime};

use chrono::Local;
use parking_lot::{Mutex, MutexGuard};

use crate::cluster::LockCluster;
use crate::collector::{CycleLedger, NodeCollector};
use crate::config::MonitorConfig;
use crate::error::CoordinatorError;
use crate::ranking::TopNRanking;
use crate::report::{Report, ReportContext};
use crate::shutdown::Shutdown;
use crate::transport::Transport;

/// Consumer of rendered reports.
pub trait ReportSink: Send {
    /// Hand over one report. Returns `false` once the consumer is gone.
    fn publish(&mut self, report: Report) -> bool;
}

impl ReportSink for SyncSender<Report> {
    fn publish(&mut self, report: Report) -> bool {
        self.send(report).is_ok()
    }
}

impl ReportSink for mpsc::Sender<Report> {
    fn publish(&mut self, report: Report) -> bool {
        self.send(report).is_ok()
    }
}

impl ReportSink for Vec<Report> {
    fn publish(&mut self, report: Report) -> bool {
        self.push(report);
        true
    }
}

type Done = Result<usize, CoordinatorError>;

struct NodeHandle {
    name: String,
    collector: Arc<Mutex<NodeCollector>>,
    gate: Option<SyncSender<()>>,
    done: Receiver<Done>,
    fetcher: Option<JoinHandle<()>>,
}

impl NodeHandle {
    fn is_alive(&self) -> bool {
        self.gate.is_some()
    }

    fn retire(&mut self) {
        self.gate = None;
    }
}

/// Owns the node workers and produces one report per cycle.
pub struct ClusterCoordinator<S> {
    config: MonitorConfig,
    nodes: Vec<NodeHandle>,
    ledger: Arc<Mutex<CycleLedger>>,
    sink: S,
    shutdown: Shutdown,
    max_cycles: Option<u64>,
}

impl<S: ReportSink> ClusterCoordinator<S> {
    /// Spawn one fetch thread per transport. Nothing is fetched until
    /// [`run`](Self::run) opens the first cycle.
    pub fn start<T>(
        config: MonitorConfig,
        transports: Vec<T>,
        sink: S,
        shutdown: Shutdown,
    ) -> Result<Self, CoordinatorError>
    where
        T: Transport + 'static,
    {
        if transports.is_empty() {
            return Err(CoordinatorError::NoNodes);
        }

        let ledger = Arc::new(Mutex::new(CycleLedger::new()));
        let mut coordinator = Self {
            config,
            nodes: Vec::with_capacity(transports.len()),
            ledger,
            sink,
            shutdown,
            max_cycles: None,
        };

        for transport in transports {
            let name = transport.label().to_owned();
            if coordinator.nodes.iter().any(|n| n.name == name) {
                return Err(CoordinatorError::DuplicateNode(name));
            }
            let node = spawn_node(transport, &coordinator.config, &coordinator.ledger)?;
            coordinator.nodes.push(node);
        }

        tracing::info!(
            nodes = coordinator.nodes.len(),
            interval_ms = coordinator.config.interval.as_millis(),
            "coordinator started"
        );
        Ok(coordinator)
    }

    /// Stop after `cycles` reports. `None` runs until shutdown.
    #[must_use]
    pub fn max_cycles(mut self, cycles: Option<u64>) -> Self {
        self.max_cycles = cycles;
        self
    }

    /// Drive cycles until shutdown, the cycle limit, or the sink going away.
    /// Returns the number of reports published.
    pub fn run(mut self) -> Result<u64, CoordinatorError> {
        let result = self.run_cycles();
        self.stop();
        result
    }

    fn run_cycles(&mut self) -> Result<u64, CoordinatorError> {
        let mut published = 0u64;

        loop {
            let started = Instant::now();
            self.open_gates();
            self.await_nodes()?;

            let cycle = published + 1;
            let report = self.build_report(cycle);
            if !self.sink.publish(report) {
                tracing::info!("report consumer closed");
                break;
            }
            published = cycle;

            tracing::trace!(
                cycle,
                elapsed_ms = started.elapsed().as_millis(),
                "cycle complete"
            );

            if self.shutdown.is_requested() {
                break;
            }
            if self.max_cycles.is_some_and(|max| published >= max) {
                break;
            }

            let budget = if cycle == 1 {
                self.config.first_cycle_wait
            } else {
                self.config.interval
            };
            if self.shutdown.wait_timeout(budget.saturating_sub(started.elapsed())) {
                break;
            }
        }

        Ok(published)
    }

    fn open_gates(&mut self) {
        for node in &mut self.nodes {
            let Some(gate) = &node.gate else { continue };
            if gate.send(()).is_err() {
                tracing::error!(node = %node.name, "fetch worker exited");
                node.retire();
            }
        }
    }

    /// Barrier: wait until every live node finished ingesting this cycle.
    fn await_nodes(&mut self) -> Result<(), CoordinatorError> {
        for node in self.nodes.iter_mut().filter(|n| n.is_alive()) {
            match node.done.recv() {
                Ok(Ok(accepted)) => {
                    tracing::trace!(node = %node.name, accepted, "node ready");
                }
                Ok(Err(e)) => {
                    tracing::error!(node = %node.name, error = %e, "node stopped");
                    node.retire();
                }
                Err(_) => {
                    tracing::error!(node = %node.name, "ingestion worker vanished");
                    node.retire();
                }
            }
        }

        if self.nodes.iter().any(NodeHandle::is_alive) {
            Ok(())
        } else {
            Err(CoordinatorError::AllNodesLost)
        }
    }

    fn build_report(&self, cycle: u64) -> Report {
        let ledger = std::mem::take(&mut *self.ledger.lock());
        let collectors: Vec<MutexGuard<'_, NodeCollector>> = self
            .nodes
            .iter()
            .filter(|n| n.is_alive())
            .map(|n| n.collector.lock())
            .collect();

        let mut ranking = TopNRanking::new(self.config.ranking_capacity);
        for identity in ledger.unique_identities() {
            let mut cluster = LockCluster::new(identity);
            let mut complete = true;
            for collector in &collectors {
                let Some(series) = collector.series(cluster.identity()) else {
                    continue;
                };
                if let Err(e) = cluster.append(collector.name(), series) {
                    tracing::error!(error = %e, "skipping cluster");
                    complete = false;
                    break;
                }
            }
            if complete {
                ranking.insert(cluster);
            }
        }

        let top = ranking.top(
            self.config.display_rows,
            self.config.sys_inode_floor,
            self.config.debug,
        );
        let ctx = ReportContext {
            lockspace: &self.config.lockspace,
            unit: self.config.time_unit,
            timestamp: Local::now(),
        };
        Report::render(cycle, &top, ledger.lock_types(), &ctx)
    }

    fn stop(&mut self) {
        for node in &mut self.nodes {
            node.retire();
        }
        for node in &mut self.nodes {
            if let Some(fetcher) = node.fetcher.take()
                && fetcher.join().is_err()
            {
                tracing::error!(node = %node.name, "fetch worker panicked");
            }
        }
        tracing::info!("coordinator stopped");
    }
}

fn spawn_node<T>(
    mut transport: T,
    config: &MonitorConfig,
    ledger: &Arc<Mutex<CycleLedger>>,
) -> Result<NodeHandle, CoordinatorError>
where
    T: Transport + 'static,
{
    let name = transport.label().to_owned();
    let collector = Arc::new(Mutex::new(NodeCollector::new(name.clone(), config.interval)));
    let (gate_tx, gate_rx) = mpsc::sync_channel::<()>(1);
    let (done_tx, done_rx) = mpsc::channel::<Done>();

    let spawn_name = name.clone();
    let fetcher = {
        let name = name.clone();
        let collector = Arc::clone(&collector);
        let ledger = Arc::clone(ledger);
        thread::Builder::new()
            .name(format!("fetch-{name}"))
            .spawn(move || {
                while gate_rx.recv().is_ok() {
                    let lines = transport.fetch();
                    let now = SystemTime::now();
                    if lines.is_empty() {
                        tracing::debug!(node = %name, "empty batch");
                    }

                    let worker = {
                        let name = name.clone();
                        let collector = Arc::clone(&collector);
                        let ledger = Arc::clone(&ledger);
                        let done = done_tx.clone();
                        move || {
                            let result = ingest_batch(&name, &collector, &ledger, lines, now);
                            if done.send(result).is_err() {
                                tracing::debug!(node = %name, "coordinator gone, batch dropped");
                            }
                        }
                    };
                    if let Err(source) = thread::Builder::new()
                        .name(format!("ingest-{name}"))
                        .spawn(worker)
                    {
                        let failure = Err(CoordinatorError::Spawn {
                            node: name.clone(),
                            source,
                        });
                        if done_tx.send(failure).is_err() {
                            tracing::debug!(node = %name, "coordinator gone, spawn failure dropped");
                        }
                    }
                }
            })
            .map_err(|source| CoordinatorError::Spawn {
                node: spawn_name,
                source,
            })?
    };

    Ok(NodeHandle {
        name,
        collector,
        gate: Some(gate_tx),
        done: done_rx,
        fetcher: Some(fetcher),
    })
}

fn ingest_batch(
    name: &str,
    collector: &Mutex<NodeCollector>,
    ledger: &Mutex<CycleLedger>,
    lines: Vec<String>,
    now: SystemTime,
) -> Done {
    let summary = collector
        .lock()
        .ingest(lines, now)
        .map_err(|source| CoordinatorError::Ingest {
            node: name.to_owned(),
            source,
        })?;
    ledger.lock().merge(summary.ledger);
    Ok(summary.accepted)
}
