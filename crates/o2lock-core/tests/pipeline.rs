//! Collector → cluster → ranking → report, without threads.

mod common;

use std::time::{Duration, SystemTime};

use chrono::Local;
use common::{lock_line, LockCounters};
use o2lock_core::report::ReportContext;
use o2lock_core::{
    AcquisitionTally, CycleLedger, LockCluster, LockIdentity, NodeCollector, Report, TimeUnit,
    TopNRanking,
};

const HOT: &str = "M000000000000000000271561bea619";
const WARM: &str = "W00000000000000000027166434f530";
const SYSTEM: &str = "M00000000000000000000056434f530";

fn ingest_all(nodes: &mut [NodeCollector], batches: &[Vec<String>]) -> CycleLedger {
    let mut ledger = CycleLedger::new();
    for (node, batch) in nodes.iter_mut().zip(batches) {
        let summary = node.ingest(batch.clone(), SystemTime::now()).unwrap();
        ledger.merge(summary.ledger);
    }
    ledger
}

fn two_nodes() -> Vec<NodeCollector> {
    vec![
        NodeCollector::new("alpha", Duration::from_secs(5)),
        NodeCollector::new("beta", Duration::from_secs(5)),
    ]
}

#[test]
fn test_cluster_totals_are_sum_of_node_deltas() {
    let mut nodes = two_nodes();
    ingest_all(
        &mut nodes,
        &[
            vec![lock_line(HOT, LockCounters::new(10, 1_000, 5, 500))],
            vec![lock_line(HOT, LockCounters::new(0, 0, 0, 0))],
        ],
    );
    let ledger = ingest_all(
        &mut nodes,
        &[
            vec![lock_line(HOT, LockCounters::new(20, 2_000, 15, 1_500))],
            vec![lock_line(HOT, LockCounters::new(4, 400, 6, 600))],
        ],
    );

    let ids = ledger.unique_identities();
    assert_eq!(ids.len(), 1);
    let mut cluster = LockCluster::new(ids[0].clone());
    for node in &nodes {
        cluster.append(node.name(), node.series(&ids[0]).unwrap()).unwrap();
    }

    let mut tally = AcquisitionTally::default();
    let aggregate = cluster.aggregate(TimeUnit::Ns, &mut tally);
    assert_eq!(aggregate.ex.count, 16);
    assert_eq!(aggregate.ex.time, 1_600);
    assert_eq!(aggregate.pr.count, 14);
    assert_eq!(aggregate.pr.time, 1_400);
    assert_eq!(tally, AcquisitionTally { ex: 16, pr: 14 });

    let rendered = cluster.render(TimeUnit::Ns, &mut AcquisitionTally::default());
    let rows: Vec<&str> = rendered.detailed.lines().skip(1).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("├─alpha"));
    assert!(rows[1].starts_with("└─beta"));
}

#[test]
fn test_ranking_orders_and_filters_clusters() {
    let mut nodes = two_nodes();
    ingest_all(
        &mut nodes,
        &[
            vec![
                lock_line(HOT, LockCounters::default()),
                lock_line(WARM, LockCounters::default()),
                lock_line(SYSTEM, LockCounters::default()),
            ],
            vec![],
        ],
    );
    let ledger = ingest_all(
        &mut nodes,
        &[
            vec![
                lock_line(HOT, LockCounters::new(1, 9_000, 1, 9_000)),
                lock_line(WARM, LockCounters::new(1, 100, 1, 100)),
                lock_line(SYSTEM, LockCounters::new(1, 99_000, 1, 99_000)),
            ],
            vec![],
        ],
    );
    assert_eq!(ledger.lock_types().render(), "total 3, M 2, W 1");

    let mut ranking = TopNRanking::new(600);
    for id in ledger.unique_identities() {
        let mut cluster = LockCluster::new(id);
        for node in &nodes {
            if let Some(series) = node.series(cluster.identity()) {
                cluster.append(node.name(), series).unwrap();
            }
        }
        ranking.insert(cluster);
    }

    let visible: Vec<u64> = ranking.top(10, 17, false).iter().map(|c| c.inode()).collect();
    assert_eq!(visible, [10005, 10006]);
    let labels: Vec<String> = ranking
        .top(10, 17, false)
        .iter()
        .map(|c| c.identity().short_label())
        .collect();
    assert_eq!(labels, ["M 10005", "W 10006"]);

    let debug: Vec<String> = ranking
        .top(10, 17, true)
        .iter()
        .map(|c| c.identity().short_label())
        .collect();
    assert_eq!(debug, ["M 5", "M 10005", "W 10006"]);

    let top = ranking.top(1, 17, false);
    let ctx = ReportContext {
        lockspace: "7635D31F539A483C8E2F4CC606D5D628",
        unit: TimeUnit::Ns,
        timestamp: Local::now(),
    };
    let report = Report::render(2, &top, ledger.lock_types(), &ctx);
    let lines: Vec<&str> = report.summary.lines().collect();
    assert_eq!(lines[1], "lock acquisitions: total 2, EX 1, PR 1");
    assert_eq!(lines[2], "lock resources: total 3, M 2, W 1");
    assert!(lines[5].starts_with("M 10005"));
    assert_eq!(lines.len(), 6);
}

#[test]
fn test_changed_generation_is_a_new_lock() {
    let old = "M000000000000000000271561bea619";
    let new = "M00000000000000000027156aaaaaaa";
    let mut node = NodeCollector::new("alpha", Duration::from_secs(5));
    node.ingest([lock_line(old, LockCounters::new(1, 10, 0, 0))], SystemTime::now())
        .unwrap();
    node.ingest([lock_line(new, LockCounters::new(1, 10, 0, 0))], SystemTime::now())
        .unwrap();

    assert_eq!(node.len(), 2);
    let old_id = LockIdentity::decode(old).unwrap();
    let new_id = LockIdentity::decode(new).unwrap();
    assert_eq!(old_id.inode(), new_id.inode());
    assert_eq!(node.series(&old_id).unwrap().sample_count(), 2);
    assert_eq!(node.series(&new_id).unwrap().sample_count(), 1);
}
