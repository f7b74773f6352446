//! Synthetic `locking_state` lines and scripted transports.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use o2lock_core::Transport;
use parking_lot::Mutex;

/// Counters of one synthetic lock record.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockCounters {
    pub num_pr: u64,
    pub num_ex: u64,
    pub total_pr: u64,
    pub total_ex: u64,
}

impl LockCounters {
    pub fn new(num_pr: u64, total_pr: u64, num_ex: u64, total_ex: u64) -> Self {
        Self {
            num_pr,
            num_ex,
            total_pr,
            total_ex,
        }
    }
}

/// A version 4 record for `name` with no pending request.
pub fn lock_line(name: &str, c: LockCounters) -> String {
    let mut tokens: Vec<String> = vec![
        "0x4".into(),
        name.into(),
        "3".into(),
        "0x41".into(),
        "0x0".into(),
        "0x0".into(),
        "0".into(),
        "0".into(),
        "-1".into(),
        "-1".into(),
    ];
    tokens.extend(std::iter::repeat_n("0x0".to_owned(), 64));
    tokens.extend(
        [
            c.num_pr, c.num_ex, 0, 0, c.total_pr, c.total_ex, 21, 36, 0, 0, 0, 0,
        ]
        .map(|v| v.to_string()),
    );
    tokens.join("\t")
}

/// Replays one batch per fetch, then empty batches.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    label: String,
    batches: Arc<Mutex<VecDeque<Vec<String>>>>,
    fetches: Arc<Mutex<usize>>,
}

impl ScriptedTransport {
    pub fn new(label: &str, batches: Vec<Vec<String>>) -> Self {
        Self {
            label: label.to_owned(),
            batches: Arc::new(Mutex::new(batches.into())),
            fetches: Arc::new(Mutex::new(0)),
        }
    }

    /// Shared counter of completed fetches.
    pub fn fetch_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.fetches)
    }
}

impl Transport for ScriptedTransport {
    fn label(&self) -> &str {
        &self.label
    }

    fn fetch(&mut self) -> Vec<String> {
        *self.fetches.lock() += 1;
        self.batches.lock().pop_front().unwrap_or_default()
    }
}

/// Replays like [`ScriptedTransport`] until fetch number `dies_at`
/// (1-based), which panics and takes the node's fetch worker down.
#[derive(Debug, Clone)]
pub struct DyingTransport {
    inner: ScriptedTransport,
    dies_at: usize,
}

impl DyingTransport {
    pub fn new(label: &str, batches: Vec<Vec<String>>, dies_at: usize) -> Self {
        Self {
            inner: ScriptedTransport::new(label, batches),
            dies_at,
        }
    }
}

impl Transport for DyingTransport {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn fetch(&mut self) -> Vec<String> {
        let attempt = *self.inner.fetches.lock() + 1;
        if attempt >= self.dies_at {
            panic!("{} lost its transport on fetch {attempt}", self.inner.label);
        }
        self.inner.fetch()
    }
}
