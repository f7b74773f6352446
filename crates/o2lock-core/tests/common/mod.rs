//! Common test utilities for o2lock-core integration tests.

#![allow(dead_code)]

pub mod harness;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

pub use harness::{lock_line, DyingTransport, LockCounters, ScriptedTransport};

static TRACING: Once = Once::new();

/// Route library logs to the test writer; `RUST_LOG` selects the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
