//! Error types for the contention engine.
//!
//! Each stage of the pipeline owns its own error enum:
//!
//! - [`IdentityError`] - a lock-name token that cannot be decoded
//! - [`ParseError`] - a `locking_state` line that cannot become a sample
//! - [`IngestError`] - a broken internal invariant while building series or clusters
//! - [`CoordinatorError`] - failures of the cycle driver itself
//! - [`TransportError`] - a fetch that produced no lines
//!
//! Parse errors are per-line and never abort a cycle. Ingest errors mean
//! unrelated locks were about to be merged, so the owning node stops.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::identity::LockIdentity;

/// A lock-name token that does not follow the fixed OCFS2 layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("lock name {token:?} is {len} bytes, need at least {min}")]
    TooShort { token: String, len: usize, min: usize },

    #[error("lock name {token:?} is not ASCII")]
    NotAscii { token: String },

    #[error("lock name {token:?} carries a non-hex inode field {field:?}")]
    InvalidInode { token: String, field: String },
}

/// A raw `locking_state` line that could not be turned into a sample.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty record")]
    Empty,

    #[error("unsupported debug format version {0:?}")]
    UnsupportedVersion(String),

    #[error("version {version} record has {found} tokens, expected {expected}")]
    MalformedRecord {
        version: u8,
        found: usize,
        expected: usize,
    },

    #[error("field {field} has invalid value {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error(transparent)]
    IllegalIdentity(#[from] IdentityError),
}

/// Internal-consistency violations. These indicate corrupted input or a bug
/// and stop processing for the node that hit them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("series for {expected} received a sample for {found}")]
    IdentityMismatch {
        expected: LockIdentity,
        found: LockIdentity,
    },

    #[error("node {node} already contributed a series for {identity}")]
    DuplicateNode { node: String, identity: LockIdentity },
}

/// Failures of the cycle driver.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("no nodes to monitor")]
    NoNodes,

    #[error("failed to spawn worker for node {node}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("node {0} is listed more than once")]
    DuplicateNode(String),

    #[error("node {node} stopped after an ingest failure")]
    Ingest {
        node: String,
        #[source]
        source: IngestError,
    },

    #[error("every node stopped reporting")]
    AllNodesLost,
}

/// Why a transport produced no lines. Logged by the transport, never
/// propagated to the collector.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read output of {program}")]
    Output {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} produced output that is not UTF-8")]
    NotUtf8 { program: String },
}
