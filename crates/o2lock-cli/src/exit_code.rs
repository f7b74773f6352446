//! Exit codes for o2locktop.
//!
//! Scripts wrapping the monitor can tell a bad invocation apart from a
//! cluster that could not be inspected.

/// Successful execution
pub const SUCCESS: u8 = 0;

/// General/unspecified error
pub const GENERAL_ERROR: u8 = 1;

/// Command-line or configuration file error
pub const USAGE: u8 = 2;

/// The cluster environment could not be inspected (missing tools, ssh,
/// unmounted volume, unreadable debugfs)
pub const ENVIRONMENT: u8 = 3;

/// Interrupted before the monitor could start
pub const INTERRUPTED: u8 = 4;
