//! Cooperative stop signal.
//!
//! A [`Shutdown`] is a cheap clonable handle. The coordinator checks it once
//! per completed cycle and sleeps on it between cycles, so a stop request
//! wakes the sleep immediately instead of waiting for the interval to end.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct State {
    requested: Mutex<bool>,
    cvar: Condvar,
}

/// Shared stop flag with blocking wait.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    state: Arc<State>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake every waiter.
    pub fn request(&self) {
        let mut requested = self.state.requested.lock();
        *requested = true;
        self.state.cvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self.state.requested.lock()
    }

    /// Sleep for `timeout` or until a stop is requested.
    ///
    /// Returns `true` if a stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut requested = self.state.requested.lock();
        if *requested {
            return true;
        }
        let _ = self
            .state
            .cvar
            .wait_while_for(&mut requested, |requested| !*requested, timeout);
        *requested
    }
}
