//! Signal handling using signal-hook.
//!
//! The first SIGINT, SIGTERM or SIGHUP requests a stop of the monitor,
//! which finishes the current cycle and exits. A second signal exits
//! immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use o2lock_core::Shutdown;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::consts::signal::SIGHUP;
use signal_hook::flag;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Route termination signals to `shutdown`.
pub fn install(shutdown: &Shutdown) -> Result<(), std::io::Error> {
    let received = Arc::new(AtomicBool::new(false));

    for &sig in TERM_SIGNALS.iter().chain(&[SIGHUP]) {
        // Second signal terminates immediately
        flag::register_conditional_shutdown(sig, 1, Arc::clone(&received))?;
        flag::register(sig, Arc::clone(&received))?;
    }

    let shutdown = shutdown.clone();
    std::thread::Builder::new()
        .name("signal-monitor".into())
        .spawn(move || {
            while !received.load(Ordering::Relaxed) {
                if shutdown.is_requested() {
                    return;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            tracing::info!("stop requested by signal");
            eprintln!("\nStopping (send the signal again to force exit)");
            shutdown.request();
        })?;

    Ok(())
}
