//! Cooperative cancellation via a global atomic flag, raised by SIGTERM/SIGINT.
//!
//! Phases check [`is_shutdown_requested`] between rows/batches/shards rather
//! than being killed outright, so an in-flight shard write finishes its
//! current tmp file (or is abandoned cleanly) instead of leaving a partial
//! `.parquet` behind for the next run to trip over.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Global shutdown flag — set by the signal handler installed in [`install_signal_handlers`].
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Request shutdown (for signal handlers, and tests)
pub fn request_shutdown() {
    shutdown_flag().store(true, Ordering::Relaxed);
}

/// Register SIGTERM/SIGINT handlers that flip [`shutdown_flag`] rather than
/// terminating the process. Call once from the CLI entry point before
/// starting any phase.
///
/// A second signal while a shutdown is already in flight is left to the
/// default terminal behavior (Ctrl-C twice still kills it) — `signal_hook`
/// only registers the flag flip, it doesn't suppress the OS default.
pub fn install_signal_handlers() -> io::Result<()> {
    for sig in signal_hook::consts::TERM_SIGNALS {
        // SAFETY: the handler only performs an atomic store, which is
        // async-signal-safe.
        unsafe {
            signal_hook::low_level::register(*sig, request_shutdown)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sets_flag() {
        request_shutdown();
        assert!(is_shutdown_requested());
        shutdown_flag().store(false, Ordering::Relaxed);
    }
}
