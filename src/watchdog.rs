//! The reconnect watchdog shared by the tailer, `OpBuf::flush`, and the direct readers.
//!
//! On any connectivity failure the calling loop forwards a wrapped error to its error channel,
//! then blocks here pinging the session every five seconds until it responds or the engine is
//! stopped, then refreshes the session before resuming. Centralized here so each caller only
//! needs to handle what's different about its own retry (where to resume from).

use crate::driver::Session;
use crate::sync::StopToken;
use std::time::Duration;

const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Blocks until `session.ping()` succeeds or `stop` fires, then calls `session.refresh()`.
///
/// Returns `true` if the connection was recovered and refreshed, `false` if `stop` fired first
/// (in which case the caller should exit rather than retry).
pub fn wait_for_connection(session: &dyn Session, stop: &StopToken) -> bool {
    loop {
        if stop.is_set() {
            return false;
        }
        if session.ping().is_ok() {
            break;
        }
        if stop.wait_timeout(PING_INTERVAL) {
            return false;
        }
    }
    match session.refresh() {
        Ok(()) => true,
        Err(_) => !stop.is_set() && wait_for_connection(session, stop),
    }
}
