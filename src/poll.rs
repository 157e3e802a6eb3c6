//! The process's main loop.
//!
//! Runs on the main thread: check for an update, sleep for the refresh
//! interval, repeat.  The last-seen id is a plain value owned by the loop and
//! threaded through each [`UpdateChecker::check`] call.
//!
//! Fetch, decode and empty-feed errors are logged and retried naturally on
//! the next tick.  A persistence failure ends the loop, because the config
//! file may no longer reflect what was notified.

use std::convert::Infallible;
use std::thread;
use std::time::Duration;

use crate::check::{CheckError, UpdateChecker};
use crate::config::PersistError;

/// Run one iteration and return the id to carry into the next.
pub fn poll_once(checker: &UpdateChecker<'_>, last_seen_id: String) -> Result<String, PersistError> {
    match checker.check(&last_seen_id) {
        Ok(new_id) => Ok(new_id),
        Err(CheckError::Persist(e)) => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, last_seen_id = %last_seen_id, "Update check failed");
            Ok(last_seen_id)
        }
    }
}

/// Poll forever.  Only returns if the last-seen id could not be persisted.
pub fn run(
    checker: &UpdateChecker<'_>,
    mut last_seen_id: String,
    interval: Duration,
) -> Result<Infallible, PersistError> {
    loop {
        last_seen_id = poll_once(checker, last_seen_id)?;
        thread::sleep(interval);
    }
}
