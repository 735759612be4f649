//! Time-bounded execution of a single unit of work.
//!
//! The guarded work runs on a helper thread while the caller waits on a
//! channel with a timeout. If the deadline passes first the helper is
//! abandoned and the caller gets [`WardenError::DeadlineExceeded`]; the
//! abandoned thread is reclaimed when the owning worker process exits.

use crate::error::{Result, WardenError};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Scoped deadline for one invocation. An unset or zero deadline is a
/// pass-through that runs the work inline on the calling thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeadlineGuard {
    limit: Option<Duration>,
}

impl DeadlineGuard {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            limit: limit.filter(|d| !d.is_zero()),
        }
    }

    /// Guard that never fires
    pub fn unbounded() -> Self {
        Self { limit: None }
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// Run `work` under the deadline.
    ///
    /// A panic inside `work` is re-raised on the calling thread, matching the
    /// inline behavior of an unbounded guard.
    pub fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let Some(limit) = self.limit else {
            return Ok(work());
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name("deadline-guard".to_string())
            .spawn(move || {
                // The receiver is gone once the deadline has fired
                let _ = tx.send(work());
            })?;

        match rx.recv_timeout(limit) {
            Ok(value) => {
                let _ = handle.join();
                Ok(value)
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!("Deadline of {:?} exceeded, abandoning unit of work", limit);
                Err(WardenError::DeadlineExceeded(limit))
            }
            Err(RecvTimeoutError::Disconnected) => match handle.join() {
                Err(payload) => std::panic::resume_unwind(payload),
                Ok(()) => Err(WardenError::Internal(
                    "deadline guard lost its result channel".to_string(),
                )),
            },
        }
    }
}

/// Run `work`, failing with `DeadlineExceeded` if it has not returned within `limit`
pub fn with_deadline<F, T>(limit: Option<Duration>, work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    DeadlineGuard::new(limit).run(work)
}
