//! Shutdown signals as one-shot flags.
//!
//! The handler installed for SIGINT and SIGTERM only stores the signal number
//! into an atomic; the supervising or working loop notices it at its next
//! checkpoint. Nothing else runs in signal context.
//!
//! While no registration is live the signals take their default action
//! again, so a process that has finished supervising can still be stopped
//! with Ctrl-C or `kill`.

use crate::error::{Result, WardenError};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::SigId;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Signals that request an orderly stop
pub const SHUTDOWN_SIGNALS: [i32; 2] = [SIGINT, SIGTERM];

/// Granularity of cancellable sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Process-wide bookkeeping for the default-action fallback
struct Fallback {
    /// Read by the conditional-default handler; true when nothing is registered
    armed: Arc<AtomicBool>,
    live: usize,
}

static FALLBACK: Mutex<Option<Fallback>> = Mutex::new(None);

fn lock_fallback() -> MutexGuard<'static, Option<Fallback>> {
    FALLBACK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn signal_error(signal: i32, e: std::io::Error) -> WardenError {
    WardenError::SignalError(format!(
        "Failed to install handler for signal {}: {}",
        signal, e
    ))
}

/// Shared stop request. Holds the number of the signal that set it, or zero.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    signal: Arc<AtomicUsize>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register SIGINT and SIGTERM to set this flag.
    ///
    /// The handlers stay installed until the returned registration is
    /// dropped. Once the last live registration in the process is dropped,
    /// the signals terminate the process as they would by default.
    pub fn register(&self) -> Result<SignalRegistration> {
        {
            let mut fallback = lock_fallback();
            if fallback.is_none() {
                let armed = Arc::new(AtomicBool::new(false));
                for signal in SHUTDOWN_SIGNALS {
                    signal_hook::flag::register_conditional_default(signal, Arc::clone(&armed))
                        .map_err(|e| signal_error(signal, e))?;
                }
                *fallback = Some(Fallback { armed, live: 0 });
            }
            if let Some(fallback) = fallback.as_mut() {
                fallback.live += 1;
                fallback.armed.store(false, Ordering::SeqCst);
            }
        }

        // Dropping a partial registration on error restores the bookkeeping
        let mut registration = SignalRegistration {
            ids: Vec::with_capacity(SHUTDOWN_SIGNALS.len()),
        };
        for signal in SHUTDOWN_SIGNALS {
            let id = signal_hook::flag::register_usize(
                signal,
                Arc::clone(&self.signal),
                signal as usize,
            )
            .map_err(|e| signal_error(signal, e))?;
            registration.ids.push(id);
        }
        debug!("Installed handlers for signals {:?}", SHUTDOWN_SIGNALS);
        Ok(registration)
    }

    /// Set the flag from normal control flow, as if `signal` had arrived
    pub fn request(&self, signal: i32) {
        self.signal.store(signal.max(0) as usize, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.signal.load(Ordering::SeqCst) != 0
    }

    /// Number of the signal that set the flag
    pub fn signal(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n as i32),
        }
    }

    /// Sleep for `duration`, waking early once the flag is set.
    ///
    /// A duration too long to fit on the clock sleeps until the flag is set.
    /// Returns true if the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_requested() {
                return true;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    SLEEP_SLICE.min(deadline - now)
                }
                None => SLEEP_SLICE,
            };
            thread::sleep(slice);
        }
    }
}

/// Live handler registration; unregisters on drop
#[derive(Debug)]
pub struct SignalRegistration {
    ids: Vec<SigId>,
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }

        if let Some(fallback) = lock_fallback().as_mut() {
            fallback.live = fallback.live.saturating_sub(1);
            if fallback.live == 0 {
                fallback.armed.store(true, Ordering::SeqCst);
            }
        }
    }
}
