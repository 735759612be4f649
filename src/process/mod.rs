// Process module - OS facts, isolated spawning and shutdown signals

pub mod facts;
#[cfg(test)]
pub mod fake;
pub mod signals;

pub use facts::{ProcessFacts, SystemFacts};
#[cfg(test)]
pub use fake::{FactAction, RecordingFacts};
pub use signals::{ShutdownFlag, SignalRegistration, SHUTDOWN_SIGNALS};
