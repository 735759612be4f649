// Library exports for the warden worker supervisor

pub mod cli;
pub mod config;
pub mod deadline;
pub mod error;
pub mod logging;
pub mod manager;
pub mod process;
pub mod worker;

pub use config::{ManagerConfig, WorkerConfig};
pub use error::{Result, WardenError};
pub use manager::{Manager, Slot, SlotAction, SlotReport};
pub use worker::{ExitReason, Job, RunReport, Worker, WorkerSpec};
