use crate::config::WorkerConfig;
use crate::error::Result;
use crate::worker::RunReport;
use std::fmt;
use std::sync::Arc;

/// A restartable unit of work driven by a [`Worker`](crate::worker::Worker).
///
/// `run` is called once per iteration. `Ok(true)` counts as a completed
/// iteration, `Ok(false)` does not, and an error is logged and skipped
/// without ending the loop. The remaining methods are hooks with no-op
/// defaults; the worker logs its own lifecycle regardless.
pub trait Job: Send + 'static {
    fn run(&mut self) -> anyhow::Result<bool>;

    /// Called once in the worker process before the first iteration
    fn init(&mut self, _name: &str, _pid: u32) {}

    /// Called after each counted iteration
    fn on_success(&mut self) {}

    /// Called after each failed iteration
    fn on_failure(&mut self, _error: &anyhow::Error) {}

    /// Called once the loop has ended. Not called when a deadline abandoned
    /// the job mid-iteration.
    fn after_run(&mut self, _report: &RunReport) {}
}

impl<F> Job for F
where
    F: FnMut() -> anyhow::Result<bool> + Send + 'static,
{
    fn run(&mut self) -> anyhow::Result<bool> {
        self()
    }
}

/// Pin a closure to the [`Job`] signature so its error type is inferred
pub fn from_fn<F>(f: F) -> F
where
    F: FnMut() -> anyhow::Result<bool> + Send + 'static,
{
    f
}

type JobFactory = Arc<dyn Fn() -> Box<dyn Job> + Send + Sync>;

/// Immutable description of one worker slot: its configuration plus a
/// factory producing a fresh unit of work in every spawned process.
#[derive(Clone)]
pub struct WorkerSpec {
    config: WorkerConfig,
    factory: JobFactory,
}

impl WorkerSpec {
    pub fn new<J, F>(config: WorkerConfig, factory: F) -> Self
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        Self {
            config,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Job>),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Display name for the worker filling slot `index`
    pub fn display_name(&self, index: usize) -> String {
        format!("{}-{}", self.config.name, index + 1)
    }

    pub fn validate(&self) -> Result<()> {
        self.config.validate()
    }

    pub(crate) fn build_job(&self) -> Box<dyn Job> {
        (self.factory)()
    }
}

impl fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
