// Worker module - the bounded, restartable loop that runs inside each child

mod job;

pub use job::{from_fn, Job, WorkerSpec};

use crate::deadline::DeadlineGuard;
use crate::error::{Result, WardenError};
use crate::process::ShutdownFlag;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{error, info, warn};

/// Exit status used when the deadline ended the loop
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Why a worker's loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    None,
    Signal,
    Timeout,
    MaxIterationsReached,
}

impl ExitReason {
    /// Process exit status reported to whoever reaps the worker
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Timeout => TIMEOUT_EXIT_CODE,
            _ => 0,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::None => write!(f, "none"),
            ExitReason::Signal => write!(f, "signal"),
            ExitReason::Timeout => write!(f, "timeout"),
            ExitReason::MaxIterationsReached => write!(f, "max iterations reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Completed(ExitReason),
    Terminated,
}

/// Mutable state of one worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRuntime {
    pub pid: u32,
    pub iteration_count: u64,
    exit_reason: ExitReason,
}

impl WorkerRuntime {
    fn new() -> Self {
        Self {
            pid: std::process::id(),
            iteration_count: 0,
            exit_reason: ExitReason::None,
        }
    }

    pub fn exit_reason(&self) -> ExitReason {
        self.exit_reason
    }

    /// Record why the loop ended. Only the first reason sticks.
    fn finish(&mut self, reason: ExitReason) {
        if self.exit_reason == ExitReason::None {
            self.exit_reason = reason;
        }
    }
}

/// Summary handed to the `after_run` hook and returned from [`Worker::start`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    pub pid: u32,
    pub iterations: u64,
    pub exit_reason: ExitReason,
    pub max_iterations: Option<u64>,
    pub timeout: Option<Duration>,
}

pub struct Worker {
    spec: WorkerSpec,
    name: String,
    guard: DeadlineGuard,
    cancel: ShutdownFlag,
    runtime: WorkerRuntime,
    state: WorkerState,
    job: Option<Box<dyn Job>>,
}

impl Worker {
    /// Build the worker that fills slot `index`
    pub fn new(spec: WorkerSpec, index: usize) -> Result<Self> {
        spec.validate()?;

        let name = spec.display_name(index);
        let guard = DeadlineGuard::new(spec.config().timeout());
        let job = spec.build_job();

        Ok(Self {
            spec,
            name,
            guard,
            cancel: ShutdownFlag::new(),
            runtime: WorkerRuntime::new(),
            state: WorkerState::Created,
            job: Some(job),
        })
    }

    /// Observe `flag` instead of a fresh one.
    ///
    /// A forked child passes the flag inherited from its parent: the parent's
    /// handlers already point at it, so a stop request that lands before
    /// [`Worker::start`] installs its own handlers is not lost.
    pub fn with_cancel_flag(mut self, flag: ShutdownFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn runtime(&self) -> &WorkerRuntime {
        &self.runtime
    }

    /// Handle that stops the loop at its next checkpoint, like SIGTERM would
    pub fn cancel_flag(&self) -> ShutdownFlag {
        self.cancel.clone()
    }

    /// Run the worker to completion in the current process
    pub fn start(&mut self) -> Result<RunReport> {
        if self.state != WorkerState::Created {
            return Err(WardenError::Internal(format!(
                "{} has already been started",
                self.name
            )));
        }

        let _signals = self.cancel.register()?;
        self.runtime.pid = std::process::id();
        self.state = WorkerState::Running;

        info!("{} {} creating", self.name, self.runtime.pid);
        if let Some(job) = self.job.as_mut() {
            job.init(&self.name, self.runtime.pid);
        }

        self.run_loop()?;

        let report = self.report();
        self.state = WorkerState::Completed(report.exit_reason);
        self.log_exit(&report);
        if let Some(job) = self.job.as_mut() {
            job.after_run(&report);
        }
        self.state = WorkerState::Terminated;

        Ok(report)
    }

    fn should_continue(&self) -> bool {
        let under_limit = match self.spec.config().iteration_limit() {
            Some(max) => self.runtime.iteration_count < max,
            None => true,
        };
        under_limit && !self.cancel.is_requested()
    }

    /// Iterate until a terminal condition. Only a failure of the iteration
    /// machinery itself is returned; errors from the job are logged.
    fn run_loop(&mut self) -> Result<()> {
        let pause = self.spec.config().check_point();

        while self.should_continue() {
            match self.invoke() {
                Ok(Ok(true)) => {
                    self.runtime.iteration_count += 1;
                    if let Some(job) = self.job.as_mut() {
                        job.on_success();
                    }
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    error!("{} {} iteration failed: {:#}", self.name, self.runtime.pid, e);
                    if let Some(job) = self.job.as_mut() {
                        job.on_failure(&e);
                    }
                }
                Err(WardenError::DeadlineExceeded(limit)) => {
                    warn!(
                        "{} {} iteration exceeded its {:?} deadline",
                        self.name, self.runtime.pid, limit
                    );
                    self.runtime.finish(ExitReason::Timeout);
                    break;
                }
                Err(e) => {
                    error!("{} {} could not run iteration: {}", self.name, self.runtime.pid, e);
                    return Err(e);
                }
            }

            if let Some(pause) = pause {
                self.cancel.sleep(pause);
            }
        }

        if let Some(signal) = self.cancel.signal() {
            info!("{} {} received a signal {}", self.name, self.runtime.pid, signal);
            self.runtime.finish(ExitReason::Signal);
        }
        self.runtime.finish(ExitReason::MaxIterationsReached);
        Ok(())
    }

    /// Run one iteration under the deadline guard.
    ///
    /// The job travels to the guard's thread and back; when the deadline
    /// fires it stays behind with the abandoned thread.
    fn invoke(&mut self) -> Result<anyhow::Result<bool>> {
        let mut job = self
            .job
            .take()
            .ok_or_else(|| WardenError::Internal(format!("{} lost its job", self.name)))?;

        let (job, outcome) = self.guard.run(move || {
            let outcome = attempt(job.as_mut());
            (job, outcome)
        })?;

        self.job = Some(job);
        Ok(outcome)
    }

    fn report(&self) -> RunReport {
        RunReport {
            name: self.name.clone(),
            pid: self.runtime.pid,
            iterations: self.runtime.iteration_count,
            exit_reason: self.runtime.exit_reason,
            max_iterations: self.spec.config().iteration_limit(),
            timeout: self.guard.limit(),
        }
    }

    fn log_exit(&self, report: &RunReport) {
        match report.exit_reason {
            ExitReason::Signal => {
                info!("{} {} cancelled by signal.", report.name, report.pid);
            }
            ExitReason::Timeout => {
                info!(
                    "{} {} cancelled by reaching timeout {:?}",
                    report.name,
                    report.pid,
                    report.timeout.unwrap_or_default()
                );
            }
            _ => {
                info!(
                    "{} {} cancelled by reaching max iterations count [{}]",
                    report.name, report.pid, report.iterations
                );
            }
        }
    }
}

/// Entry point for a spawned worker process; returns its exit status
pub fn run_in_child(spec: &WorkerSpec, index: usize, cancel: ShutdownFlag) -> i32 {
    let outcome = Worker::new(spec.clone(), index)
        .and_then(|worker| worker.with_cancel_flag(cancel).start());
    match outcome {
        Ok(report) => report.exit_reason.exit_code(),
        Err(e) => {
            error!("{} failed to run: {}", spec.display_name(index), e);
            1
        }
    }
}

fn attempt(job: &mut dyn Job) -> anyhow::Result<bool> {
    match catch_unwind(AssertUnwindSafe(|| job.run())) {
        Ok(result) => result,
        Err(payload) => Err(WardenError::IterationError(format!(
            "unit of work panicked: {}",
            panic_message(payload.as_ref())
        ))
        .into()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
