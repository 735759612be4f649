// CLI module - run a supervisor over a roster of demo workers

mod output;

use crate::config::{ManagerConfig, WorkerConfig};
use crate::error::Result;
use crate::logging::{init_logging, LogLevel};
use crate::manager::Manager;
use crate::worker::{Job, WorkerSpec};
use clap::Parser;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Warden - keep a fixed roster of worker processes alive
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Number of worker slots to supervise
    #[arg(short, long, default_value_t = 2)]
    workers: usize,

    /// Display name prefix for the workers
    #[arg(short, long, default_value = "Process")]
    name: String,

    /// Iterations before a worker exits and is respawned (unbounded if unset or 0)
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Per-iteration deadline in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Resident memory (MB) that triggers a graceful stop
    #[arg(long, default_value_t = 200.0)]
    soft_limit: f64,

    /// Resident memory (MB) that triggers a kill
    #[arg(long, default_value_t = 300.0)]
    hard_limit: f64,

    /// Pause between a worker's iterations in seconds
    #[arg(long)]
    worker_check_point: Option<f64>,

    /// Interval between supervisory passes in seconds
    #[arg(short, long, default_value_t = 10.0)]
    check_point: f64,

    /// Grace period for workers at shutdown in seconds
    #[arg(long, default_value_t = 3.0)]
    wait_time: f64,

    /// Banner text logged at startup
    #[arg(long, default_value = "Workers Daemon")]
    title: String,

    /// Log level (overrides WARDEN_LOG)
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Print the final slot summary as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> Result<()> {
        init_logging(self.log_level)?;

        let mut manager = Manager::new(self.manager_config(), self.build_specs())?;
        let reports = manager.start()?;

        if self.json {
            output::print_json(&reports)
        } else {
            output::print_summary(&reports);
            Ok(())
        }
    }

    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            check_point_secs: self.check_point,
            wait_time_secs: self.wait_time,
            title: self.title.clone(),
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            name: self.name.clone(),
            max_iterations: self.max_iterations,
            soft_memory_limit_mb: self.soft_limit,
            hard_memory_limit_mb: self.hard_limit,
            timeout_secs: self.timeout,
            check_point_secs: self.worker_check_point,
        }
    }

    fn build_specs(&self) -> Vec<WorkerSpec> {
        let config = self.worker_config();
        (0..self.workers)
            .map(|_| WorkerSpec::new(config.clone(), DemoJob::default))
            .collect()
    }
}

/// Allocates a little memory and sleeps a second per iteration
#[derive(Debug, Default)]
struct DemoJob {
    items: usize,
}

impl Job for DemoJob {
    fn run(&mut self) -> anyhow::Result<bool> {
        let batch: Vec<String> = (0..50_000).map(|i| i.to_string()).collect();
        self.items = batch.len();
        info!("result={}", self.items);
        thread::sleep(Duration::from_secs(1));
        Ok(true)
    }
}
