// Manager module - keeps one live worker process per slot

use crate::config::ManagerConfig;
use crate::error::{Result, WardenError};
use crate::process::{ProcessFacts, ShutdownFlag, SystemFacts};
use crate::worker::{run_in_child, WorkerSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Poll interval while waiting for children to exit at shutdown
const REAP_POLL: Duration = Duration::from_millis(100);

/// One position in the roster: "a worker that should always be running"
#[derive(Debug)]
pub struct Slot {
    index: usize,
    name: String,
    spec: WorkerSpec,
    pid: Option<u32>,
    created_at: DateTime<Utc>,
    last_spawned_at: Option<DateTime<Utc>>,
    spawn_count: u64,
}

impl Slot {
    fn new(index: usize, spec: WorkerSpec) -> Self {
        Self {
            index,
            name: spec.display_name(index),
            spec,
            pid: None,
            created_at: Utc::now(),
            last_spawned_at: None,
            spawn_count: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of processes that have filled this slot
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count
    }

    fn record_spawn(&mut self, pid: u32) {
        self.pid = Some(pid);
        self.spawn_count += 1;
        self.last_spawned_at = Some(Utc::now());
    }

    pub fn report(&self) -> SlotReport {
        SlotReport {
            index: self.index,
            name: self.name.clone(),
            pid: self.pid,
            spawn_count: self.spawn_count,
            created_at: self.created_at,
            last_spawned_at: self.last_spawned_at,
        }
    }
}

/// Snapshot of a slot, returned from [`Manager::start`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotReport {
    pub index: usize,
    pub name: String,
    pub pid: Option<u32>,
    pub spawn_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_spawned_at: Option<DateTime<Utc>>,
}

/// What one supervisory pass did with a slot
#[derive(Debug, Clone, PartialEq)]
pub enum SlotAction {
    Spawned { pid: u32 },
    Respawned { old_pid: u32, pid: u32 },
    HardKilled { pid: u32, memory_mb: f64 },
    SoftStopped { pid: u32, memory_mb: f64 },
    Healthy { pid: u32, memory_mb: f64 },
    Failed { reason: String },
}

/// Supervisor owning a fixed roster of worker slots
pub struct Manager<F: ProcessFacts = SystemFacts> {
    config: ManagerConfig,
    slots: Vec<Slot>,
    facts: F,
    shutdown: ShutdownFlag,
    pid: u32,
}

impl Manager<SystemFacts> {
    pub fn new(config: ManagerConfig, specs: Vec<WorkerSpec>) -> Result<Self> {
        Self::with_facts(config, specs, SystemFacts::new())
    }
}

impl<F: ProcessFacts> Manager<F> {
    /// Build the roster. Slot indexes are assigned here once and never change.
    pub fn with_facts(config: ManagerConfig, specs: Vec<WorkerSpec>, facts: F) -> Result<Self> {
        if specs.is_empty() {
            return Err(WardenError::RosterEmpty);
        }

        config.validate()?;
        for spec in &specs {
            spec.validate()?;
        }

        let slots = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Slot::new(index, spec))
            .collect();

        Ok(Self {
            config,
            slots,
            facts,
            shutdown: ShutdownFlag::new(),
            pid: std::process::id(),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn facts(&self) -> &F {
        &self.facts
    }

    pub fn facts_mut(&mut self) -> &mut F {
        &mut self.facts
    }

    /// Handle that ends the supervisory loop, like SIGTERM would
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    pub fn reports(&self) -> Vec<SlotReport> {
        self.slots.iter().map(Slot::report).collect()
    }

    /// Supervise until SIGINT/SIGTERM, then stop every child and return
    pub fn start(&mut self) -> Result<Vec<SlotReport>> {
        let _signals = self.shutdown.register()?;
        self.pid = std::process::id();

        self.log_banner();
        self.run();

        if let Some(signal) = self.shutdown.signal() {
            info!("Process {} received a signal {}", self.pid, signal);
        }
        self.shutdown_children();

        Ok(self.reports())
    }

    fn log_banner(&self) {
        info!("=============================");
        info!("{} Starting", self.config.title);
        info!("=============================");
        info!("Daemon process {}", self.pid);
        info!("Check point {:?}", self.config.check_point());
    }

    /// Polling loop: one pass, then a cancellable pause, until shutdown
    pub fn run(&mut self) {
        let interval = self.config.check_point();
        while !self.shutdown.is_requested() {
            self.run_pass();
            self.shutdown.sleep(interval);
        }
    }

    /// Visit every slot once, in roster order
    pub fn run_pass(&mut self) -> Vec<SlotAction> {
        debug!("Supervisory pass over {} slot(s)", self.slots.len());

        (0..self.slots.len())
            .map(|i| match self.supervise_slot(i) {
                Ok(action) => action,
                Err(e) => {
                    error!(slot = i, "{}: {}", self.slots[i].name, e);
                    SlotAction::Failed {
                        reason: e.to_string(),
                    }
                }
            })
            .collect()
    }

    fn supervise_slot(&mut self, i: usize) -> Result<SlotAction> {
        let slot = &mut self.slots[i];

        let old_pid = match slot.pid {
            Some(pid) if self.facts.is_alive(pid) => {
                return Self::enforce_memory(&mut self.facts, slot, pid);
            }
            Some(pid) => {
                info!(slot = slot.index, pid, "{} {} no longer exists", slot.name, pid);
                slot.pid = None;
                Some(pid)
            }
            None => None,
        };

        let spec = slot.spec.clone();
        let index = slot.index;
        let inherited = self.shutdown.clone();
        let pid = self
            .facts
            .spawn_isolated(&move || run_in_child(&spec, index, inherited.clone()))?;

        slot.record_spawn(pid);
        info!(slot = slot.index, pid, "{} spawned as process {}", slot.name, pid);

        Ok(match old_pid {
            Some(old_pid) => SlotAction::Respawned { old_pid, pid },
            None => SlotAction::Spawned { pid },
        })
    }

    fn enforce_memory(facts: &mut F, slot: &Slot, pid: u32) -> Result<SlotAction> {
        let memory_mb = facts.resident_memory_mb(pid)?;
        let limits = slot.spec.config();

        if limits.reached_hard_memory_limit(memory_mb) {
            info!(
                slot = slot.index,
                pid,
                memory_mb,
                "{} {} memory is {:.0}M reaches hard memory limit {}M will be killed.",
                slot.name,
                pid,
                memory_mb,
                limits.hard_memory_limit_mb
            );
            facts.terminate(pid, true)?;
            Ok(SlotAction::HardKilled { pid, memory_mb })
        } else if limits.reached_soft_memory_limit(memory_mb) {
            facts.terminate(pid, false)?;
            info!(
                slot = slot.index,
                pid,
                memory_mb,
                "{} {} memory is {:.0}M reaches soft memory limit {}M will be cancelled.",
                slot.name,
                pid,
                memory_mb,
                limits.soft_memory_limit_mb
            );
            Ok(SlotAction::SoftStopped { pid, memory_mb })
        } else {
            debug!(slot = slot.index, pid, memory_mb, "{} healthy", slot.name);
            Ok(SlotAction::Healthy { pid, memory_mb })
        }
    }

    /// Ask every tracked child to stop, then wait out the grace period.
    ///
    /// Children are never killed here; one still running after the grace
    /// period is left to the surrounding init system.
    pub fn shutdown_children(&mut self) {
        let tracked: Vec<(String, u32)> = self
            .slots
            .iter()
            .filter_map(|slot| slot.pid.map(|pid| (slot.name.clone(), pid)))
            .collect();

        info!("Stopping {} worker process(es)", tracked.len());

        for (name, pid) in &tracked {
            if !self.facts.is_alive(*pid) {
                continue;
            }
            if let Err(e) = self.facts.terminate(*pid, false) {
                error!(pid, "Failed to stop {} {}: {}", name, pid, e);
            }
        }

        let grace = self.config.wait_time();
        let deadline = Instant::now().checked_add(grace);
        loop {
            let remaining: Vec<u32> = tracked
                .iter()
                .map(|(_, pid)| *pid)
                .filter(|pid| self.facts.is_alive(*pid))
                .collect();

            if remaining.is_empty() {
                break;
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            "{} worker process(es) still running after {:?}: {:?}",
                            remaining.len(),
                            grace,
                            remaining
                        );
                        break;
                    }
                    REAP_POLL.min(deadline - now)
                }
                // Too long to fit on the clock: wait for the children
                None => REAP_POLL,
            };
            thread::sleep(pause);
        }

        info!("Main process {} quit.", self.pid);
    }
}
