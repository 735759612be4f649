use crate::error::{Result, WardenError};
use crate::process::facts::ProcessFacts;
use std::collections::{HashMap, HashSet};

/// Something the manager asked the process table to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FactAction {
    Spawned { pid: u32 },
    Terminated { pid: u32, forceful: bool },
}

/// Scripted, in-memory [`ProcessFacts`] for exercising supervisory decisions.
///
/// Spawning allocates sequential pids without running the entry point. A
/// forceful terminate removes the pid at once; a graceful one leaves it alive
/// until [`RecordingFacts::exit`] is called, the way a real child finishes
/// its current iteration first.
#[derive(Debug)]
pub struct RecordingFacts {
    alive: HashSet<u32>,
    memory: HashMap<u32, f64>,
    broken: HashSet<u32>,
    next_pid: u32,
    failing_spawns: usize,
    actions: Vec<FactAction>,
}

impl RecordingFacts {
    pub fn new() -> Self {
        Self {
            alive: HashSet::new(),
            memory: HashMap::new(),
            broken: HashSet::new(),
            next_pid: 1000,
            failing_spawns: 0,
            actions: Vec::new(),
        }
    }

    /// Report `mb` of resident memory for `pid`
    pub fn set_memory(&mut self, pid: u32, mb: f64) {
        self.memory.insert(pid, mb);
    }

    /// Make memory reads for `pid` fail
    pub fn break_inspection(&mut self, pid: u32) {
        self.broken.insert(pid);
    }

    /// Simulate `pid` exiting on its own
    pub fn exit(&mut self, pid: u32) {
        self.alive.remove(&pid);
        self.memory.remove(&pid);
    }

    /// Make the next `count` spawn attempts fail
    pub fn fail_next_spawns(&mut self, count: usize) {
        self.failing_spawns = count;
    }

    pub fn actions(&self) -> &[FactAction] {
        &self.actions
    }

    pub fn take_actions(&mut self) -> Vec<FactAction> {
        std::mem::take(&mut self.actions)
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }
}

impl Default for RecordingFacts {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessFacts for RecordingFacts {
    fn is_alive(&mut self, pid: u32) -> bool {
        self.alive.contains(&pid)
    }

    fn resident_memory_mb(&mut self, pid: u32) -> Result<f64> {
        if self.broken.contains(&pid) {
            return Err(WardenError::InspectionError(
                pid,
                "scripted inspection failure".to_string(),
            ));
        }
        if !self.alive.contains(&pid) {
            return Ok(0.0);
        }
        Ok(self.memory.get(&pid).copied().unwrap_or(0.0))
    }

    fn terminate(&mut self, pid: u32, forceful: bool) -> Result<()> {
        self.actions.push(FactAction::Terminated { pid, forceful });
        if forceful {
            self.exit(pid);
        }
        Ok(())
    }

    fn spawn_isolated(&mut self, _entry: &dyn Fn() -> i32) -> Result<u32> {
        if self.failing_spawns > 0 {
            self.failing_spawns -= 1;
            return Err(WardenError::SpawnError(
                "scripted spawn failure".to_string(),
            ));
        }

        let pid = self.next_pid;
        self.next_pid += 1;
        self.alive.insert(pid);
        self.actions.push(FactAction::Spawned { pid });
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_allocates_sequential_pids() {
        let mut facts = RecordingFacts::new();
        let a = facts.spawn_isolated(&|| 0).unwrap();
        let b = facts.spawn_isolated(&|| 0).unwrap();

        assert_eq!(b, a + 1);
        assert!(facts.is_alive(a));
        assert!(facts.is_alive(b));
        assert_eq!(facts.alive_count(), 2);
    }

    #[test]
    fn test_graceful_terminate_leaves_process_running() {
        let mut facts = RecordingFacts::new();
        let pid = facts.spawn_isolated(&|| 0).unwrap();

        facts.terminate(pid, false).unwrap();
        assert!(facts.is_alive(pid));

        facts.exit(pid);
        assert!(!facts.is_alive(pid));
    }

    #[test]
    fn test_forceful_terminate_removes_process() {
        let mut facts = RecordingFacts::new();
        let pid = facts.spawn_isolated(&|| 0).unwrap();

        facts.terminate(pid, true).unwrap();
        assert!(!facts.is_alive(pid));
        assert_eq!(
            facts.actions().last(),
            Some(&FactAction::Terminated { pid, forceful: true })
        );
    }

    #[test]
    fn test_scripted_failures() {
        let mut facts = RecordingFacts::new();
        facts.fail_next_spawns(1);
        assert!(facts.spawn_isolated(&|| 0).is_err());

        let pid = facts.spawn_isolated(&|| 0).unwrap();
        facts.break_inspection(pid);
        assert!(matches!(
            facts.resident_memory_mb(pid),
            Err(WardenError::InspectionError(p, _)) if p == pid
        ));
    }
}
