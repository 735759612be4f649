// Reading process facts must not leave helper threads behind: the manager
// forks from this process and the child inherits only the forking thread.
#![cfg(target_os = "linux")]

use std::fs;
use warden::process::{ProcessFacts, SystemFacts};

fn thread_count() -> usize {
    fs::read_dir("/proc/self/task")
        .expect("Failed to read /proc/self/task")
        .count()
}

#[test]
fn test_process_facts_do_not_spawn_threads() {
    let before = thread_count();

    let mut facts = SystemFacts::new();
    let pid = std::process::id();
    for _ in 0..3 {
        assert!(facts.is_alive(pid));
        assert!(facts.resident_memory_mb(pid).unwrap() > 0.0);
    }

    assert!(thread_count() <= before);
}
