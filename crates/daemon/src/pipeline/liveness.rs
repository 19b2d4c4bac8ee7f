//! Process liveness checks.

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Whether a process with this pid exists and has not exited.
///
/// Zombies count as dead: they only wait to be reaped.
pub fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]));

    match sys.process(pid) {
        Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        None => false,
    }
}

/// Subset of `pids` that are still alive.
pub fn surviving(pids: &[u32]) -> Vec<u32> {
    pids.iter().copied().filter(|&pid| is_process_alive(pid)).collect()
}
