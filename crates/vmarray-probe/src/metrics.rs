//! Process-level memory sampling with sysinfo.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Samples the resident set size of the current process.
///
/// Complements [`vmarray::Footprint`], which only sees the array's own
/// reservation: the process RSS also moves with everything else the
/// program touches, so it is reported for context rather than asserted on.
pub struct ProcessMemory {
    system: System,
    pid: Option<Pid>,
}

impl ProcessMemory {
    /// Create a sampler for the current process.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Current resident set size in bytes, if the platform reports it.
    pub fn resident_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        self.system.process(pid).map(sysinfo::Process::memory)
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}
