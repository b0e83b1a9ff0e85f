use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Samples this process's resident memory. Probing never fails the caller;
/// an unreadable process reports zero.
pub struct ResourceMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = e, "could not resolve current pid, memory checks disabled");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }

    pub fn current_memory_mb(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return 0;
        }
        system
            .process(pid)
            .map(|process| process.memory() / (1024 * 1024))
            .unwrap_or(0)
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
