use std::sync::Mutex;

use sysinfo::{Pid, ProcessesToUpdate, System};

/// Host-side view of the supervised process.
pub trait ProcessProbe: Send + Sync {
    /// Resident memory of `pid` in bytes, `None` once the process is gone.
    fn memory_bytes(&self, pid: u32) -> Option<u64>;
    /// One-minute load average of the host.
    fn host_load(&self) -> f64;
}

pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl ProcessProbe for SysinfoProbe {
    fn memory_bytes(&self, pid: u32) -> Option<u64> {
        let pid = Pid::from_u32(pid);
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        system.process(pid).map(|process| process.memory())
    }

    fn host_load(&self) -> f64 {
        System::load_average().one
    }
}

/// Fixed readings, for tests and hosts without process introspection.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pub memory: Option<u64>,
    pub load: f64,
}

impl ProcessProbe for StaticProbe {
    fn memory_bytes(&self, _pid: u32) -> Option<u64> {
        self.memory
    }

    fn host_load(&self) -> f64 {
        self.load
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysinfo_sees_the_current_process() {
        let probe = SysinfoProbe::default();
        let memory = probe.memory_bytes(std::process::id());
        assert!(memory.unwrap_or(0) > 0);
        assert!(probe.host_load() >= 0.0);
    }

    #[test]
    fn vanished_process_reports_none() {
        let probe = SysinfoProbe::default();
        assert_eq!(probe.memory_bytes(u32::MAX - 1), None);
    }
}
