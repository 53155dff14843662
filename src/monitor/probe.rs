use crate::RoamerError;
use std::time::Instant;
use sysinfo::{Pid, System};

/// One reading of the process footprint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Resident memory in MB
    pub memory_mb: f64,

    /// Process CPU usage, 100 = one full core
    pub cpu_percent: f64,

    pub taken_at: Instant,
}

impl ResourceSample {
    pub fn new(memory_mb: f64, cpu_percent: f64, taken_at: Instant) -> Self {
        Self {
            memory_mb,
            cpu_percent,
            taken_at,
        }
    }

    /// Placeholder published before the first real sample
    pub fn idle() -> Self {
        Self::new(0.0, 0.0, Instant::now())
    }
}

/// Source of resource samples
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Samples the current process through `sysinfo`
pub struct SysinfoProbe {
    system: System,
    pid: Pid,
}

impl SysinfoProbe {
    pub fn new() -> Result<Self, RoamerError> {
        let pid = sysinfo::get_current_pid().map_err(|e| RoamerError::Monitor(e.to_string()))?;
        let mut system = System::new();
        // Prime the CPU counters; the first reading is always zero
        system.refresh_process(pid);
        Ok(Self { system, pid })
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> ResourceSample {
        let now = Instant::now();
        if !self.system.refresh_process(self.pid) {
            return ResourceSample::new(0.0, 0.0, now);
        }

        match self.system.process(self.pid) {
            Some(process) => ResourceSample::new(
                process.memory() as f64 / (1024.0 * 1024.0),
                process.cpu_usage() as f64,
                now,
            ),
            None => ResourceSample::new(0.0, 0.0, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_probe_reports_own_memory() {
        let mut probe = SysinfoProbe::new().unwrap();
        let sample = probe.sample();
        assert!(sample.memory_mb > 0.0);
        assert!(sample.cpu_percent >= 0.0);
    }
}
