//! Process CPU, memory and scheduler lag measurement

use crate::monitor::types::SystemSample;
use std::time::Instant;
use sysinfo::{Pid, System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Reads real process metrics through `sysinfo`
pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
    cpus: usize,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
            cpus: num_cpus::get().max(1),
        }
    }

    /// Take one sample
    ///
    /// CPU usage needs two refreshes at least `MINIMUM_CPU_UPDATE_INTERVAL`
    /// apart, so this call takes at least that long.
    pub async fn sample(&mut self) -> SystemSample {
        let event_loop_lag_ms = measure_lag().await;

        let Some(pid) = self.pid else {
            return SystemSample {
                event_loop_lag_ms,
                ..Default::default()
            };
        };

        self.system.refresh_process(pid);
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        if !self.system.refresh_process(pid) {
            return SystemSample {
                event_loop_lag_ms,
                ..Default::default()
            };
        }

        let (cpu, memory_bytes) = self
            .system
            .process(pid)
            .map(|p| (p.cpu_usage() as f64, p.memory()))
            .unwrap_or((0.0, 0));

        SystemSample {
            cpu_percent: (cpu / self.cpus as f64).clamp(0.0, 100.0),
            memory_bytes,
            event_loop_lag_ms,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// How long a yielded task waits before the scheduler polls it again
async fn measure_lag() -> f64 {
    let start = Instant::now();
    tokio::task::yield_now().await;
    start.elapsed().as_secs_f64() * 1000.0
}
