//! Host and process statistics sampling.

use parking_lot::Mutex;
use sysinfo::{Pid, System};

use crate::metric::Metric;

/// Source of gauge readings for one poll cycle
pub trait Sampler: Send + Sync {
    fn name(&self) -> &str;

    /// Take one reading of every gauge this sampler knows about
    fn sample(&self) -> Vec<Metric>;
}

/// Samples host memory, swap, load, per-CPU usage and this process's own
/// footprint through `sysinfo`.
pub struct SystemSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        // CPU usage is a delta between two refreshes; prime the first one
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn name(&self) -> &str {
        "system"
    }

    fn sample(&self) -> Vec<Metric> {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu();

        let mut metrics = vec![
            Metric::gauge("TotalMemory", system.total_memory() as f64),
            Metric::gauge("FreeMemory", system.free_memory() as f64),
            Metric::gauge("AvailableMemory", system.available_memory() as f64),
            Metric::gauge("UsedMemory", system.used_memory() as f64),
            Metric::gauge("TotalSwap", system.total_swap() as f64),
            Metric::gauge("FreeSwap", system.free_swap() as f64),
        ];

        let load = System::load_average();
        metrics.push(Metric::gauge("LoadAverage1", load.one));
        metrics.push(Metric::gauge("LoadAverage5", load.five));
        metrics.push(Metric::gauge("LoadAverage15", load.fifteen));

        for (index, cpu) in system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("CPUutilization{}", index + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }

        if let Some(pid) = self.pid {
            if system.refresh_process(pid) {
                if let Some(process) = system.process(pid) {
                    metrics.push(Metric::gauge("ProcessResidentMemory", process.memory() as f64));
                    metrics.push(Metric::gauge("ProcessVirtualMemory", process.virtual_memory() as f64));
                    metrics.push(Metric::gauge("ProcessCPUUsage", f64::from(process.cpu_usage())));
                }
            }
        }

        metrics.push(Metric::gauge("RandomValue", rand::random::<f64>()));
        metrics
    }
}
