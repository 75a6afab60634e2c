//! Local host utilization sampler.
//!
//! Produces the `system_utilization` category from `/proc`. Counters (disk
//! I/O, network bytes) are reported raw; the metric store turns them into
//! rates. CPU percent needs two samples, so the first sample reports 0.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::procfs::{self, CpuTimes};
use super::traits::FileSystem;
use crate::snapshot::RawFields;

/// Reads host utilization counters through a `FileSystem`.
pub struct SystemSampler<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    prev_cpu: Option<CpuTimes>,
}

impl<F: FileSystem> SystemSampler<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            proc_path: proc_path.as_ref().to_path_buf(),
            prev_cpu: None,
        }
    }

    /// Takes one sample. Files that cannot be read or parsed are skipped and
    /// their fields left out.
    pub fn sample(&mut self) -> RawFields {
        let mut out = RawFields::new();

        if let Some(stat) = self.read("stat") {
            match procfs::parse_cpu_times(&stat) {
                Ok(cpu) => {
                    let percent = self
                        .prev_cpu
                        .map(|prev| cpu.busy_percent_since(&prev))
                        .unwrap_or(0.0);
                    self.prev_cpu = Some(cpu);
                    out.insert("CPU_Percent".into(), Value::from(percent));
                }
                Err(e) => debug!(error = %e, "skipping cpu sample"),
            }
            let cpu_count = stat
                .lines()
                .filter(|l| {
                    l.strip_prefix("cpu")
                        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
                })
                .count();
            out.insert("CPU_Count".into(), Value::from(cpu_count as u64));
        }

        if let Some(meminfo) = self.read("meminfo") {
            match procfs::parse_meminfo(&meminfo) {
                Ok(mem) => {
                    out.insert("Memory_Total".into(), Value::from(mem.total));
                    out.insert("Memory_Used".into(), Value::from(mem.used()));
                }
                Err(e) => debug!(error = %e, "skipping memory sample"),
            }
        }

        if let Some(diskstats) = self.read("diskstats") {
            let (reads, writes) = procfs::parse_diskstats(&diskstats)
                .iter()
                .filter(|d| !is_virtual_disk(&d.device))
                .fold((0u64, 0u64), |(r, w), d| (r + d.reads, w + d.writes));
            out.insert("Disk_Read".into(), Value::from(reads));
            out.insert("Disk_Write".into(), Value::from(writes));
        }

        if let Some(netdev) = self.read("net/dev") {
            let (rx, tx) = procfs::parse_net_dev(&netdev)
                .iter()
                .filter(|n| n.interface != "lo")
                .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes));
            out.insert("Network_Down".into(), Value::from(rx));
            out.insert("Network_Up".into(), Value::from(tx));
        }

        if let Some(uptime) = self.read("uptime")
            && let Some(secs) = uptime
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<f64>().ok())
        {
            out.insert("Uptime".into(), Value::from(secs as u64));
        }

        out
    }

    fn read(&self, name: &str) -> Option<String> {
        let path = self.proc_path.join(name);
        match self.fs.read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot read");
                None
            }
        }
    }
}

/// Loop, ram and device-mapper devices double count physical I/O.
fn is_virtual_disk(device: &str) -> bool {
    device.starts_with("loop") || device.starts_with("ram") || device.starts_with("dm-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use crate::snapshot::numeric_field;

    #[test]
    fn first_sample_reports_zero_cpu() {
        let mut sampler = SystemSampler::new(MockFs::typical_system(), "/proc");
        let sample = sampler.sample();
        assert_eq!(numeric_field(&sample, "CPU_Percent"), 0.0);
        assert_eq!(numeric_field(&sample, "CPU_Count"), 2.0);
        assert_eq!(numeric_field(&sample, "Memory_Total"), 16384.0 * 1024.0);
        assert_eq!(numeric_field(&sample, "Memory_Used"), 8192.0 * 1024.0);
        assert_eq!(numeric_field(&sample, "Uptime"), 3600.0);
    }

    #[test]
    fn cpu_percent_from_second_sample() {
        let mut fs = MockFs::typical_system();
        let mut sampler = SystemSampler::new(fs.clone(), "/proc");
        sampler.sample();

        // +25 user, +75 idle
        fs.add_file("/proc/stat", "cpu  125 0 0 975 0 0 0 0 0 0\ncpu0 125 0 0 975 0 0 0 0 0 0\n");
        sampler.fs = fs;
        let sample = sampler.sample();
        assert_eq!(numeric_field(&sample, "CPU_Percent"), 25.0);
    }

    #[test]
    fn loop_devices_and_loopback_are_excluded() {
        let mut sampler = SystemSampler::new(MockFs::typical_system(), "/proc");
        let sample = sampler.sample();
        assert_eq!(numeric_field(&sample, "Disk_Read"), 1000.0);
        assert_eq!(numeric_field(&sample, "Disk_Write"), 2000.0);
        assert_eq!(numeric_field(&sample, "Network_Down"), 1000.0);
        assert_eq!(numeric_field(&sample, "Network_Up"), 2000.0);
    }

    #[test]
    fn missing_files_are_skipped() {
        let mut sampler = SystemSampler::new(MockFs::new(), "/proc");
        assert!(sampler.sample().is_empty());
    }
}
