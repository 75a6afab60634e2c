//! Parsers for the `/proc` files the system sampler reads.
//!
//! Pure functions over file content, testable with string inputs.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Aggregate `cpu` line of `/proc/stat`, in jiffies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Jiffies spent doing nothing (idle + iowait).
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    /// Busy percentage between `prev` and `self`, 0 when no time elapsed.
    pub fn busy_percent_since(&self, prev: &CpuTimes) -> f64 {
        let total = self.total().saturating_sub(prev.total());
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle_total().saturating_sub(prev.idle_total());
        let busy = total.saturating_sub(idle);
        (busy as f64 / total as f64 * 1000.0).round() / 10.0
    }
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_times(content: &str) -> Result<CpuTimes, ParseError> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| ParseError::new("missing aggregate cpu line in stat"))?;

    let parts: Vec<&str> = line.split_whitespace().collect();
    let get_val = |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

    Ok(CpuTimes {
        user: get_val(1),
        nice: get_val(2),
        system: get_val(3),
        idle: get_val(4),
        iowait: get_val(5),
        irq: get_val(6),
        softirq: get_val(7),
        steal: get_val(8),
    })
}

/// The two `/proc/meminfo` fields the dashboard shows, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub available: u64,
}

impl MemInfo {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }
}

/// Parses `/proc/meminfo`. Falls back to `MemFree` on kernels without
/// `MemAvailable`.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let parse_kb = |line: &str| -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    let mut total = None;
    let mut available = None;
    let mut free = 0;
    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            total = Some(parse_kb(line));
        } else if line.starts_with("MemAvailable:") {
            available = Some(parse_kb(line));
        } else if line.starts_with("MemFree:") {
            free = parse_kb(line);
        }
    }

    let total = total.ok_or_else(|| ParseError::new("missing MemTotal in meminfo"))?;
    Ok(MemInfo {
        total: total * 1024,
        available: available.unwrap_or(free) * 1024,
    })
}

/// Completed I/O counts of one block device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskCounters {
    pub device: String,
    pub reads: u64,
    pub writes: u64,
}

/// Parses `/proc/diskstats`, skipping malformed lines.
///
/// Format: major minor name reads r_merged r_sectors r_time writes ...
pub fn parse_diskstats(content: &str) -> Vec<DiskCounters> {
    let mut disks = Vec::new();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue;
        }
        let get_val =
            |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };
        disks.push(DiskCounters {
            device: parts[2].to_string(),
            reads: get_val(3),
            writes: get_val(7),
        });
    }
    disks
}

/// Byte counters of one network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Parses `/proc/net/dev`, skipping the two header lines.
pub fn parse_net_dev(content: &str) -> Vec<NetCounters> {
    let mut devices = Vec::new();
    for line in content.lines() {
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }
        let Some((interface, rest)) = line.split_once(':') else {
            continue;
        };
        let values: Vec<&str> = rest.split_whitespace().collect();
        if values.len() < 16 {
            continue;
        }
        let get_val =
            |idx: usize| -> u64 { values.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };
        devices.push(NetCounters {
            interface: interface.trim().to_string(),
            rx_bytes: get_val(0),
            tx_bytes: get_val(8),
        });
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_line_is_parsed() {
        let content = "cpu  100 5 50 800 20 1 2 0 0 0\ncpu0 50 2 25 400 10 0 1 0 0 0\nctxt 12345\n";
        let cpu = parse_cpu_times(content).unwrap();
        assert_eq!(cpu.user, 100);
        assert_eq!(cpu.idle, 800);
        assert_eq!(cpu.total(), 978);
    }

    #[test]
    fn missing_cpu_line_is_an_error() {
        assert!(parse_cpu_times("ctxt 1\n").is_err());
    }

    #[test]
    fn busy_percent_from_deltas() {
        let prev = CpuTimes {
            user: 100,
            idle: 900,
            ..Default::default()
        };
        let next = CpuTimes {
            user: 125,
            idle: 975,
            ..Default::default()
        };
        assert_eq!(next.busy_percent_since(&prev), 25.0);
        assert_eq!(prev.busy_percent_since(&prev), 0.0);
    }

    #[test]
    fn meminfo_in_bytes() {
        let content = "MemTotal:       16384 kB\nMemFree:         2048 kB\nMemAvailable:    8192 kB\n";
        let mem = parse_meminfo(content).unwrap();
        assert_eq!(mem.total, 16384 * 1024);
        assert_eq!(mem.used(), 8192 * 1024);
    }

    #[test]
    fn meminfo_without_available_uses_free() {
        let mem = parse_meminfo("MemTotal: 100 kB\nMemFree: 40 kB\n").unwrap();
        assert_eq!(mem.used(), 60 * 1024);
    }

    #[test]
    fn diskstats_reads_and_writes() {
        let content = "   8       0 sda 1000 10 8000 500 2000 20 16000 800 0 1200 1300\n   8       1 sda1 bad\n";
        let disks = parse_diskstats(content);
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].device, "sda");
        assert_eq!(disks[0].reads, 1000);
        assert_eq!(disks[0].writes, 2000);
    }

    #[test]
    fn net_dev_skips_headers() {
        let content = "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    lo: 500 5 0 0 0 0 0 0 500 5 0 0 0 0 0 0\n  eth0: 1000 10 0 0 0 0 0 0 2000 20 0 0 0 0 0 0\n";
        let devs = parse_net_dev(content);
        assert_eq!(devs.len(), 2);
        assert_eq!(devs[1].interface, "eth0");
        assert_eq!(devs[1].rx_bytes, 1000);
        assert_eq!(devs[1].tx_bytes, 2000);
    }
}
