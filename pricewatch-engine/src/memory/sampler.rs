//! Process and host memory sampling

use anyhow::{Context, Result};
use pricewatch_core::dto::system::MemorySnapshot;

/// Source of memory snapshots
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> Result<MemorySnapshot>;
}

/// Reads `/proc/self/status` and `/proc/meminfo`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsSampler;

impl MemorySampler for ProcfsSampler {
    fn sample(&self) -> Result<MemorySnapshot> {
        let status = std::fs::read_to_string("/proc/self/status")
            .context("Failed to read /proc/self/status")?;
        let meminfo =
            std::fs::read_to_string("/proc/meminfo").context("Failed to read /proc/meminfo")?;

        snapshot_from(&status, &meminfo)
    }
}

fn snapshot_from(status: &str, meminfo: &str) -> Result<MemorySnapshot> {
    let rss_kb = field_kb(status, "VmRSS").context("VmRSS missing from process status")?;
    let vms_kb = field_kb(status, "VmSize").unwrap_or(0);
    let total_kb = field_kb(meminfo, "MemTotal").context("MemTotal missing from meminfo")?;
    let available_kb = field_kb(meminfo, "MemAvailable")
        .or_else(|| field_kb(meminfo, "MemFree"))
        .unwrap_or(0);

    let system_percent = if total_kb == 0 {
        0.0
    } else {
        (total_kb.saturating_sub(available_kb)) as f64 / total_kb as f64 * 100.0
    };

    Ok(MemorySnapshot {
        timestamp: chrono::Utc::now(),
        rss_mb: kb_to_mb(rss_kb),
        vms_mb: kb_to_mb(vms_kb),
        system_percent,
        available_mb: kb_to_mb(available_kb),
    })
}

/// Finds `Key:   1234 kB` and returns the number
fn field_kb(text: &str, key: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != key {
            return None;
        }
        rest.split_whitespace().next()?.parse().ok()
    })
}

fn kb_to_mb(kb: u64) -> f64 {
    kb as f64 / 1024.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tpricewatch\nVmSize:\t  409600 kB\nVmRSS:\t  102400 kB\n";
    const MEMINFO: &str =
        "MemTotal:        4194304 kB\nMemFree:          524288 kB\nMemAvailable:    1048576 kB\n";

    #[test]
    fn test_snapshot_from_procfs_text() {
        let snapshot = snapshot_from(STATUS, MEMINFO).unwrap();
        assert_eq!(snapshot.rss_mb, 100.0);
        assert_eq!(snapshot.vms_mb, 400.0);
        assert_eq!(snapshot.available_mb, 1024.0);
        assert!((snapshot.system_percent - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_rss_is_an_error() {
        assert!(snapshot_from("Name:\tx\n", MEMINFO).is_err());
    }

    #[test]
    fn test_field_requires_exact_key() {
        assert_eq!(field_kb("VmRSSx: 5 kB\nVmRSS: 7 kB", "VmRSS"), Some(7));
        assert_eq!(field_kb("", "VmRSS"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_procfs_sampler_reads_live_values() {
        let snapshot = ProcfsSampler.sample().unwrap();
        assert!(snapshot.rss_mb > 0.0);
    }
}
