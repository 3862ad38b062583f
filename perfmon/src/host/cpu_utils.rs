//! CPU utility functions
//!
//! Online CPUs from /sys, and pinning the calling thread to one of them.

#![allow(unsafe_code)] // sched_setaffinity requires unsafe

use anyhow::{Context, Result};
use std::fs;

use crate::domain::CpuId;

/// Get list of online CPU IDs from /sys/devices/system/cpu/online
///
/// The format in /sys is like "0-3" or "0-3,8-11" for NUMA systems.
pub fn online_cpus() -> Result<Vec<CpuId>> {
    let content = fs::read_to_string("/sys/devices/system/cpu/online")
        .context("Failed to read /sys/devices/system/cpu/online")?;
    parse_cpu_list(&content)
}

fn parse_cpu_list(content: &str) -> Result<Vec<CpuId>> {
    let mut cpus = Vec::new();

    for range in content.trim().split(',').filter(|r| !r.is_empty()) {
        if let Some((start, end)) = range.split_once('-') {
            let start: u32 = start.parse().with_context(|| format!("bad CPU range {range:?}"))?;
            let end: u32 = end.parse().with_context(|| format!("bad CPU range {range:?}"))?;
            cpus.extend((start..=end).map(CpuId));
        } else {
            let cpu: u32 = range.parse().with_context(|| format!("bad CPU id {range:?}"))?;
            cpus.push(CpuId(cpu));
        }
    }

    Ok(cpus)
}

/// Pin the calling thread to `cpu`
pub fn pin_current_thread(cpu: CpuId) -> std::io::Result<()> {
    let index = usize::try_from(cpu.0).unwrap_or(usize::MAX);
    if index >= usize::try_from(libc::CPU_SETSIZE).unwrap_or(0) {
        return Err(std::io::Error::from_raw_os_error(libc::EINVAL));
    }

    // SAFETY: cpu_set_t is plain data, zero is the empty set, and index was
    // bounds-checked against CPU_SETSIZE above
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(index, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_cpus() {
        let cpus = online_cpus().unwrap();
        assert!(!cpus.is_empty(), "Should have at least one CPU");

        // CPUs should be in ascending order
        for pair in cpus.windows(2) {
            assert!(pair[1].0 >= pair[0].0);
        }
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3\n").unwrap(), (0..4).map(CpuId).collect::<Vec<_>>());
        assert_eq!(
            parse_cpu_list("0-1,8-9,12").unwrap(),
            [0, 1, 8, 9, 12].into_iter().map(CpuId).collect::<Vec<_>>()
        );
        assert!(parse_cpu_list("0-x").is_err());
    }

    #[test]
    fn test_pin_to_online_cpu() {
        let cpus = online_cpus().unwrap();
        let cpu = *cpus.last().unwrap();
        // Restricted cpusets can refuse; only an out-of-range id must fail
        std::thread::spawn(move || {
            let _ = pin_current_thread(cpu);
        })
        .join()
        .unwrap();
        assert!(pin_current_thread(CpuId(u32::MAX)).is_err());
    }
}
