//! Pre-flight checks for the perf backend
//!
//! Validates system requirements before any counter is opened.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};

use crate::domain::EventDescriptor;

/// Oldest kernel that publishes `cap_user_rdpmc` in the control page
const MIN_KERNEL_VERSION: (u32, u32) = (3, 12);

/// Highest `perf_event_paranoid` that still allows unprivileged
/// per-thread user-space counting
const MAX_PARANOID: i32 = 2;

const PARANOID_PATH: &str = "/proc/sys/kernel/perf_event_paranoid";

/// Run all pre-flight checks before opening perf counters
pub fn run_preflight_checks(events: &[EventDescriptor], quiet: bool) -> Result<()> {
    check_kernel_version()?;
    let paranoid = read_paranoid()?;
    let root = is_root();
    check_paranoid(paranoid, root)?;
    if !quiet {
        warn_software_scope(events, paranoid, root);
    }
    Ok(())
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// Check if the kernel version is sufficient for register reads
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 5.15.0-generic ..." or "Linux version 6.1.0-arch1-1 ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some((major, minor)) = parse_release(release) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             perfmon requires Linux {}.{} or newer for user-space counter reads.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

fn parse_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

fn read_paranoid() -> Result<i32> {
    let raw = std::fs::read_to_string(PARANOID_PATH).with_context(|| {
        format!(
            "Cannot read {PARANOID_PATH}\n\n\
             The kernel was probably built without perf events support.\n\
             Use --backend simulated to run without hardware counters."
        )
    })?;
    raw.trim().parse().with_context(|| format!("Unexpected {PARANOID_PATH} value {raw:?}"))
}

fn check_paranoid(level: i32, root: bool) -> Result<()> {
    if level <= MAX_PARANOID || root {
        return Ok(());
    }
    bail!(
        "Permission denied: perf_event_paranoid is {level}, counting needs {MAX_PARANOID} or lower.\n\n\
         Run with: sudo sysctl kernel.perf_event_paranoid={MAX_PARANOID}\n\
         or run perfmon as root."
    );
}

/// Software counters keep kernel scope, which paranoid 2 forbids for
/// unprivileged users
fn warn_software_scope(events: &[EventDescriptor], level: i32, root: bool) {
    if level <= 1 || root {
        return;
    }
    let software: Vec<&str> = events
        .iter()
        .filter(|e| e.category.is_software())
        .map(|e| e.name.as_str())
        .collect();
    if !software.is_empty() {
        eprintln!(
            "warning: perf_event_paranoid is {level}; software events ({}) may fail to open",
            software.join(", ")
        );
    }
}
