//! # Shared perf ABI constants and the named-event catalog
//!
//! Plain data shared by the engine and by host pipelines that only need to
//! name events. Values follow the Linux `perf_event_open(2)` ABI, so they stay
//! stable across kernels.
//!
//! ## Key Items
//!
//! - [`EventCategory`] - Which perf type an event belongs to
//! - [`NamedEvent`] - One entry of the static catalog
//! - [`KNOWN_EVENTS`] - Generic hardware, hardware-cache and software events
//! - [`lookup()`] - Case-insensitive catalog search

#![no_std]

// ============================================================================
// perf_event_attr.type values
// ============================================================================

/// Generic hardware event (`PERF_TYPE_HARDWARE`)
pub const PERF_TYPE_HARDWARE: u32 = 0;

/// Kernel software event (`PERF_TYPE_SOFTWARE`)
pub const PERF_TYPE_SOFTWARE: u32 = 1;

/// Hardware cache event (`PERF_TYPE_HW_CACHE`)
pub const PERF_TYPE_HW_CACHE: u32 = 3;

/// CPU-specific raw selector (`PERF_TYPE_RAW`)
pub const PERF_TYPE_RAW: u32 = 4;

// ============================================================================
// Hardware-cache selector encoding
// ============================================================================

const fn hw_cache(cache: u64, op: u64, result: u64) -> u64 {
    cache | (op << 8) | (result << 16)
}

const CACHE_L1D: u64 = 0;
const CACHE_L1I: u64 = 1;
const CACHE_LL: u64 = 2;
const CACHE_DTLB: u64 = 3;
const CACHE_BPU: u64 = 5;
const CACHE_OP_READ: u64 = 0;
const CACHE_RESULT_ACCESS: u64 = 0;
const CACHE_RESULT_MISS: u64 = 1;

// ============================================================================
// Categories
// ============================================================================

/// The perf type an event is counted under.
///
/// Everything except [`EventCategory::Software`] lives on the PMU: such
/// events exclude kernel/hypervisor scope and can be read in user space
/// with `rdpmc` when the kernel grants it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCategory {
    Hardware = 0,
    Software = 1,
    HardwareCache = 2,
    Raw = 3,
}

impl EventCategory {
    /// `perf_event_attr.type` for this category
    #[must_use]
    pub const fn perf_type(self) -> u32 {
        match self {
            EventCategory::Hardware => PERF_TYPE_HARDWARE,
            EventCategory::Software => PERF_TYPE_SOFTWARE,
            EventCategory::HardwareCache => PERF_TYPE_HW_CACHE,
            EventCategory::Raw => PERF_TYPE_RAW,
        }
    }

    #[must_use]
    pub const fn is_software(self) -> bool {
        matches!(self, EventCategory::Software)
    }

    /// Whether a control page should be mapped for register reads
    #[must_use]
    pub const fn supports_register_read(self) -> bool {
        !self.is_software()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventCategory::Hardware => "hardware",
            EventCategory::Software => "software",
            EventCategory::HardwareCache => "hw-cache",
            EventCategory::Raw => "raw",
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// A catalog entry: a well-known event and its perf selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedEvent {
    pub name: &'static str,
    pub category: EventCategory,
    /// `perf_event_attr.config`
    pub config: u64,
    pub description: &'static str,
}

const fn hw(name: &'static str, config: u64, description: &'static str) -> NamedEvent {
    NamedEvent { name, category: EventCategory::Hardware, config, description }
}

const fn sw(name: &'static str, config: u64, description: &'static str) -> NamedEvent {
    NamedEvent { name, category: EventCategory::Software, config, description }
}

const fn cache(name: &'static str, config: u64, description: &'static str) -> NamedEvent {
    NamedEvent { name, category: EventCategory::HardwareCache, config, description }
}

/// Events every Linux PMU driver is expected to map
pub const KNOWN_EVENTS: &[NamedEvent] = &[
    hw("cpu-cycles", 0, "CPU cycles"),
    hw("instructions", 1, "Retired instructions"),
    hw("cache-references", 2, "Last-level cache references"),
    hw("cache-misses", 3, "Last-level cache misses"),
    hw("branch-instructions", 4, "Retired branch instructions"),
    hw("branch-misses", 5, "Mispredicted branches"),
    hw("bus-cycles", 6, "Bus cycles"),
    hw("stalled-cycles-frontend", 7, "Cycles stalled in the frontend"),
    hw("stalled-cycles-backend", 8, "Cycles stalled in the backend"),
    hw("ref-cpu-cycles", 9, "Reference cycles (not affected by frequency scaling)"),
    cache(
        "L1-dcache-loads",
        hw_cache(CACHE_L1D, CACHE_OP_READ, CACHE_RESULT_ACCESS),
        "L1 data cache loads",
    ),
    cache(
        "L1-dcache-load-misses",
        hw_cache(CACHE_L1D, CACHE_OP_READ, CACHE_RESULT_MISS),
        "L1 data cache load misses",
    ),
    cache(
        "L1-icache-load-misses",
        hw_cache(CACHE_L1I, CACHE_OP_READ, CACHE_RESULT_MISS),
        "L1 instruction cache load misses",
    ),
    cache(
        "LLC-load-misses",
        hw_cache(CACHE_LL, CACHE_OP_READ, CACHE_RESULT_MISS),
        "Last-level cache load misses",
    ),
    cache(
        "dTLB-load-misses",
        hw_cache(CACHE_DTLB, CACHE_OP_READ, CACHE_RESULT_MISS),
        "Data TLB load misses",
    ),
    cache(
        "branch-load-misses",
        hw_cache(CACHE_BPU, CACHE_OP_READ, CACHE_RESULT_MISS),
        "Branch predictor misses",
    ),
    sw("cpu-clock", 0, "CPU clock (ns)"),
    sw("task-clock", 1, "Task clock (ns)"),
    sw("page-faults", 2, "Page faults"),
    sw("context-switches", 3, "Context switches"),
    sw("cpu-migrations", 4, "CPU migrations"),
    sw("minor-faults", 5, "Minor page faults"),
    sw("major-faults", 6, "Major page faults"),
];

/// Find a catalog entry by name, ignoring ASCII case
#[must_use]
pub fn lookup(name: &str) -> Option<&'static NamedEvent> {
    KNOWN_EVENTS.iter().find(|event| event.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let event = lookup("Context-Switches").unwrap();
        assert_eq!(event.category, EventCategory::Software);
        assert_eq!(event.config, 3);
    }

    #[test]
    fn test_catalog_names_are_unique() {
        for (i, a) in KNOWN_EVENTS.iter().enumerate() {
            for b in &KNOWN_EVENTS[i + 1..] {
                assert!(!a.name.eq_ignore_ascii_case(b.name), "duplicate {}", a.name);
            }
        }
    }

    #[test]
    fn test_hw_cache_encoding() {
        assert_eq!(lookup("LLC-load-misses").unwrap().config, 0x1_0002);
        assert_eq!(lookup("L1-dcache-loads").unwrap().config, 0);
    }

    #[test]
    fn test_only_software_skips_register_read() {
        assert!(!EventCategory::Software.supports_register_read());
        assert!(EventCategory::Hardware.supports_register_read());
        assert!(EventCategory::HardwareCache.supports_register_read());
        assert!(EventCategory::Raw.supports_register_read());
    }
}
