//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep thread indices, CPU ids and event selectors
//! from being mixed up, and make the engine's signatures readable.

use std::collections::BTreeSet;
use std::fmt;

pub use perfmon_common::EventCategory;

/// Pipeline thread index
///
/// Index 0 is the main (control) thread; dispatch workers are 1..=N.
/// This is the pipeline's own numbering, not a kernel TID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ThreadIndex(pub usize);

impl ThreadIndex {
    pub const MAIN: ThreadIndex = ThreadIndex(0);

    pub fn is_main(self) -> bool {
        self == Self::MAIN
    }
}

impl fmt::Display for ThreadIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// CPU ID
///
/// Represents a CPU core ID (0, 1, 2, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// A requested performance event
///
/// Immutable once configured. The order of a list of descriptors is the
/// collection order, and consecutive descriptors are collected as a pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventDescriptor {
    pub category: EventCategory,
    /// Raw selector (`perf_event_attr.config`)
    pub config: u64,
    pub name: String,
}

impl EventDescriptor {
    pub fn new(category: EventCategory, config: u64, name: impl Into<String>) -> Self {
        Self { category, config, name: name.into() }
    }

    pub fn hardware(config: u64, name: impl Into<String>) -> Self {
        Self::new(EventCategory::Hardware, config, name)
    }

    pub fn software(config: u64, name: impl Into<String>) -> Self {
        Self::new(EventCategory::Software, config, name)
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {:#x})", self.name, self.category.as_str(), self.config)
    }
}

/// Which threads take part in a run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ThreadSelector {
    #[default]
    All,
    Only(BTreeSet<ThreadIndex>),
}

impl ThreadSelector {
    pub fn only(threads: impl IntoIterator<Item = usize>) -> Self {
        ThreadSelector::Only(threads.into_iter().map(ThreadIndex).collect())
    }

    pub fn includes(&self, thread: ThreadIndex) -> bool {
        match self {
            ThreadSelector::All => true,
            ThreadSelector::Only(set) => set.contains(&thread),
        }
    }
}

impl fmt::Display for ThreadSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadSelector::All => write!(f, "all"),
            ThreadSelector::Only(set) => {
                let list: Vec<String> = set.iter().map(|t| t.0.to_string()).collect();
                write!(f, "{}", list.join(","))
            }
        }
    }
}

/// Engine lifecycle state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Off = 0,
    Running = 1,
}

impl EngineState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        if raw == EngineState::Running as u8 {
            EngineState::Running
        } else {
            EngineState::Off
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Off => write!(f, "off"),
            EngineState::Running => write!(f, "running"),
        }
    }
}
