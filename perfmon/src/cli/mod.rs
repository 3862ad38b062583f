//! Command-line interface for the perfmon binary

pub mod args;

pub use args::{parse_thread_selector, Args, BackendKind};
