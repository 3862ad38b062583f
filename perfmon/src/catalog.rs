//! Event list parsing
//!
//! Turns operator input such as `cpu-cycles,instructions,r01c2` into an
//! ordered list of [`EventDescriptor`]s. Catalog names resolve through
//! [`perfmon_common::lookup`]; `r<hex>` is a raw PMU selector.

use perfmon_common::{lookup, EventCategory, KNOWN_EVENTS};

use crate::domain::{CatalogError, EventDescriptor};

/// Resolve a single event name
///
/// # Errors
/// Returns [`CatalogError`] for unknown names or malformed raw selectors
pub fn parse_event(name: &str) -> Result<EventDescriptor, CatalogError> {
    let name = name.trim();

    if let Some(known) = lookup(name) {
        return Ok(EventDescriptor::new(known.category, known.config, known.name));
    }

    if let Some(hex) = name.strip_prefix('r').or_else(|| name.strip_prefix('R')) {
        if hex.is_empty() {
            return Err(CatalogError::BadRawSelector(name.to_string()));
        }
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let config = u64::from_str_radix(hex, 16)
            .map_err(|_| CatalogError::BadRawSelector(name.to_string()))?;
        return Ok(EventDescriptor::new(EventCategory::Raw, config, name));
    }

    Err(CatalogError::UnknownEvent(name.to_string()))
}

/// Parse a comma-separated event list, preserving order
///
/// Duplicates are kept: asking for the same event twice collects it twice.
///
/// # Errors
/// Returns the first [`CatalogError`] encountered, or [`CatalogError::Empty`]
pub fn parse_event_list(list: &str) -> Result<Vec<EventDescriptor>, CatalogError> {
    let events = list
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(parse_event)
        .collect::<Result<Vec<_>, _>>()?;

    if events.is_empty() {
        return Err(CatalogError::Empty);
    }
    Ok(events)
}

/// Print the catalog, one event per line
pub fn print_catalog() {
    for event in KNOWN_EVENTS {
        println!("{:<26} {:<9} {}", event.name, event.category.as_str(), event.description);
    }
    println!("{:<26} {:<9} CPU-specific raw selector", "r<hex>", "raw");
}
