// Ratios intentionally lose precision for display purposes
#![allow(clippy::cast_precision_loss)]

use std::fmt::Write;

use crate::aggregator::CaptureStore;

/// Render every capture record as a plain-text table
///
/// One line per sample: `thread-stage`, event, counter delta, dispatches,
/// and the delta per dispatched item.
pub fn render_table(store: &CaptureStore) -> String {
    let rows: Vec<(String, &str, u64, u64)> = store
        .iter()
        .flat_map(|(key, record)| {
            let key = key.to_string();
            record.samples().map(move |(event, value, dispatches)| (key.clone(), event, value, dispatches))
        })
        .collect();

    let key_width = rows.iter().map(|r| r.0.len()).max().unwrap_or(0).max("stage".len());
    let event_width = rows.iter().map(|r| r.1.len()).max().unwrap_or(0).max("event".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<key_width$}  {:<event_width$}  {:>16}  {:>12}  {:>12}",
        "stage", "event", "value", "dispatches", "per-item"
    );
    for (key, event, value, dispatches) in &rows {
        let per_item = if *dispatches == 0 {
            "-".to_string()
        } else {
            format!("{:.2}", *value as f64 / *dispatches as f64)
        };
        let _ = writeln!(
            out,
            "{key:<key_width$}  {event:<event_width$}  {value:>16}  {dispatches:>12}  {per_item:>12}"
        );
    }
    out
}

/// Print the capture table, or a note when nothing was captured
pub fn print_table(store: &CaptureStore) {
    if store.is_empty() {
        println!("no samples captured");
        return;
    }
    print!("{}", render_table(store));
}
