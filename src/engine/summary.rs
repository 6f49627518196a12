// src/engine/summary.rs

//! Short, generic summaries of stage output for progress events.
//!
//! The engine never looks inside stage results; a summary is derived from
//! the shape of the update alone.

use crate::state::{FieldValue, StateUpdate};

/// Summarise an update. `accept_flag` is the field read by the retry edge,
/// rendered as `PASSED`/`RETRY` instead of a plain bool.
pub(crate) fn summarize(update: &StateUpdate, accept_flag: Option<&str>) -> String {
    if update.is_empty() {
        return "no changes".to_string();
    }

    let parts: Vec<String> = update
        .iter()
        .map(|(field, value)| match value {
            FieldValue::Bool(accepted) if Some(field) == accept_flag => {
                if *accepted { "PASSED" } else { "RETRY" }.to_string()
            }
            FieldValue::List(items) => format!("{} {}", items.len(), field),
            FieldValue::Text(text) => format!("{}: {} chars", field, text.chars().count()),
            FieldValue::Bool(b) => format!("{field}={b}"),
            FieldValue::Integer(i) => format!("{field}={i}"),
        })
        .collect();

    parts.join(", ")
}
