//! Builds one step's boolean filter clause from its confirmed selection.

use serde_json::Value;

use pcapsift_types::{FilterStep, StepSelection};

/// Build the display-filter clause for `step` from `selection`.
///
/// Raw selections pass through verbatim. For picked items, each non-empty
/// key contributes `field==key` — the record-level `filterField` override
/// wins over the step's configured field — joined with `" or "`. A step
/// configured to negate wraps the non-empty result in `!(...)`. The output
/// is deterministic for a fixed selection ordering; the state machine relies
/// on byte-identical repeated builds for change detection.
pub fn build_expression(step: &FilterStep, selection: &StepSelection) -> String {
    let items = match selection {
        StepSelection::Raw(raw) => return raw.clone(),
        StepSelection::Items(items) => items,
    };

    let mut filter = String::new();
    for item in items {
        if item.name.is_empty() {
            continue;
        }
        if !filter.is_empty() {
            filter.push_str(" or ");
        }
        let field = item
            .record
            .get("filterField")
            .and_then(Value::as_str)
            .unwrap_or(&step.filter_field);
        filter.push_str(field);
        filter.push_str("==");
        filter.push_str(&item.name);
    }

    if step.filter_negate && !filter.is_empty() {
        return format!("!({filter})");
    }
    filter
}

/// Clause for a step that may not have been confirmed yet. An unconfirmed
/// step contributes no constraint.
pub fn build_expression_opt(step: &FilterStep, selection: Option<&StepSelection>) -> String {
    selection.map(|sel| build_expression(step, sel)).unwrap_or_default()
}
