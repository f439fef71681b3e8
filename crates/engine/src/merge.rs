//! Incremental merge of discovery updates into a live candidate list.
//!
//! Candidate lists are rebuilt repeatedly while a step's picker is open, so
//! everything here is keyed: an update for a known key mutates that item in
//! place (preserving its position), an unknown key appends, and the selected
//! set is recomputed from keys after every merge.

use serde_json::Value;

use pcapsift_types::{FilterStep, ListData, PickItem};

/// Stable upsert of `update` into `items`.
///
/// Existing items keep their list position; new keys are appended in
/// emission order, with the step's `listIcon` applied as a default icon.
pub fn merge_list_data(items: &mut Vec<PickItem>, update: &ListData, step: &FilterStep) {
    let description_fields = step.list_description.as_deref();
    for (key, record) in update {
        if let Some(existing) = items.iter_mut().find(|item| &item.name == key) {
            existing.update_from(record.clone(), description_fields);
        } else {
            let mut record = record.clone();
            if let Some(icon) = &step.list_icon {
                record.entry("icon").or_insert_with(|| Value::String(icon.clone()));
            }
            items.push(PickItem::from_record(record, key.clone(), description_fields));
        }
    }
}

/// Recompute a selected set after a merge: a selection survives iff its key
/// still exists in the list. Keys that vanished are dropped silently.
pub fn reselect(items: &[PickItem], selected_keys: &[String]) -> Vec<String> {
    selected_keys
        .iter()
        .filter(|key| items.iter().any(|item| item.name == **key))
        .cloned()
        .collect()
}
