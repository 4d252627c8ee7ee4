use std::collections::HashMap;

use super::types::OutageNotice;

/// Collapse notices sharing an id (the last one wins) and order the result
/// by `createdAt`, newest first.
///
/// Ties keep first-appearance order of the surviving ids. Within one run all
/// timestamps are nearly identical, so this is mostly a stable pass-through.
pub fn merge_and_sort(notices: Vec<OutageNotice>) -> Vec<OutageNotice> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<OutageNotice> = Vec::with_capacity(notices.len());

    for notice in notices {
        match slots.get(&notice.id) {
            Some(&slot) => merged[slot] = notice,
            None => {
                slots.insert(notice.id.clone(), merged.len());
                merged.push(notice);
            }
        }
    }

    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}
