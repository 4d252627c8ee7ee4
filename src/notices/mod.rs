//! Outage notice records and the text heuristics that produce them.

pub mod dedupe;
pub mod extract;
pub mod types;

pub use dedupe::merge_and_sort;
pub use extract::{extract_notices, keyword_fragments, scan_raw_html};
pub use types::{OutageNotice, PLACEHOLDER_AREA};

/// Longest title (in chars) copied into a placeholder record's `region`.
pub const TITLE_MAX_CHARS: usize = 120;

/// Phrases that mark a page fragment as outage-related.
pub const NOTICE_KEYWORDS: &[&str] = &["Power Maintenance Notice", "Planned", "Interruption", "Outage"];
