use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Content-derived notice id (blake3 hex prefix).
pub type NoticeId = String;

/// Area label used when a record carries no area of its own.
pub const PLACEHOLDER_AREA: &str = "Planned maintenance";

/// Hex characters kept from the blake3 digest.
const ID_LEN: usize = 16;

/// One planned-outage announcement, as written to the output JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutageNotice {
    pub id: NoticeId,
    pub region: String,
    pub area: String,
    /// ISO-8601 when the source dates could be parsed, raw text otherwise.
    pub start_time: String,
    pub end_time: String,
    pub source_url: String,
    pub created_at: String,
}

impl OutageNotice {
    /// A low-information record standing in for text that had no
    /// recognisable structure.
    pub fn placeholder(id: NoticeId, title: &str, source_url: &str, created_at: &str) -> Self {
        Self {
            id,
            region: truncate_chars(title, super::TITLE_MAX_CHARS),
            area: PLACEHOLDER_AREA.to_string(),
            start_time: String::new(),
            end_time: String::new(),
            source_url: source_url.to_string(),
            created_at: created_at.to_string(),
        }
    }
}

/// Stable id for a piece of text.
pub fn notice_id(text: &str) -> NoticeId {
    let hex = blake3::hash(text.as_bytes()).to_hex();
    hex[..ID_LEN].to_string()
}

/// UTC "now" at second precision, e.g. `2025-03-04T08:00:00Z`.
pub fn extraction_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Collapse whitespace runs to a single space and trim.
pub fn normalize_space(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_short() {
        let a = notice_id("NAIROBI REGION|Area: Karen");
        let b = notice_id("NAIROBI REGION|Area: Karen");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, notice_id("NAIROBI REGION|Area: Langata"));
    }

    #[test]
    fn serializes_camel_case_keys() {
        let notice = OutageNotice {
            id: "abc".into(),
            region: "NAIROBI REGION".into(),
            area: "Karen".into(),
            start_time: "2024-03-12T09:00:00".into(),
            end_time: "2024-03-12T17:00:00".into(),
            source_url: "https://example.com/a.pdf".into(),
            created_at: "2024-03-01T00:00:00Z".into(),
        };
        let value = serde_json::to_value(&notice).unwrap();
        for key in ["id", "region", "area", "startTime", "endTime", "sourceUrl", "createdAt"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn timestamp_is_utc_seconds() {
        let ts = extraction_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-03-01T00:00:00Z".len());
    }

    #[test]
    fn normalizes_whitespace_runs() {
        assert_eq!(normalize_space("  Area:\t Karen \n  Estate "), "Area: Karen Estate");
        assert_eq!(normalize_space("   "), "");
    }
}
