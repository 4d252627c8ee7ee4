use std::path::Path;

use anyhow::{Context, Result};

use crate::notices::OutageNotice;

/// Pretty-printed JSON array, 2-space indent, non-ASCII kept as-is.
pub fn render(notices: &[OutageNotice]) -> Result<String> {
    serde_json::to_string_pretty(notices).context("Failed to serialize notices")
}

/// Write `payload` to `path`, creating parent directories first.
pub fn write_json(path: &Path, payload: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, payload).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_renders_as_empty_array() {
        assert_eq!(render(&[]).unwrap(), "[]");
    }

    #[test]
    fn creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("nested").join("planned_outages.json");
        write_json(&path, "[]").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn keeps_non_ascii() {
        let notice = OutageNotice {
            id: "x".into(),
            region: "Murang’a".into(),
            area: String::new(),
            start_time: String::new(),
            end_time: String::new(),
            source_url: String::new(),
            created_at: String::new(),
        };
        assert!(render(&[notice]).unwrap().contains("Murang’a"));
    }
}
