//! Roadmap reader - parses the planning markdown into ordered work items.
//!
//! Item sections open with a `### PRIORITY <n>: <title>` heading (a leading
//! marker like `🔴` and `**bold**` wrapping are tolerated) and carry a
//! `**Status**: ...` line within the first fifteen lines. Parsed results are
//! cached and invalidated by the file's modification time.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::debug;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^###\s+(?:\S+\s+)?\*{0,2}PRIORITY\s+(\d+(?:\.\d+)?)\s*:\s*([^*]+?)\*{0,2}\s*$")
        .expect("valid roadmap header regex")
});

static STATUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*Status\*\*:\s*(.+?)\s*$").expect("valid status regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Planned,
    InProgress,
    Complete,
    Blocked,
    Unknown,
}

impl ItemStatus {
    fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.contains("planned") || label.contains("📝") {
            Self::Planned
        } else if lower.contains("in progress") || label.contains("🔄") {
            Self::InProgress
        } else if lower.contains("complete") || lower.contains("done") || label.contains("✅") {
            Self::Complete
        } else if lower.contains("blocked") {
            Self::Blocked
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadmapItem {
    /// Item number as written in the heading ("7", "31.2").
    pub number: String,
    /// Canonical name, e.g. "PRIORITY 7".
    pub name: String,
    pub title: String,
    pub status: ItemStatus,
    /// Raw status label from the document.
    pub status_label: String,
    /// Full section content, heading included, until the next item heading.
    pub content: String,
}

impl RoadmapItem {
    /// Deliverable lines from a `Deliverables` block: `- path` or checkbox
    /// bullets. Used by the project_manager's Definition-of-Done pass.
    pub fn deliverables(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut in_block = false;
        for line in self.content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("**Deliverables**") || trimmed.starts_with("## Deliverables") {
                in_block = true;
                continue;
            }
            if in_block {
                if let Some(rest) = trimmed
                    .strip_prefix("- [x] ")
                    .or_else(|| trimmed.strip_prefix("- [ ] "))
                    .or_else(|| trimmed.strip_prefix("- "))
                {
                    out.push(rest.trim().trim_matches('`').to_string());
                } else if !trimmed.is_empty() {
                    break;
                }
            }
        }
        out
    }
}

struct Cache {
    mtime: SystemTime,
    items: Vec<RoadmapItem>,
}

/// Read-only view of the roadmap document.
pub struct RoadmapReader {
    path: PathBuf,
    cache: Mutex<Option<Cache>>,
}

impl RoadmapReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// All items in document order. Reparses only when the file changed.
    pub fn list_items(&self) -> Result<Vec<RoadmapItem>> {
        let mtime = std::fs::metadata(&self.path)
            .with_context(|| format!("roadmap not found: {}", self.path.display()))?
            .modified()?;

        let mut cache = self.cache.lock().expect("roadmap cache lock");
        if let Some(c) = cache.as_ref() {
            if c.mtime == mtime {
                debug!("roadmap cache hit");
                return Ok(c.items.clone());
            }
        }

        let content = std::fs::read_to_string(&self.path)?;
        let items = parse_items(&content);
        debug!(count = items.len(), "roadmap parsed");
        *cache = Some(Cache {
            mtime,
            items: items.clone(),
        });
        Ok(items)
    }

    /// First item whose status is `planned`, in document order.
    pub fn next_planned(&self) -> Result<Option<RoadmapItem>> {
        Ok(self
            .list_items()?
            .into_iter()
            .find(|i| i.status == ItemStatus::Planned))
    }

    pub fn is_complete(&self, number: &str) -> Result<bool> {
        Ok(self
            .list_items()?
            .iter()
            .any(|i| i.number == number && i.status == ItemStatus::Complete))
    }
}

fn parse_items(content: &str) -> Vec<RoadmapItem> {
    let lines: Vec<&str> = content.lines().collect();
    let mut items = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = HEADER_RE.captures(line) else {
            continue;
        };
        let number = caps[1].to_string();
        let title = caps[2].trim().to_string();

        // Status line appears within the first fifteen lines of the section.
        let mut status_label = "Unknown".to_string();
        for probe in lines.iter().skip(i).take(15) {
            if let Some(status_caps) = STATUS_RE.captures(probe) {
                status_label = status_caps[1].trim().to_string();
                break;
            }
        }

        // Section body runs until the next item heading or a `## ` divider.
        let mut section = vec![*line];
        for probe in lines.iter().skip(i + 1) {
            if HEADER_RE.is_match(probe) || (probe.starts_with("## ") && !probe.starts_with("###"))
            {
                break;
            }
            section.push(*probe);
        }

        items.push(RoadmapItem {
            name: format!("PRIORITY {number}"),
            number,
            title,
            status: ItemStatus::from_label(&status_label),
            status_label,
            content: section.join("\n"),
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"# Roadmap

## Current priorities

### 🔴 **PRIORITY 7: File-based messaging**

**Status**: 📝 Planned

Body of item seven.

**Deliverables**:
- src/bus/message.rs
- [x] tests/bus_test.rs

### 🔴 **PRIORITY 8: Supervisor restart policy**

**Status**: 🔄 In Progress

Body of item eight.

### PRIORITY 9: Health records

**Status**: ✅ Complete

Done already.

## Archive
"#;

    fn write_sample(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("ROADMAP.md");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_items_with_status() {
        let dir = tempfile::tempdir().unwrap();
        let reader = RoadmapReader::new(write_sample(&dir));

        let items = reader.list_items().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].number, "7");
        assert_eq!(items[0].title, "File-based messaging");
        assert_eq!(items[0].status, ItemStatus::Planned);
        assert_eq!(items[1].status, ItemStatus::InProgress);
        assert_eq!(items[2].status, ItemStatus::Complete);
        assert!(items[1].content.contains("Body of item eight"));
        // Section content does not leak into the next item.
        assert!(!items[1].content.contains("Done already"));
    }

    #[test]
    fn next_planned_and_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let reader = RoadmapReader::new(write_sample(&dir));

        assert_eq!(reader.next_planned().unwrap().unwrap().number, "7");
        assert!(reader.is_complete("9").unwrap());
        assert!(!reader.is_complete("7").unwrap());
    }

    #[test]
    fn deliverables_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let reader = RoadmapReader::new(write_sample(&dir));

        let item = reader.next_planned().unwrap().unwrap();
        assert_eq!(
            item.deliverables(),
            vec!["src/bus/message.rs", "tests/bus_test.rs"]
        );
    }

    #[test]
    fn cache_invalidated_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir);
        let reader = RoadmapReader::new(&path);
        assert_eq!(reader.list_items().unwrap().len(), 3);

        // Rewrite with one item; bump mtime explicitly in case the
        // filesystem clock is coarse.
        std::fs::write(
            &path,
            "### PRIORITY 1: Only one\n\n**Status**: 📝 Planned\n",
        )
        .unwrap();
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(2);
        let _ = std::fs::File::options()
            .append(true)
            .open(&path)
            .and_then(|f| f.set_times(std::fs::FileTimes::new().set_modified(future)));

        assert_eq!(reader.list_items().unwrap().len(), 1);
    }

    #[test]
    fn missing_roadmap_is_an_error() {
        let reader = RoadmapReader::new("/nonexistent/ROADMAP.md");
        assert!(reader.list_items().is_err());
    }
}
