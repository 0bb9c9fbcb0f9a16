//! code_searcher - long-interval repository analysis.
//!
//! Once per (daily) tick it walks the source tree and writes a snapshot the
//! architect reads when judging reuse: file counts per extension, line
//! totals, and the largest files. Read-only everywhere except its own
//! analysis output.

use super::Ticker;
use crate::bus::Message;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use tracing::{info, warn};

/// Walk cap - keeps one tick bounded even on a pathological tree.
const MAX_FILES: usize = 20_000;

const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", "dist", ".venv"];

#[derive(Default)]
struct Snapshot {
    files: usize,
    lines: usize,
    by_extension: std::collections::BTreeMap<String, usize>,
    largest: Vec<(usize, String)>,
}

pub struct CodeSearcher;

impl CodeSearcher {
    pub fn new() -> Self {
        Self
    }

    pub async fn tick(&mut self, t: &mut Ticker<'_>) -> Result<()> {
        t.set_task(Some(serde_json::json!({
            "type": "code_analysis",
            "status": "working",
            "started_at": Utc::now().to_rfc3339(),
        })))?;

        let mut snapshot = Snapshot::default();
        walk(&t.ctx.config.repo_path, &mut snapshot)?;
        snapshot.largest.sort_by(|a, b| b.0.cmp(&a.0));
        snapshot.largest.truncate(10);

        let out_dir = t.ctx.config.data_dir.join("analysis");
        std::fs::create_dir_all(&out_dir).context("create analysis dir")?;
        let path = out_dir.join("code_analysis.md");
        std::fs::write(&path, render(&snapshot))?;

        info!(
            files = snapshot.files,
            lines = snapshot.lines,
            path = %path.display(),
            "analysis snapshot written"
        );
        t.incr_metric("analyses_created");
        t.set_metric("files_scanned", serde_json::json!(snapshot.files));
        t.set_task(None)?;
        Ok(())
    }

    pub async fn handle_message(&mut self, _t: &mut Ticker<'_>, msg: &Message) -> Result<()> {
        warn!(kind = %msg.kind, "unknown message kind - ignoring");
        Ok(())
    }
}

impl Default for CodeSearcher {
    fn default() -> Self {
        Self::new()
    }
}

fn walk(dir: &Path, snapshot: &mut Snapshot) -> Result<()> {
    if snapshot.files >= MAX_FILES {
        return Ok(());
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if SKIP_DIRS.contains(&name.as_ref()) || name.starts_with('.') {
                continue;
            }
            walk(&path, snapshot)?;
        } else if path.is_file() {
            if snapshot.files >= MAX_FILES {
                return Ok(());
            }
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue; // binary or unreadable
            };
            let lines = contents.lines().count();
            snapshot.files += 1;
            snapshot.lines += lines;
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string();
            *snapshot.by_extension.entry(ext).or_insert(0) += 1;
            snapshot.largest.push((lines, path.display().to_string()));
        }
    }
    Ok(())
}

fn render(snapshot: &Snapshot) -> String {
    let mut out = format!(
        "# Code analysis snapshot\n\nGenerated: {}\n\nFiles: {}\nLines: {}\n\n## By extension\n\n",
        Utc::now().to_rfc3339(),
        snapshot.files,
        snapshot.lines,
    );
    for (ext, count) in &snapshot.by_extension {
        out.push_str(&format!("- `{ext}`: {count}\n"));
    }
    out.push_str("\n## Largest files\n\n");
    for (lines, path) in &snapshot.largest {
        out.push_str(&format!("- {path} ({lines} lines)\n"));
    }
    out
}
