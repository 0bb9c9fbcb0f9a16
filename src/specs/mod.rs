//! Spec store - technical specifications attached to roadmap items.
//!
//! One markdown file per item under the specs directory, named
//! `SPEC-{number}-{slug}.md`. Section subsets are addressed by `/section`
//! paths that resolve against the document's `##` headings.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::info;

static SECTION_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\w+)").expect("valid section path regex"));

#[derive(Debug, Clone)]
pub struct Spec {
    pub item_number: String,
    pub path: PathBuf,
    pub content: String,
}

pub struct SpecStore {
    dir: PathBuf,
}

impl SpecStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Look up the spec for a roadmap item, if one exists.
    pub fn find(&self, item_number: &str) -> Result<Option<Spec>> {
        if !self.dir.exists() {
            return Ok(None);
        }
        let prefix = format!("SPEC-{item_number}-");
        let exact = format!("SPEC-{item_number}.md");
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == exact || (name.starts_with(&prefix) && name.ends_with(".md")) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("read spec {}", path.display()))?;
                return Ok(Some(Spec {
                    item_number: item_number.to_string(),
                    path,
                    content,
                }));
            }
        }
        Ok(None)
    }

    /// Write (or overwrite) the spec for an item. Returns the file path.
    pub fn put(&self, item_number: &str, title: &str, content: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("SPEC-{item_number}-{}.md", slugify(title)));
        std::fs::write(&path, content)?;
        info!(item = item_number, path = %path.display(), "spec written");
        Ok(path)
    }

    /// Titles of every stored spec - input to the architect's reuse check.
    pub fn list_titles(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut titles = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with("SPEC-") && name.ends_with(".md") {
                    titles.push(name.trim_end_matches(".md").to_string());
                }
            }
        }
        titles.sort();
        Ok(titles)
    }
}

/// Extract the `/path`-addressed subset of a spec's markdown.
///
/// A scope like `"Phase 2: /design, /implementation"` resolves each `/name`
/// against the document's `## ` headings (case-insensitive, spaces as
/// underscores). With no paths in the scope, the full content is returned.
pub fn extract_sections(content: &str, scope_description: &str) -> String {
    let wanted: Vec<String> = SECTION_PATH_RE
        .captures_iter(scope_description)
        .map(|c| c[1].to_lowercase())
        .collect();
    if wanted.is_empty() {
        return content.to_string();
    }

    let mut out: Vec<String> = Vec::new();
    let mut keep = false;
    for line in content.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            let key = heading.trim().to_lowercase().replace([' ', '-'], "_");
            keep = wanted.iter().any(|w| *w == key);
            if keep {
                out.push(line.to_string());
            }
            continue;
        }
        if keep {
            out.push(line.to_string());
        }
    }
    out.join("\n")
}

fn slugify(title: &str) -> String {
    let mut slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    slug.trim_matches('-').chars().take(48).collect()
}
