use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use docsmith_core::config::DocIndexConfig;
use docsmith_store::types::DocIndexCacheEntry;
use docsmith_store::Store;

use crate::error::{IndexError, Result};
use crate::types::{DocIndex, DocPage};

/// Stable hash of the filter configuration — half of the cache key.
/// serde_json maps serialise in sorted key order, so the form is canonical.
pub fn config_hash(config: &DocIndexConfig) -> String {
    let canonical = serde_json::to_string(config).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Scan `docs_root` into a [`DocIndex`] according to the filter config.
pub fn generate_index(docs_root: &Path, config: &DocIndexConfig) -> Result<DocIndex> {
    let mut paths = collect_paths(docs_root, config)?;
    paths.sort();
    paths.dedup();

    let mut pages = Vec::new();
    for rel in paths {
        if pages.len() >= config.max_pages {
            debug!(max_pages = config.max_pages, "page cap reached, truncating index");
            break;
        }
        let abs = docs_root.join(&rel);
        let content = match std::fs::read_to_string(&abs) {
            Ok(c) => c,
            // Unreadable files are skipped, not fatal — the snapshot may
            // contain symlinks or binaries matching the globs.
            Err(e) => {
                debug!(path = %rel, error = %e, "skipping unreadable page");
                continue;
            }
        };

        let title = extract_title(&content, &rel);
        if is_title_excluded(&title, &config.exclude_titles) {
            continue;
        }

        let last_updated = std::fs::metadata(&abs)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        pages.push(DocPage {
            sections: extract_sections(&content, config.max_sections_per_page),
            summary: extract_summary(&content, config.max_summary_length),
            path: rel,
            title,
            last_updated,
        });
    }

    let categories = derive_categories(&pages);
    info!(pages = pages.len(), categories = categories.len(), "doc index generated");

    Ok(DocIndex {
        pages,
        categories,
        generated_at: Utc::now(),
    })
}

/// Render the flat prompt form of an index.
pub fn compact_text(index: &DocIndex, config: &DocIndexConfig) -> String {
    let mut out = String::new();
    for (category, paths) in &index.categories {
        out.push_str(&format!("## {category}\n"));
        for path in paths {
            let Some(page) = index.page(path) else { continue };
            out.push_str(&format!("- {} — {}", page.path, page.title));
            if config.compact_format.include_summaries && !page.summary.is_empty() {
                out.push_str(&format!(": {}", page.summary));
            }
            out.push('\n');
            if config.compact_format.include_sections && !page.sections.is_empty() {
                let shown: Vec<&str> = page
                    .sections
                    .iter()
                    .take(config.compact_format.max_sections_in_compact)
                    .map(String::as_str)
                    .collect();
                out.push_str(&format!("  sections: {}\n", shown.join("; ")));
            }
        }
    }
    out
}

/// Cache-aware access to the doc index: generate once per
/// `(commit_hash, config_hash)`, serve from the store afterwards.
pub struct DocIndexService {
    store: Arc<Store>,
    config: DocIndexConfig,
    docs_root: std::path::PathBuf,
}

impl DocIndexService {
    pub fn new(store: Arc<Store>, config: DocIndexConfig, docs_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            store,
            config,
            docs_root: docs_root.into(),
        }
    }

    /// The index for the given doc commit, generated on first request.
    pub fn get_or_generate(&self, commit_hash: &str) -> Result<(DocIndex, String)> {
        let cfg_hash = config_hash(&self.config);
        if let Some(entry) = self.store.docindex_cache_get(commit_hash, &cfg_hash)? {
            let index: DocIndex = serde_json::from_value(entry.index_data)?;
            return Ok((index, entry.compact_index_text));
        }

        let index = generate_index(&self.docs_root, &self.config)?;
        let compact = compact_text(&index, &self.config);
        self.store.docindex_cache_put(&DocIndexCacheEntry {
            commit_hash: commit_hash.to_string(),
            config_hash: cfg_hash,
            index_data: serde_json::to_value(&index)?,
            compact_index_text: compact.clone(),
            generated_at: Utc::now(),
        })?;
        Ok((index, compact))
    }

    /// Explicit sync: drop caches for other commits and rebuild this one.
    pub fn sync(&self, commit_hash: &str) -> Result<(DocIndex, String)> {
        self.store.docindex_cache_invalidate_except(commit_hash)?;
        let cfg_hash = config_hash(&self.config);
        // Rebuild even if a stale entry exists for this commit.
        let index = generate_index(&self.docs_root, &self.config)?;
        let compact = compact_text(&index, &self.config);
        self.store.docindex_cache_put(&DocIndexCacheEntry {
            commit_hash: commit_hash.to_string(),
            config_hash: cfg_hash,
            index_data: serde_json::to_value(&index)?,
            compact_index_text: compact.clone(),
            generated_at: Utc::now(),
        })?;
        Ok((index, compact))
    }
}

fn collect_paths(docs_root: &Path, config: &DocIndexConfig) -> Result<Vec<String>> {
    let mut excludes = Vec::new();
    for pattern in &config.exclude_globs {
        excludes.push(glob::Pattern::new(pattern).map_err(|e| IndexError::Glob {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?);
    }

    let mut rels = Vec::new();
    for pattern in &config.include_globs {
        let full = docs_root.join(pattern);
        let full_str = full.to_string_lossy().to_string();
        let matches = glob::glob(&full_str).map_err(|e| IndexError::Glob {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        for entry in matches.flatten() {
            if !entry.is_file() {
                continue;
            }
            let Ok(rel) = entry.strip_prefix(docs_root) else { continue };
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if excludes.iter().any(|p| p.matches(&rel_str)) {
                continue;
            }
            rels.push(rel_str);
        }
    }
    Ok(rels)
}

fn extract_title(content: &str, rel_path: &str) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(title) = trimmed.strip_prefix("# ") {
            return title.trim().to_string();
        }
    }
    // No H1 — fall back to the file stem.
    Path::new(rel_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string())
}

fn is_title_excluded(title: &str, blocklist: &[String]) -> bool {
    let needle = title.trim().to_lowercase();
    blocklist.iter().any(|t| t.trim().to_lowercase() == needle)
}

/// Heading texts for levels 1–3, in document order.
fn extract_sections(content: &str, max: usize) -> Vec<String> {
    let mut sections = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=3).contains(&hashes) {
            let text = trimmed[hashes..].trim();
            if !text.is_empty() {
                sections.push(text.to_string());
                if sections.len() >= max {
                    break;
                }
            }
        }
    }
    sections
}

/// First paragraph after the title, stripped of markdown markers and
/// truncated with an ellipsis.
fn extract_summary(content: &str, max_len: usize) -> String {
    let mut paragraph = String::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            if paragraph.is_empty() {
                continue;
            }
            break;
        }
        if trimmed.is_empty() {
            if paragraph.is_empty() {
                continue;
            }
            break;
        }
        if !paragraph.is_empty() {
            paragraph.push(' ');
        }
        paragraph.push_str(trimmed);
    }

    let stripped = strip_markdown(&paragraph);
    truncate_ellipsis(&stripped, max_len)
}

/// Remove inline markdown decoration: emphasis, code spans, link targets.
fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' | '_' | '`' => {}
            '[' => {
                // [text](url) → text
                let mut label = String::new();
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    label.push(inner);
                }
                if chars.peek() == Some(&'(') {
                    chars.next();
                    for inner in chars.by_ref() {
                        if inner == ')' {
                            break;
                        }
                    }
                }
                out.push_str(&label);
            }
            other => out.push(other),
        }
    }
    out.trim().to_string()
}

fn truncate_ellipsis(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len.saturating_sub(1)).collect();
    format!("{}…", truncated.trim_end())
}

/// Categories from the top-level directory segment, title-cased. Root-level
/// pages land in "General".
fn derive_categories(pages: &[DocPage]) -> BTreeMap<String, Vec<String>> {
    let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for page in pages {
        let category = match page.path.split_once('/') {
            Some((dir, _)) => title_case(dir),
            None => "General".to_string(),
        };
        categories.entry(category).or_default().push(page.path.clone());
    }
    categories
}

fn title_case(segment: &str) -> String {
    segment
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsmith_core::config::DocIndexConfig;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn sample_docs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "getting-started/install.md",
            "# Installation\n\nInstall the *client* with `cargo install`. See [docs](https://example.com).\n\n## From source\n\ntext\n\n## Binaries\n",
        );
        write(
            dir.path(),
            "reference/rpc.md",
            "# RPC Reference\n\nTimeouts, retries and connection settings for the RPC layer.\n\n## Timeouts\n\n### rpc_timeout\n",
        );
        write(dir.path(), "README.md", "# Changelog\n\nRelease notes live here.\n");
        write(dir.path(), "reference/draft.txt", "not markdown");
        dir
    }

    #[test]
    fn scans_filters_and_categorises() {
        let dir = sample_docs();
        let config = DocIndexConfig {
            exclude_titles: vec!["changelog".to_string()],
            ..DocIndexConfig::default()
        };
        let index = generate_index(dir.path(), &config).unwrap();

        // README excluded by title (case-insensitive), .txt never matched.
        let paths: Vec<_> = index.pages.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["getting-started/install.md", "reference/rpc.md"]);

        assert_eq!(
            index.categories.keys().collect::<Vec<_>>(),
            vec!["Getting Started", "Reference"]
        );

        let install = index.page("getting-started/install.md").unwrap();
        assert_eq!(install.title, "Installation");
        // Markdown stripped from the summary.
        assert_eq!(
            install.summary,
            "Install the client with cargo install. See docs."
        );
        assert_eq!(
            install.sections,
            vec!["Installation", "From source", "Binaries"]
        );
    }

    #[test]
    fn exclude_globs_apply() {
        let dir = sample_docs();
        let config = DocIndexConfig {
            exclude_globs: vec!["reference/**".to_string()],
            ..DocIndexConfig::default()
        };
        let index = generate_index(dir.path(), &config).unwrap();
        assert!(index.has_page("getting-started/install.md"));
        assert!(!index.has_page("reference/rpc.md"));
    }

    #[test]
    fn summary_truncates_with_ellipsis() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "long.md",
            "# Long\n\nThis paragraph is definitely longer than the configured summary budget for this test.\n",
        );
        let config = DocIndexConfig {
            max_summary_length: 20,
            ..DocIndexConfig::default()
        };
        let index = generate_index(dir.path(), &config).unwrap();
        let summary = &index.pages[0].summary;
        assert!(summary.ends_with('…'));
        assert!(summary.chars().count() <= 20);
    }

    #[test]
    fn compact_text_respects_format_flags() {
        let dir = sample_docs();
        let config = DocIndexConfig::default();
        let index = generate_index(dir.path(), &config).unwrap();
        let text = compact_text(&index, &config);
        assert!(text.contains("## Reference"));
        assert!(text.contains("- reference/rpc.md — RPC Reference:"));
        assert!(text.contains("sections: RPC Reference; Timeouts; rpc_timeout"));

        let no_sections = DocIndexConfig {
            compact_format: docsmith_core::config::CompactFormatConfig {
                include_summaries: false,
                include_sections: false,
                max_sections_in_compact: 8,
            },
            ..DocIndexConfig::default()
        };
        let text = compact_text(&index, &no_sections);
        assert!(!text.contains("sections:"));
        assert!(text.contains("- reference/rpc.md — RPC Reference\n"));
    }

    #[test]
    fn plausible_new_page_rules() {
        let dir = sample_docs();
        let index = generate_index(dir.path(), &DocIndexConfig::default()).unwrap();
        assert!(index.plausible_new_page("reference/streaming.md"));
        assert!(index.plausible_new_page("overview.md"));
        assert!(!index.plausible_new_page("unknown-dir/page.md"));
        assert!(!index.plausible_new_page("../escape.md"));
        assert!(!index.plausible_new_page("reference/notes.rst"));
    }

    #[test]
    fn cache_round_trip_and_sync() {
        let dir = sample_docs();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let service = DocIndexService::new(store.clone(), DocIndexConfig::default(), dir.path());

        let (index1, compact1) = service.get_or_generate("commit-a").unwrap();
        // Second call must come from the cache — delete the tree to prove it.
        drop(dir);
        let (index2, compact2) = service.get_or_generate("commit-a").unwrap();
        assert_eq!(index1.pages.len(), index2.pages.len());
        assert_eq!(compact1, compact2);

        // A different commit regenerates (and the tree is gone → empty).
        let (index3, _) = service.get_or_generate("commit-b").unwrap();
        assert!(index3.pages.is_empty());
    }
}
