use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One documentation page in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocPage {
    /// Path relative to the documentation root, forward slashes.
    pub path: String,
    pub title: String,
    /// Heading texts (levels 1–3) in document order.
    pub sections: Vec<String>,
    /// First paragraph, markdown-stripped, truncated.
    pub summary: String,
    pub last_updated: Option<DateTime<Utc>>,
}

/// The filtered catalog of the documentation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocIndex {
    pub pages: Vec<DocPage>,
    /// Category name → page paths, derived from top-level directories.
    pub categories: BTreeMap<String, Vec<String>>,
    pub generated_at: DateTime<Utc>,
}

impl DocIndex {
    /// Whether `page` names an indexed page.
    pub fn has_page(&self, page: &str) -> bool {
        self.pages.iter().any(|p| p.path == page)
    }

    pub fn page(&self, page: &str) -> Option<&DocPage> {
        self.pages.iter().find(|p| p.path == page)
    }

    /// Whether `page` looks like a plausible new page: a relative markdown
    /// path under an existing category directory (or the root).
    pub fn plausible_new_page(&self, page: &str) -> bool {
        if !page.ends_with(".md") || page.starts_with('/') || page.contains("..") {
            return false;
        }
        match page.split('/').next() {
            // Root-level page.
            Some(first) if first == page => true,
            Some(first) => self
                .pages
                .iter()
                .any(|p| p.path.split('/').next() == Some(first)),
            None => false,
        }
    }
}
