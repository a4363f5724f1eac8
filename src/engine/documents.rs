//! Insertion-ordered metadata table for indexed documents.

use super::types::{DocumentSummary, LoadedDocument};
use std::collections::HashMap;
use std::path::Path;

const PREVIEW_CHARS: usize = 200;
const EMPTY_PREVIEW: &str = "No text content available";

/// Document records keyed by id, listed in first-insertion order.
#[derive(Debug, Default)]
pub struct DocumentTable {
    order: Vec<String>,
    records: HashMap<String, DocumentSummary>,
}

impl DocumentTable {
    /// Insert or replace a record. A replaced record keeps its original position.
    pub fn upsert(&mut self, record: DocumentSummary) {
        if !self.records.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
    }

    /// Records in insertion order.
    pub fn snapshot(&self) -> Vec<DocumentSummary> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }
}

/// Build the metadata record for a freshly loaded document.
pub fn describe(doc_id: &str, path: &Path, document: &LoadedDocument) -> DocumentSummary {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let title = document
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| filename.clone());

    DocumentSummary {
        id: doc_id.to_string(),
        title,
        preview: build_preview(&document.text),
        length: document.text.chars().count(),
        filename,
    }
}

/// Excerpt of at most 200 characters, trimmed back to a word boundary when cut.
pub fn build_preview(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return EMPTY_PREVIEW.to_string();
    }
    if normalized.chars().count() <= PREVIEW_CHARS {
        return normalized;
    }

    let cut: String = normalized.chars().take(PREVIEW_CHARS).collect();
    let head = match cut.rsplit_once(' ') {
        Some((head, _)) if !head.is_empty() => head,
        _ => cut.as_str(),
    };
    format!("{head}...")
}
