//! Open text documents

use crate::server::line_index::LineIndex;
use lsp_types::{TextDocumentContentChangeEvent, TextDocumentItem, Uri};

/// One buffer as last reported by the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub uri: Uri,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

impl TextDocument {
    pub fn new(item: TextDocumentItem) -> Self {
        Self {
            uri: item.uri,
            language_id: item.language_id,
            version: item.version,
            text: item.text,
        }
    }

    /// Apply `didChange` content changes in order
    pub fn apply_changes(&mut self, version: i32, changes: Vec<TextDocumentContentChangeEvent>) {
        for change in changes {
            self.apply_change(change);
        }
        self.version = version;
    }

    fn apply_change(&mut self, change: TextDocumentContentChangeEvent) {
        let Some(range) = change.range else {
            self.text = change.text;
            return;
        };

        let (start, end) = {
            let index = LineIndex::new(&self.text);
            let start = index.offset(range.start);
            let end = index.offset(range.end);
            (start.min(end), start.max(end))
        };

        self.text.replace_range(start..end, &change.text);
    }
}
