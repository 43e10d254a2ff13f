//! Document store: the single owner of every open document's text.

use std::collections::HashMap;

use passd_types::{Document, DocumentUri};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("document {0} is already open")]
    AlreadyOpen(DocumentUri),
    #[error("document {0} is not open")]
    NotOpen(DocumentUri),
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    data: HashMap<DocumentUri, Document>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly opened document. An already-open URI keeps its current content.
    pub fn open(&mut self, document: Document) -> Result<&Document, DocumentError> {
        let uri = document.uri().clone();
        if self.data.contains_key(&uri) {
            return Err(DocumentError::AlreadyOpen(uri));
        }
        Ok(self.data.entry(uri).or_insert(document))
    }

    /// Replace the full text of an open document.
    pub fn change(
        &mut self,
        uri: &DocumentUri,
        text: String,
        revision: i32,
    ) -> Result<&Document, DocumentError> {
        let document = self
            .data
            .get_mut(uri)
            .ok_or_else(|| DocumentError::NotOpen(uri.clone()))?;
        document.replace(text, revision);
        Ok(document)
    }

    pub fn close(&mut self, uri: &DocumentUri) -> Result<Document, DocumentError> {
        self.data
            .remove(uri)
            .ok_or_else(|| DocumentError::NotOpen(uri.clone()))
    }

    #[must_use]
    pub fn get(&self, uri: &DocumentUri) -> Option<&Document> {
        self.data.get(uri)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
