//! In-memory text documents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Client-assigned document identifier.
///
/// Kept as the exact string the client sent; documents are never loaded from
/// disk, so no path normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentUri(String);

impl DocumentUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentUri {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentUri {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A document as last reported by the client.
///
/// `text` is always the complete content; changes replace it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    uri: DocumentUri,
    language_id: String,
    text: String,
    /// Client-supplied version number of `text`.
    revision: i32,
}

impl Document {
    pub fn new(
        uri: DocumentUri,
        language_id: impl Into<String>,
        text: impl Into<String>,
        revision: i32,
    ) -> Self {
        Self {
            uri,
            language_id: language_id.into(),
            text: text.into(),
            revision,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &DocumentUri {
        &self.uri
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn revision(&self) -> i32 {
        self.revision
    }

    /// Replace the full text and record the new revision.
    pub fn replace(&mut self, text: impl Into<String>, revision: i32) {
        self.text = text.into();
        self.revision = revision;
    }
}
