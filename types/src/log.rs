//! Structured log items emitted by the analysis pipeline.
//!
//! A [`LogItem`] is one leveled entry; its body is an ordered list of
//! [`SubItem`]s. Location sub-items anchor the entry in the analyzed source and
//! are what later turn into editor diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity level of a log item, as reported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warning,
    #[serde(alias = "info", alias = "informational")]
    Information,
    Notice,
    Debug,
    /// Console output forwarded through the log stream.
    Output,
}

impl Level {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Notice => "notice",
            Self::Debug => "debug",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A source range in 1-based coordinates, optionally naming its file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub begin: SourcePosition,
    pub end: SourcePosition,
}

impl Location {
    #[must_use]
    pub const fn new(begin: SourcePosition, end: SourcePosition) -> Self {
        Self {
            file: None,
            begin,
            end,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{file}:")?;
        }
        write!(
            f,
            "{}:{}..{}:{}",
            self.begin.line, self.begin.column, self.end.line, self.end.column
        )
    }
}

/// One fragment of a log item's body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SubItem {
    Text { text: String },
    /// Stable error/warning code assigned by the pipeline stage.
    Code { code: String },
    Location(Location),
}

impl SubItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn code(code: impl Into<String>) -> Self {
        Self::Code { code: code.into() }
    }

    #[must_use]
    pub fn is_location(&self) -> bool {
        matches!(self, Self::Location(_))
    }

    /// Plain-text rendering of this fragment.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Code { code } => format!("[{code}]"),
            Self::Location(location) => location.to_string(),
        }
    }
}

/// One leveled entry of the pipeline's log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogItem {
    pub level: Level,
    /// Stage or subsystem that produced the entry (e.g. "type-check").
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub items: Vec<SubItem>,
}

impl LogItem {
    pub fn new(level: Level, category: impl Into<String>) -> Self {
        Self {
            level,
            category: category.into(),
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.items.push(SubItem::text(text));
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.items.push(SubItem::code(code));
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.items.push(SubItem::Location(location));
        self
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.items.iter().filter_map(|item| match item {
            SubItem::Location(location) => Some(location),
            _ => None,
        })
    }
}
