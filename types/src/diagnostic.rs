//! Editor-facing diagnostics in protocol coordinates (0-based).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::log::{Level, Location, SourcePosition};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from protocol numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    /// Severity for a pipeline log level; levels without a counterpart map to `None`.
    #[must_use]
    pub fn from_level(level: Level) -> Option<Self> {
        match level {
            Level::Error => Some(Self::Error),
            Level::Warning => Some(Self::Warning),
            Level::Information => Some(Self::Information),
            Level::Notice => Some(Self::Hint),
            Level::Debug | Level::Output => None,
        }
    }
}

impl Serialize for DiagnosticSeverity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for DiagnosticSeverity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u64::deserialize(deserializer)?;
        Self::from_lsp(value).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid diagnostic severity {value}"))
        })
    }
}

/// 0-based line and character offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    /// Convert a 1-based source position. A zero coordinate clamps to 0.
    #[must_use]
    pub const fn from_source(position: SourcePosition) -> Self {
        Self {
            line: position.line.saturating_sub(1),
            character: position.column.saturating_sub(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

impl From<&Location> for Range {
    fn from(location: &Location) -> Self {
        Self {
            start: Position::from_source(location.begin),
            end: Position::from_source(location.end),
        }
    }
}

/// A range-anchored problem report, serialized in protocol shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<DiagnosticSeverity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(range: Range, message: impl Into<String>) -> Self {
        Self {
            range,
            severity: None,
            source: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Option<DiagnosticSeverity>) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}
