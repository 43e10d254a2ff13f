//! Core domain types for passd.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The pipeline, the protocol layer and the binary all speak in these types.

mod diagnostic;
mod document;
mod log;

pub use diagnostic::{Diagnostic, DiagnosticSeverity, Position, Range};
pub use document::{Document, DocumentUri};
pub use log::{Level, Location, LogItem, SourcePosition, SubItem};
