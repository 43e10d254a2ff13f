//! Turns the pipeline's log stream into editor diagnostics.

use std::collections::HashSet;

use passd_types::{Diagnostic, DiagnosticSeverity, LogItem, Range, SubItem};
use sha2::{Digest, Sha256};

/// Single-use visitor over one analysis run's log items.
///
/// Every distinct (message, location) pair becomes exactly one [`Diagnostic`];
/// repeats within the same formatter are dropped. Construct a fresh formatter
/// per run so one document's history never suppresses another's.
pub struct DiagnosticFormatter {
    source: String,
    seen: HashSet<[u8; 32]>,
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticFormatter {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            seen: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    /// `"{source}: {level}: {fragment}, {fragment}"`, locations excluded.
    #[must_use]
    pub fn message(&self, item: &LogItem) -> String {
        let fragments: Vec<String> = item
            .items
            .iter()
            .filter(|sub| !sub.is_location())
            .map(SubItem::render)
            .collect();
        format!("{}: {}: {}", self.source, item.level, fragments.join(", "))
    }

    /// Render `item`, recording one diagnostic per new location it carries.
    ///
    /// Returns the message followed by one line per location.
    pub fn visit(&mut self, item: &LogItem) -> String {
        let message = self.message(item);
        let severity = DiagnosticSeverity::from_level(item.level);
        let mut rendered = message.clone();

        for location in item.locations() {
            let line = location.to_string();
            rendered.push('\n');
            rendered.push_str(&line);

            if !self.seen.insert(content_hash(&message, &line)) {
                tracing::trace!("dropping repeated diagnostic at {line}");
                continue;
            }
            self.diagnostics.push(
                Diagnostic::new(Range::from(location), message.clone())
                    .with_severity(severity)
                    .with_source(self.source.clone()),
            );
        }

        rendered
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    #[must_use]
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

fn content_hash(message: &str, location: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(b"\n");
    hasher.update(location.as_bytes());
    hasher.finalize().into()
}
