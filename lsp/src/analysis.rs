//! Runs the pipeline over one document and collects what it reported.

use passd_pipeline::{Invocation, Pipeline, StageSet};
use passd_types::{Diagnostic, Document, DocumentUri, Level, LogItem};

use crate::diagnostics::DiagnosticFormatter;
use crate::protocol::{self, Notification};

/// Result of one analysis run.
#[derive(Debug)]
pub struct Analysis {
    pub uri: DocumentUri,
    pub diagnostics: Vec<Diagnostic>,
    /// Console output of execute stages.
    pub stdout: String,
}

impl Analysis {
    /// The `publishDiagnostics` notification replacing this document's diagnostics.
    pub fn notification(&self) -> Result<Notification, serde_json::Error> {
        protocol::publish_diagnostics(self.uri.clone(), self.diagnostics.clone())
    }
}

/// Run `stages` over `document`. Never fails: a pipeline error is logged and
/// becomes a location-less warning log item.
pub async fn analyze(
    pipeline: &dyn Pipeline,
    source: &str,
    document: &Document,
    stages: StageSet,
) -> Analysis {
    let invocation = Invocation::new(document.clone(), stages);
    let mut run = pipeline.run(&invocation).await;

    let mut items = run.log.drain();
    if let Some(err) = run.failure.take() {
        tracing::warn!(
            uri = %document.uri(),
            stages = stages.name(),
            "pipeline run failed: {err}"
        );
        items.push(LogItem::new(Level::Warning, "pipeline").with_text(err.to_string()));
    }

    let mut formatter = DiagnosticFormatter::new(source);
    for item in &items {
        let rendered = formatter.visit(item);
        tracing::debug!(uri = %document.uri(), "{rendered}");
    }

    Analysis {
        uri: document.uri().clone(),
        diagnostics: formatter.into_diagnostics(),
        stdout: run.stdout,
    }
}
