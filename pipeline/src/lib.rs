//! Analysis pipeline contract.
//!
//! The pipeline is an external, staged engine (parse, resolve, type-check,
//! execute). passd only ever hands it an in-memory document plus a named stage
//! set, then reads back the captured console output and a drainable stream of
//! structured log items.

mod command;

pub use command::{CommandPipeline, CommandSpec};

use std::future::Future;
use std::io;
use std::pin::Pin;

use passd_types::{Document, LogItem};

/// Pipeline execution future type alias.
pub type PipelineFut<'a> = Pin<Box<dyn Future<Output = PipelineRun> + Send + 'a>>;

const CHECK_STAGES: &[&str] = &["parse", "resolve", "type-check", "consistency-check"];

const EXECUTE_STAGES: &[&str] = &[
    "parse",
    "resolve",
    "type-check",
    "consistency-check",
    "frame-size",
    "numeric-execution",
];

const TRACE_STAGES: &[&str] = &[
    "parse",
    "resolve",
    "type-check",
    "consistency-check",
    "frame-size",
    "symbolic-execution",
];

/// Named set of stages to run over a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSet {
    /// Diagnostics only.
    Check,
    /// Check, then concrete (numeric) execution.
    Execute,
    /// Check, then symbolic execution.
    Trace,
}

impl StageSet {
    #[must_use]
    pub const fn stages(self) -> &'static [&'static str] {
        match self {
            Self::Check => CHECK_STAGES,
            Self::Execute => EXECUTE_STAGES,
            Self::Trace => TRACE_STAGES,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Execute => "execute",
            Self::Trace => "trace",
        }
    }

    /// Whether the set ends in an execution stage that produces console output.
    #[must_use]
    pub const fn executes(self) -> bool {
        !matches!(self, Self::Check)
    }
}

/// Input to a single pipeline run.
///
/// The document is injected as the run's already-loaded input, so the
/// pipeline never touches the file system to find it.
#[derive(Debug, Clone)]
pub struct Invocation {
    document: Document,
    stages: StageSet,
}

impl Invocation {
    #[must_use]
    pub fn new(document: Document, stages: StageSet) -> Self {
        Self { document, stages }
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    #[must_use]
    pub fn stages(&self) -> StageSet {
        self.stages
    }
}

/// Log items produced during a run, in emission order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogStream {
    items: Vec<LogItem>,
}

impl LogStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: LogItem) {
        self.items.push(item);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take every buffered item, leaving the stream empty.
    pub fn drain(&mut self) -> Vec<LogItem> {
        std::mem::take(&mut self.items)
    }
}

impl FromIterator<LogItem> for LogStream {
    fn from_iter<T: IntoIterator<Item = LogItem>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Outcome of a pipeline run.
///
/// A failed run still carries whatever was logged and printed before the
/// failure.
#[derive(Debug, Default)]
pub struct PipelineRun {
    pub log: LogStream,
    pub stdout: String,
    pub failure: Option<PipelineError>,
}

impl PipelineRun {
    #[must_use]
    pub fn completed(log: LogStream, stdout: String) -> Self {
        Self {
            log,
            stdout,
            failure: None,
        }
    }

    #[must_use]
    pub fn failed(log: LogStream, stdout: String, error: PipelineError) -> Self {
        Self {
            log,
            stdout,
            failure: Some(error),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{command} not found in PATH")]
    NotFound { command: String },
    #[error("spawning {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("pipeline I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("{command} exited with {status}")]
    Failed { command: String, status: String },
    #[error("pipeline stage {stage} raised: {message}")]
    Stage { stage: String, message: String },
}

/// A staged analysis engine.
pub trait Pipeline: Send + Sync {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> PipelineFut<'a>;
}
