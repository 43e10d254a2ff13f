//! Pipeline backed by an external analyzer process.
//!
//! The child is driven as follows:
//! - arguments: the configured args, then `--stages <a,b,...>` and `--uri <uri>`
//! - stdin: the full document text, then EOF
//! - stdout: console output of the run, captured and returned as-is
//! - stderr: one JSON-encoded `LogItem` per line; any other line is kept as
//!   an `output`-level text item so nothing the analyzer says is lost

use std::io;
use std::process::Stdio;

use passd_types::{Level, LogItem};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{Invocation, LogStream, Pipeline, PipelineError, PipelineFut, PipelineRun};

/// How to launch the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

pub struct CommandPipeline {
    spec: CommandSpec,
}

impl CommandPipeline {
    #[must_use]
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    fn arguments(&self, invocation: &Invocation) -> Vec<String> {
        let mut args = self.spec.args.clone();
        args.push("--stages".to_string());
        args.push(invocation.stages().stages().join(","));
        args.push("--uri".to_string());
        args.push(invocation.document().uri().to_string());
        args
    }

    async fn execute(&self, invocation: &Invocation) -> PipelineRun {
        let command = &self.spec.command;
        let Ok(resolved) = which::which(command) else {
            return PipelineRun::failed(
                LogStream::new(),
                String::new(),
                PipelineError::NotFound {
                    command: command.clone(),
                },
            );
        };

        let mut cmd = Command::new(&resolved);
        cmd.args(self.arguments(invocation))
            .envs(self.spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            command = %resolved.display(),
            stages = invocation.stages().name(),
            uri = %invocation.document().uri(),
            "spawning pipeline"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                return PipelineRun::failed(
                    LogStream::new(),
                    String::new(),
                    PipelineError::Spawn {
                        command: command.clone(),
                        source,
                    },
                );
            }
        };

        let stdin = child.stdin.take();
        let text = invocation.document().text().as_bytes().to_vec();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&text).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), io::Error>(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        if let Err(e) = fed {
            // Analyzers that ignore stdin close it early; only the exit status matters then.
            tracing::debug!("pipeline did not consume document text: {e}");
        }

        let output = match output {
            Ok(output) => output,
            Err(e) => return PipelineRun::failed(LogStream::new(), String::new(), e.into()),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let log = parse_log(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            PipelineRun::completed(log, stdout)
        } else {
            PipelineRun::failed(
                log,
                stdout,
                PipelineError::Failed {
                    command: command.clone(),
                    status: output.status.to_string(),
                },
            )
        }
    }
}

impl Pipeline for CommandPipeline {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> PipelineFut<'a> {
        Box::pin(self.execute(invocation))
    }
}

fn parse_log(stderr: &str) -> LogStream {
    stderr.lines().filter_map(parse_log_line).collect()
}

fn parse_log_line(line: &str) -> Option<LogItem> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<LogItem>(trimmed) {
        Ok(item) => Some(item),
        Err(_) => Some(LogItem::new(Level::Output, "stderr").with_text(trimmed)),
    }
}
