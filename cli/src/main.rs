//! passd - binary entry point.
//!
//! ```text
//! main() -> Cli::try_parse() -> Settings -> PassdConfig -> init_tracing()
//!                                                |
//!                                                v
//!                 Transport::open(endpoint) -> serve(transport, session)
//! ```
//!
//! Exit codes: 0 on a normal run or an informational flag, 1 when the
//! arguments cannot be parsed, 2 for a missing or conflicting mode/connection
//! or an unusable configuration, 3 when the transport cannot be opened.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use passd_config::PassdConfig;
use passd_lsp::{Endpoint, ServeExit, Session, SessionOptions, Transport, TransportError, serve};
use passd_lsp::version;
use passd_pipeline::{CommandPipeline, CommandSpec};

const EXIT_USAGE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_TRANSPORT: u8 = 3;

const LOG_ENV: &str = "PASSD_LOG";

#[derive(Parser, Debug)]
#[command(name = "passd", about = version::DESCRIPTION, disable_version_flag = true)]
struct Cli {
    /// Operating mode (exactly one)
    #[arg(value_enum, value_name = "MODE")]
    modes: Vec<Mode>,

    /// Use a standard input/output stream connection
    #[arg(long, action = ArgAction::Count)]
    stdio: u8,

    /// Use a TCP IPv4 socket stream connection
    #[arg(long, value_name = "HOST:PORT")]
    tcp4: Vec<String>,

    /// Use a UDP IPv4 datagram connection
    #[arg(long, value_name = "HOST:PORT")]
    udp4: Vec<String>,

    /// Configuration file (default: ~/.passd/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Append logs to this file instead of standard error
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Display version information
    #[arg(short = 'v', long)]
    version: bool,

    /// Display the unique test profile identifier
    #[arg(short = 't', long)]
    test_case_profile: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Language server protocol
    Lsp,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
enum SettingsError {
    #[error("no mode provided, please see --help for more information")]
    NoMode,
    #[error("more than one mode provided, only use one mode")]
    TooManyModes,
    #[error("too many connection kinds provided, only use one kind")]
    TooManyConnections,
}

/// Validated invocation.
#[derive(Debug, PartialEq, Eq)]
struct Settings {
    mode: Mode,
    endpoint: Endpoint,
    /// No connection option was given and stdio was chosen.
    defaulted: bool,
}

impl Settings {
    fn from_cli(cli: &Cli) -> Result<Self, SettingsError> {
        let mode = match cli.modes.as_slice() {
            [] => return Err(SettingsError::NoMode),
            [mode] => *mode,
            _ => return Err(SettingsError::TooManyModes),
        };

        let mut endpoints: Vec<Endpoint> = (0..cli.stdio).map(|_| Endpoint::Stdio).collect();
        endpoints.extend(cli.tcp4.iter().cloned().map(Endpoint::Tcp4));
        endpoints.extend(cli.udp4.iter().cloned().map(Endpoint::Udp4));

        match endpoints.len() {
            0 => Ok(Self {
                mode,
                endpoint: Endpoint::Stdio,
                defaulted: true,
            }),
            1 => Ok(Self {
                mode,
                endpoint: endpoints.remove(0),
                defaulted: false,
            }),
            _ => Err(SettingsError::TooManyConnections),
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PassdConfig> {
    match path {
        Some(path) => Ok(PassdConfig::load_from(path)?),
        None => Ok(PassdConfig::load()?.unwrap_or_default()),
    }
}

fn init_tracing(config: &PassdConfig, log_file: Option<&Path>) -> Result<()> {
    let configured = config.log.filter.as_deref().unwrap_or("info");
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(configured))
        .with_context(|| format!("invalid log filter {configured:?}"))?;

    let Some(path) = log_file.or(config.log.file.as_deref()) else {
        // Standard output is the protocol channel in stdio mode.
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
        return Ok(());
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log dir {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .with(env_filter)
        .init();

    tracing::info!(path = %path.display(), "Logging initialized");
    Ok(())
}

fn pipeline_from_config(config: &PassdConfig) -> CommandPipeline {
    let pipeline = &config.pipeline;
    CommandPipeline::new(CommandSpec {
        command: pipeline.resolved_command(),
        args: pipeline.resolved_args(),
        env: pipeline.resolved_env(),
    })
}

fn session_options(config: &PassdConfig) -> SessionOptions {
    SessionOptions {
        source: config.session.source.clone(),
        run_document: config.session.run_document.as_str().into(),
        ..SessionOptions::default()
    }
}

async fn run_lsp(endpoint: &Endpoint, config: &PassdConfig) -> Result<ServeExit, TransportError> {
    let mut transport = Transport::open(endpoint).await?;
    let mut session = Session::new(
        Box::new(pipeline_from_config(config)),
        session_options(config),
    );

    let exit = serve(&mut transport, &mut session).await;
    if let Err(err) = transport.close().await {
        tracing::debug!("closing transport: {err}");
    }
    Ok(exit)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help output is not an error.
            let code = if err.use_stderr() { EXIT_USAGE } else { 0 };
            if let Err(print_err) = err.print() {
                eprintln!("passd: error: {err} ({print_err})");
            }
            return ExitCode::from(code);
        }
    };

    if cli.version {
        println!("{}", version::banner("passd"));
        return ExitCode::SUCCESS;
    }
    if cli.test_case_profile {
        println!("{}", version::test_case_profile());
        return ExitCode::SUCCESS;
    }

    let settings = match Settings::from_cli(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("passd: error: {err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let config = match load_config(cli.config.as_deref())
        .and_then(|config| init_tracing(&config, cli.log_file.as_deref()).map(|()| config))
    {
        Ok(config) => config,
        Err(err) => {
            eprintln!("passd: error: {err:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if settings.defaulted {
        tracing::info!("no connection provided, using '--stdio'");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building async runtime")
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!("{err:#}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match settings.mode {
        Mode::Lsp => runtime.block_on(run_lsp(&settings.endpoint, &config)),
    };

    match outcome {
        Ok(exit) => {
            tracing::info!(?exit, "passd stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("{err}");
            eprintln!("passd: error: {err}");
            ExitCode::from(EXIT_TRANSPORT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    fn settings(args: &[&str]) -> Result<Settings, SettingsError> {
        let cli = Cli::try_parse_from(std::iter::once("passd").chain(args.iter().copied()))
            .expect("arguments parse");
        Settings::from_cli(&cli)
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stdio_is_the_default_connection() {
        let defaulted = settings(&["lsp"]).unwrap();
        assert_eq!(defaulted.mode, Mode::Lsp);
        assert_eq!(defaulted.endpoint, Endpoint::Stdio);
        assert!(defaulted.defaulted);
    }

    #[test]
    fn single_connection_is_selected() {
        let tcp = settings(&["lsp", "--tcp4", "127.0.0.1:7000"]).unwrap();
        assert_eq!(tcp.endpoint, Endpoint::Tcp4("127.0.0.1:7000".into()));
        assert!(!tcp.defaulted);

        let udp = settings(&["--udp4=0.0.0.0:7001", "lsp"]).unwrap();
        assert_eq!(udp.endpoint, Endpoint::Udp4("0.0.0.0:7001".into()));
    }

    #[test]
    fn missing_or_repeated_mode_is_rejected() {
        assert_eq!(settings(&[]), Err(SettingsError::NoMode));
        assert_eq!(settings(&["lsp", "lsp"]), Err(SettingsError::TooManyModes));
    }

    #[test]
    fn conflicting_connections_are_rejected() {
        assert_eq!(
            settings(&["lsp", "--stdio", "--tcp4", "127.0.0.1:7000"]),
            Err(SettingsError::TooManyConnections)
        );
        assert_eq!(
            settings(&["lsp", "--stdio", "--stdio"]),
            Err(SettingsError::TooManyConnections)
        );
    }

    #[test]
    fn unknown_mode_and_flags_fail_to_parse() {
        let err = Cli::try_parse_from(["passd", "dap"]).unwrap_err();
        assert!(err.use_stderr());
        let err = Cli::try_parse_from(["passd", "lsp", "--tcp6", "::1:1"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn help_is_not_an_error() {
        let err = Cli::try_parse_from(["passd", "-h"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert!(!err.use_stderr());
    }

    #[test]
    fn informational_flags_parse_without_mode() {
        let cli = Cli::try_parse_from(["passd", "-v"]).unwrap();
        assert!(cli.version);
        let cli = Cli::try_parse_from(["passd", "--test-case-profile"]).unwrap();
        assert!(cli.test_case_profile);
    }

    #[test]
    fn session_options_follow_config() {
        let config = PassdConfig::parse(
            "[session]\nsource = \"casmd\"\nrun_document = \"inmemory://model.casm\"",
        )
        .unwrap();
        let options = session_options(&config);
        assert_eq!(options.source, "casmd");
        assert_eq!(options.run_document.as_str(), "inmemory://model.casm");
    }
}
