//! procswarm: run every process of a Procfile side by side.
//!
//! This is the entry point. It resolves settings from the command line, the
//! environment and an optional `procswarm.toml`, builds the process set, and
//! hands it to the supervisor together with a channel of OS termination
//! signals. The supervisor's aggregated status becomes our exit code.

mod config;
mod error;
mod events;
mod logging;
mod output;
mod procfile;
mod process;
mod runner;
mod shutdown;
#[cfg(test)]
mod testing;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::{FalseyValueParser, Styles};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::events::Signal;
use crate::logging::LogLevel;
use crate::output::OutputOptions;
use crate::runner::Supervisor;
use crate::shutdown::ExitMode;

const DEFAULT_PROCFILE: &str = "./Procfile";
const DEFAULT_CONFIG_FILE: &str = "procswarm.toml";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_PORT_STEP: u16 = 100;
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "procswarm",
    version,
    about = "Run the processes of a Procfile together, stop them together",
    styles = help_styles()
)]
struct Cli {
    /// Path to the Procfile, or `-` to read it from stdin [default: ./Procfile].
    #[arg(env = "PROCSWARM_PROCFILE")]
    procfile: Option<PathBuf>,
    /// Terminal title [default: name of the root directory].
    #[arg(short = 'w', long, env = "PROCSWARM_TITLE")]
    title: Option<String>,
    /// Comma-separated names of the processes to run [default: all].
    #[arg(short = 'l', long, env = "PROCSWARM_PROCESSES")]
    processes: Option<String>,
    /// Working directory of the processes [default: directory of the Procfile].
    #[arg(short = 'd', long, env = "PROCSWARM_ROOT")]
    root: Option<PathBuf>,
    /// Port given to the first process as PORT [default: 5000].
    #[arg(short = 'p', long, env = "PROCSWARM_PORT")]
    port: Option<u16>,
    /// Port increment between processes [default: 100].
    #[arg(short = 'P', long, env = "PROCSWARM_PORT_STEP")]
    port_step: Option<u16>,
    /// Seconds to wait after interrupting before killing [default: 5].
    #[arg(short = 't', long, env = "PROCSWARM_TIMEOUT")]
    timeout: Option<u64>,
    /// Do not prefix lines with the process name.
    #[arg(long, env = "PROCSWARM_NO_PREFIX", value_parser = FalseyValueParser::new())]
    no_prefix: bool,
    /// Prefix lines with the elapsed time.
    #[arg(short = 'T', long, env = "PROCSWARM_PRINT_TIMESTAMPS", value_parser = FalseyValueParser::new())]
    print_timestamps: bool,
    /// Exit with the highest exit code of all processes. Always the case;
    /// accepted for compatibility.
    #[allow(dead_code)]
    #[arg(short = 'x', long, env = "PROCSWARM_EXIT_WITH_HIGHEST", value_parser = FalseyValueParser::new())]
    exit_with_highest: bool,
    /// Keep running until every process succeeded; stop at the first failure.
    #[arg(short = 'j', long, env = "PROCSWARM_AS_JOB_RUNNER", value_parser = FalseyValueParser::new())]
    as_job_runner: bool,
    /// Path to a procswarm.toml settings file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any procswarm.toml in the current directory.
    #[arg(long)]
    no_config: bool,
    /// Diagnostic log level [default: $PROCSWARM_LOG or warn].
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level);
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("procswarm: {:#}", err);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let file_config = load_file_config(&cli)?;
    let settings = RunSettings::from_cli(&cli, file_config);
    debug!(?settings, "resolved settings");

    let source = procfile::read_source(&settings.procfile)?;
    let definitions = procfile::parse(&source, settings.port_base, settings.port_step)
        .with_context(|| format!("invalid Procfile {}", settings.procfile.display()))?;
    let selected = runner::select_processes(definitions, &settings.process_filter)?;
    let (output, processes) = runner::build_process_set(
        selected,
        &settings.root,
        OutputOptions {
            print_name: !settings.no_prefix,
            print_timestamp: settings.print_timestamps,
        },
    );
    if std::io::stdout().is_terminal() {
        output.set_title(&settings.title);
    }

    let (signal_tx, signal_rx) = mpsc::channel(8);
    spawn_signal_listener(signal_tx)?;

    let supervisor = Supervisor::new(processes, settings.mode, settings.timeout);
    Ok(supervisor.run(signal_rx).await)
}

fn load_file_config(cli: &Cli) -> Result<Config> {
    if cli.no_config {
        return Ok(Config::default());
    }
    let path = cli
        .config
        .clone()
        .or_else(default_config_path);
    match path {
        Some(path) => config::load_config(&path),
        None => Ok(Config::default()),
    }
}

fn default_config_path() -> Option<PathBuf> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

// Handlers are installed before returning so no early signal is lost.
fn spawn_signal_listener(tx: mpsc::Sender<Signal>) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint =
            signal(SignalKind::interrupt()).context("failed to listen for SIGINT")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
        let mut sighup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = sigint.recv() => Signal::Interrupt,
                    _ = sigterm.recv() => Signal::Terminate,
                    _ = sighup.recv() => Signal::Hangup,
                };
                info!(signal = %received, "termination requested");
                if tx.send(received).await.is_err() {
                    break;
                }
            }
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                info!(signal = %Signal::Interrupt, "termination requested");
                if tx.send(Signal::Interrupt).await.is_err() {
                    break;
                }
            }
        });
    }
    Ok(())
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Yellow.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Yellow.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Cyan.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

/// Runtime configuration derived from CLI arguments, environment and the
/// settings file. Built once, never changed afterwards.
#[derive(Debug, Clone)]
struct RunSettings {
    title: String,
    procfile: PathBuf,
    process_filter: Vec<String>,
    root: PathBuf,
    port_base: u16,
    port_step: u16,
    timeout: Duration,
    no_prefix: bool,
    print_timestamps: bool,
    mode: ExitMode,
}

impl RunSettings {
    fn from_cli(cli: &Cli, file: Config) -> Self {
        let procfile = cli
            .procfile
            .clone()
            .or(file.procfile.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROCFILE));
        let root = cli
            .root
            .clone()
            .or(file.root.map(PathBuf::from))
            .unwrap_or_else(|| default_root(&procfile));
        let title = cli
            .title
            .clone()
            .or(file.title)
            .unwrap_or_else(|| default_title(&root));
        let filter = cli.processes.clone().or(file.processes);
        let timeout_secs = cli
            .timeout
            .or(file.timeout)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let as_job_runner = cli.as_job_runner || file.as_job_runner.unwrap_or(false);
        Self {
            title,
            process_filter: runner::parse_filter(filter.as_deref()),
            root,
            port_base: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            port_step: cli.port_step.or(file.port_step).unwrap_or(DEFAULT_PORT_STEP),
            timeout: Duration::from_secs(timeout_secs),
            no_prefix: cli.no_prefix || file.no_prefix.unwrap_or(false),
            print_timestamps: cli.print_timestamps || file.print_timestamps.unwrap_or(false),
            mode: if as_job_runner {
                ExitMode::JobRunner
            } else {
                ExitMode::Primary
            },
            procfile,
        }
    }
}

/// Directory holding the Procfile; the current directory for stdin.
fn default_root(procfile: &Path) -> PathBuf {
    if procfile == Path::new("-") {
        return PathBuf::from(".");
    }
    match procfile.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn default_title(root: &Path) -> String {
    let resolved = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "procswarm".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // Parsing reads PROCSWARM_* variables; tests that set them must not race.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn try_cli(args: &[&str]) -> Result<Cli, clap::Error> {
        let mut argv = vec!["procswarm"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)
    }

    fn cli(args: &[&str]) -> Cli {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        try_cli(args).unwrap()
    }

    fn cli_with_env(var: &str, value: &str) -> Result<Cli, clap::Error> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::env::set_var(var, value);
        let parsed = try_cli(&[]);
        std::env::remove_var(var);
        parsed
    }

    #[test]
    fn env_flags_accept_numeric_and_word_values() {
        assert!(cli_with_env("PROCSWARM_AS_JOB_RUNNER", "1").unwrap().as_job_runner);
        assert!(cli_with_env("PROCSWARM_NO_PREFIX", "yes").unwrap().no_prefix);
        assert!(cli_with_env("PROCSWARM_PRINT_TIMESTAMPS", "true").unwrap().print_timestamps);
        assert!(cli_with_env("PROCSWARM_EXIT_WITH_HIGHEST", "t").is_ok());
    }

    #[test]
    fn env_flags_accept_false_values() {
        assert!(!cli_with_env("PROCSWARM_AS_JOB_RUNNER", "0").unwrap().as_job_runner);
        assert!(!cli_with_env("PROCSWARM_NO_PREFIX", "false").unwrap().no_prefix);
        assert!(!cli_with_env("PROCSWARM_PRINT_TIMESTAMPS", "off").unwrap().print_timestamps);
    }

    #[test]
    fn defaults_without_flags_or_file() {
        let settings = RunSettings::from_cli(&cli(&["--title", "t"]), Config::default());
        assert_eq!(settings.procfile, PathBuf::from("./Procfile"));
        assert_eq!(settings.root, PathBuf::from("."));
        assert_eq!(settings.port_base, 5000);
        assert_eq!(settings.port_step, 100);
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.mode, ExitMode::Primary);
        assert!(settings.process_filter.is_empty());
        assert!(!settings.no_prefix);
        assert!(!settings.print_timestamps);
    }

    #[test]
    fn flags_override_the_settings_file() {
        let file = Config {
            title: Some("from-file".to_string()),
            timeout: Some(3),
            port: Some(4000),
            processes: Some("db".to_string()),
            ..Config::default()
        };
        let settings = RunSettings::from_cli(
            &cli(&["-t", "9", "-l", "web, worker", "-j", "deploy/Procfile"]),
            file,
        );
        assert_eq!(settings.timeout, Duration::from_secs(9));
        assert_eq!(settings.process_filter, vec!["web", "worker"]);
        assert_eq!(settings.mode, ExitMode::JobRunner);
        assert_eq!(settings.port_base, 4000);
        assert_eq!(settings.title, "from-file");
        assert_eq!(settings.root, PathBuf::from("deploy"));
    }

    #[test]
    fn settings_file_fills_unset_flags() {
        let file = Config {
            root: Some("/srv/app".to_string()),
            as_job_runner: Some(true),
            no_prefix: Some(true),
            print_timestamps: Some(true),
            port_step: Some(1),
            ..Config::default()
        };
        let settings = RunSettings::from_cli(&cli(&["-w", "app"]), file);
        assert_eq!(settings.root, PathBuf::from("/srv/app"));
        assert_eq!(settings.mode, ExitMode::JobRunner);
        assert!(settings.no_prefix);
        assert!(settings.print_timestamps);
        assert_eq!(settings.port_step, 1);
    }

    #[test]
    fn stdin_procfile_runs_in_current_directory() {
        assert_eq!(default_root(Path::new("-")), PathBuf::from("."));
        assert_eq!(default_root(Path::new("Procfile")), PathBuf::from("."));
        assert_eq!(default_root(Path::new("/a/b/Procfile")), PathBuf::from("/a/b"));
    }

    #[test]
    fn title_defaults_to_root_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("storefront");
        std::fs::create_dir(&root).unwrap();
        assert_eq!(default_title(&root), "storefront");
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let cli = cli(&["--config", missing.to_str().unwrap()]);
        assert!(load_file_config(&cli).is_err());
    }

    #[test]
    fn no_config_skips_the_settings_file() {
        let cli = cli(&["--no-config", "--config", "/does/not/exist.toml"]);
        let config = load_file_config(&cli).unwrap();
        assert!(config.timeout.is_none());
    }
}
