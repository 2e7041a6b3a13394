//! Top-level CLI definition and dispatch.

use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use signal_hook::consts::TERM_SIGNALS;
use thiserror::Error;

use bfxdiag::app::dashboard::Dashboard;
use bfxdiag::cli::{live, style_color_name};
use bfxdiag::core::config::Config;
use bfxdiag::core::errors::{DiagError, ErrorKind};
use bfxdiag::dispatch::action::{Action, LocalContext};
use bfxdiag::dispatch::catalog;
use bfxdiag::dispatch::dispatcher::Dispatcher;
use bfxdiag::dispatch::remote::{RemoteTransport, WsmanTransport};
use bfxdiag::dispatch::target::{Secret, TargetSelector};
use bfxdiag::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use bfxdiag::logger::jsonl::JsonlConfig;
use bfxdiag::platform::pal::detect_platform;
use bfxdiag::platform::registry::{RegType, RegValue};
use bfxdiag::session::manager::{SessionManager, TickApplied};
use bfxdiag::session::scheduler::{TickReport, TickSink};
use bfxdiag::session::source::output_lines;
use bfxdiag::status::poller::run_all;
use bfxdiag::status::probe::parse_port_check;
use bfxdiag::status::snapshot::StatusSnapshot;
use bfxdiag::status::throttle::ThrottleToggler;
use bfxdiag::text::highlight::{HighlightRules, SharedRules, classify};

/// Environment variable holding the remote account password.
const PASSWORD_ENV: &str = "BFX_REMOTE_PASSWORD";

/// BigFix client diagnostics: log tailing, agent status and remediation actions.
#[derive(Debug, Parser)]
#[command(
    name = "bfxdiag",
    author,
    version,
    about = "BigFix client diagnostic dashboard",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Run actions on a remote host over WS-Man instead of locally.
    #[arg(long, global = true, value_name = "HOST")]
    remote: Option<String>,
    /// Account for the remote host; the password is read from BFX_REMOTE_PASSWORD.
    #[arg(long, global = true, value_name = "USER", requires = "remote")]
    user: Option<String>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Interactive live dashboard.
    Dashboard(DashboardArgs),
    /// Print (or follow) the end of a log file, or the newest subdirectories.
    Tail(TailArgs),
    /// Show every status-panel field once.
    Status,
    /// Probe a TCP or UDP port from the target host.
    CheckPort(CheckPortArgs),
    /// Stop then start the agent service.
    RestartService,
    /// Recreate the newest custom-site folder.
    ClearSiteCache,
    /// Stop the agent, empty its download cache, start it again.
    ClearAgentCache,
    /// Flip the throttling-exempt client setting.
    ToggleThrottle,
    /// Print the path of the newest agent log.
    LatestLog,
    /// Read and write registry values on the target.
    Registry(RegistryArgs),
    /// Show the effective configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DashboardArgs {
    /// Files to open as sessions at start.
    #[arg(long = "open", value_name = "PATH")]
    open: Vec<PathBuf>,
    /// Directories to open as sessions at start.
    #[arg(long = "watch-dir", value_name = "PATH")]
    watch_dirs: Vec<PathBuf>,
    /// Also open the newest agent log.
    #[arg(long)]
    latest_log: bool,
}

#[derive(Debug, Clone, Args)]
struct TailArgs {
    /// File (or directory with --dir) to read.
    path: PathBuf,
    /// Treat PATH as a directory and list its newest subdirectories.
    #[arg(long)]
    dir: bool,
    /// Keep refreshing until interrupted.
    #[arg(short, long)]
    follow: bool,
    /// Only print lines containing this text (case-insensitive).
    #[arg(long, value_name = "TEXT")]
    grep: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct CheckPortArgs {
    host: String,
    port: String,
    #[arg(long, default_value = "TCP")]
    protocol: String,
}

#[derive(Debug, Clone, Args)]
struct RegistryArgs {
    #[command(subcommand)]
    command: RegistryCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum RegistryCommand {
    /// Print one value.
    Get { key: String, name: String },
    /// Write one value.
    Set {
        key: String,
        name: String,
        value: String,
        /// REG_SZ, REG_EXPAND_SZ, REG_DWORD, REG_QWORD, REG_MULTI_SZ or REG_BINARY.
        #[arg(long = "type", default_value = "REG_SZ")]
        kind: String,
    },
    /// List subkeys and values of a key.
    List { key: String },
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path in use.
    Path,
    /// Print the effective configuration.
    Show,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or a missing target object.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure (network, process, filesystem).
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

impl From<DiagError> for CliError {
    fn from(err: DiagError) -> Self {
        let text = err.to_string();
        match err.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => Self::User(text),
            ErrorKind::Io | ErrorKind::Process | ErrorKind::Network => Self::Runtime(text),
            ErrorKind::Internal => Self::Internal(text),
        }
    }
}

// ──────────────────── runtime ────────────────────

/// Everything a command needs: config, logger, dispatcher.
struct Runtime {
    config: Arc<Config>,
    dispatcher: Dispatcher,
    logger: ActivityLoggerHandle,
    logger_join: Option<JoinHandle<()>>,
    started: Instant,
}

impl Runtime {
    fn build(cli: &Cli) -> Result<Self, CliError> {
        let config = Arc::new(Config::load(cli.config.as_deref())?);
        let hash = config.stable_hash()?;
        let (logger, join) = spawn_logger(ActivityLoggerConfig {
            jsonl_config: JsonlConfig::at(config.paths.activity_log.clone()),
            ..ActivityLoggerConfig::default()
        })?;
        logger.send(ActivityEvent::AppStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: hash,
        });

        let platform = detect_platform(&config)?;
        let transport: Arc<dyn RemoteTransport> = Arc::new(WsmanTransport::new(&config.remote)?);
        let selector = Arc::new(TargetSelector::new());
        if let Some(host) = &cli.remote {
            let user = cli
                .user
                .as_deref()
                .ok_or_else(|| CliError::User("--remote requires --user".to_string()))?;
            let password = env::var(PASSWORD_ENV)
                .map_err(|_| CliError::User(format!("{PASSWORD_ENV} is not set")))?;
            selector.set_remote(host, user, Secret::new(password))?;
            logger.send(ActivityEvent::TargetChanged {
                target: host.clone(),
            });
        }

        let dispatcher = Dispatcher::new(
            selector,
            LocalContext {
                platform,
                config: Arc::clone(&config),
            },
            transport,
            logger.clone(),
        );
        Ok(Self {
            config,
            dispatcher,
            logger,
            logger_join: Some(join),
            started: Instant::now(),
        })
    }

    fn execute(&self, action: &Action) -> Result<String, CliError> {
        Ok(self.dispatcher.execute(action)?)
    }

    fn target_label(&self) -> String {
        self.dispatcher.selector().snapshot().target.label().to_string()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.logger.send(ActivityEvent::AppStopped {
            uptime_secs: self.started.elapsed().as_secs(),
        });
        self.logger.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
        Command::Config(args) => run_config(cli, args),
        command => {
            let rt = Runtime::build(cli)?;
            match command {
                Command::Dashboard(args) => run_dashboard(&rt, args),
                Command::Tail(args) => run_tail(cli, &rt, args),
                Command::Status => run_status(cli, &rt),
                Command::CheckPort(args) => run_check_port(cli, &rt, args),
                Command::RestartService => {
                    run_action(cli, &rt, &catalog::restart_service(&rt.config.agent))
                }
                Command::ClearSiteCache => {
                    run_action(cli, &rt, &catalog::clear_site_cache(&rt.config.agent))
                }
                Command::ClearAgentCache => {
                    run_action(cli, &rt, &catalog::clear_agent_cache(&rt.config.agent))
                }
                Command::ToggleThrottle => run_toggle_throttle(cli, &rt),
                Command::LatestLog => run_action(cli, &rt, &catalog::latest_log(&rt.config.agent)),
                Command::Registry(args) => run_registry(cli, &rt, args),
                Command::Config(_) | Command::Completions(_) => Ok(()),
            }
        }
    }
}

// ──────────────────── one-shot actions ────────────────────

fn run_action(cli: &Cli, rt: &Runtime, action: &Action) -> Result<(), CliError> {
    let output = rt.execute(action)?;
    match output_mode(cli) {
        OutputMode::Human => {
            let mut stdout = io::stdout().lock();
            for line in output.lines() {
                writeln!(stdout, "{line}")?;
            }
            Ok(())
        }
        OutputMode::Json => write_json_line(&json!({
            "command": action.name(),
            "target": rt.target_label(),
            "output": output,
        })),
    }
}

fn run_check_port(cli: &Cli, rt: &Runtime, args: &CheckPortArgs) -> Result<(), CliError> {
    let check = parse_port_check(&args.host, &args.port, &args.protocol)?;
    let action = catalog::port_probe(check.protocol, &check.host, check.port, rt.config.probe_timeout());
    let output = rt.execute(&action)?;
    let state = output.trim();
    match output_mode(cli) {
        OutputMode::Human => {
            let shown = if state.eq_ignore_ascii_case("open") {
                state.green()
            } else {
                state.red()
            };
            println!("{} port {} on {}: {shown}", check.protocol, check.port, check.host);
            Ok(())
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "check-port",
            "target": rt.target_label(),
            "host": check.host,
            "port": check.port,
            "protocol": check.protocol.to_string(),
            "state": state,
        })),
    }
}

fn run_toggle_throttle(cli: &Cli, rt: &Runtime) -> Result<(), CliError> {
    let value = ThrottleToggler::new().toggle(&rt.dispatcher, &rt.config.agent)?;
    match output_mode(cli) {
        OutputMode::Human => {
            println!("Throttling exempt set to {}", value.bold());
            Ok(())
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "toggle-throttle",
            "target": rt.target_label(),
            "value": value,
        })),
    }
}

fn run_status(cli: &Cli, rt: &Runtime) -> Result<(), CliError> {
    let mut snapshot = StatusSnapshot::default();
    for report in run_all(&rt.dispatcher, &rt.config) {
        snapshot.apply(report.update);
    }
    match output_mode(cli) {
        OutputMode::Human => {
            println!("{} {}", "Target:".bold(), rt.target_label());
            for (label, value) in snapshot.rows() {
                let shown = if value.starts_with("Error") {
                    value.red()
                } else if value == "Not Found" {
                    value.yellow()
                } else {
                    value.normal()
                };
                println!("  {label:<20} {shown}");
            }
            Ok(())
        }
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&snapshot)?;
            if let Value::Object(map) = &mut payload {
                map.insert("target".to_string(), Value::String(rt.target_label()));
            }
            write_json_line(&payload)
        }
    }
}

fn run_registry(cli: &Cli, rt: &Runtime, args: &RegistryArgs) -> Result<(), CliError> {
    match &args.command {
        RegistryCommand::Get { key, name } => run_action(cli, rt, &catalog::registry_get(key, name)),
        RegistryCommand::List { key } => run_action(cli, rt, &catalog::registry_list(key)),
        RegistryCommand::Set {
            key,
            name,
            value,
            kind,
        } => {
            let typed = RegValue::parse_typed(RegType::parse(kind)?, value)?;
            run_action(cli, rt, &catalog::registry_set(key, name, typed))?;
            rt.logger.send(ActivityEvent::RegistryWritten {
                key: key.clone(),
                name: name.clone(),
                target: rt.target_label(),
            });
            Ok(())
        }
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    match args.command {
        ConfigCommand::Path => match output_mode(cli) {
            OutputMode::Human => {
                println!("{}", path.display());
                Ok(())
            }
            OutputMode::Json => write_json_line(&json!({ "config_path": path })),
        },
        ConfigCommand::Show => {
            let config = Config::load(cli.config.as_deref())?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let text = toml::to_string_pretty(&config).map_err(DiagError::from)?;
                    print!("{text}");
                    Ok(())
                }
                OutputMode::Json => write_json_line(&serde_json::to_value(&config)?),
            }
        }
    }
}

// ──────────────────── tail ────────────────────

fn shutdown_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    for &signal in TERM_SIGNALS {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&flag)) {
            eprintln!("[BFX-SIGNAL] failed to register handler for signal {signal}: {e}");
        }
    }
    flag
}

/// Lines of `next` that were not already shown at the end of `prev`.
fn unseen_lines<'a>(prev: &[String], next: &'a [String]) -> &'a [String] {
    let max = prev.len().min(next.len());
    for overlap in (1..=max).rev() {
        if prev[prev.len() - overlap..] == next[..overlap] {
            return &next[overlap..];
        }
    }
    next
}

fn print_styled(line: &str, rules: &HighlightRules, grep: Option<&str>) -> io::Result<()> {
    if let Some(term) = grep {
        if !line.to_lowercase().contains(&term.to_lowercase()) {
            return Ok(());
        }
    }
    let style = classify(line, rules);
    let mut stdout = io::stdout().lock();
    match style.as_ref().and_then(style_color_name) {
        Some(color) => writeln!(stdout, "{}", line.color(color)),
        None => writeln!(stdout, "{line}"),
    }
}

fn run_tail(cli: &Cli, rt: &Runtime, args: &TailArgs) -> Result<(), CliError> {
    let path = args.path.to_string_lossy().into_owned();
    let rules = HighlightRules::from_config(&rt.config.highlight);

    if !args.follow {
        let action = if args.dir {
            catalog::list_directory(&path, rt.config.refresh.directory_entries)
        } else {
            catalog::tail_file(&path, rt.config.refresh.file_buffer_lines)
        };
        let output = rt.execute(&action)?;
        if output_mode(cli) == OutputMode::Json {
            let lines = output_lines(&output);
            return write_json_line(&json!({ "path": path, "target": rt.target_label(), "lines": lines }));
        }
        for line in output_lines(&output) {
            print_styled(line, &rules, args.grep.as_deref())?;
        }
        return Ok(());
    }

    let (tx, rx) = crossbeam_channel::unbounded::<TickReport>();
    let sink: TickSink = Arc::new(move |report: TickReport| {
        let _ = tx.send(report);
    });
    let mut sessions = SessionManager::new(
        rt.dispatcher.clone(),
        SharedRules::new(rules.clone()),
        rt.config.refresh.clone(),
        sink,
    );
    let id = if args.dir {
        sessions.open_directory(&path)?
    } else {
        sessions.open_file(&path)?
    };

    let shutdown = shutdown_flag();
    let mut shown: Vec<String> = Vec::new();
    while !shutdown.load(Ordering::Relaxed) {
        let Ok(report) = rx.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        match sessions.apply_tick(report) {
            TickApplied::Updated => {
                let Some(view) = sessions.view(id) else { break };
                let lines: Vec<String> = view.lines().iter().map(|l| l.text.clone()).collect();
                if args.dir {
                    if lines != shown {
                        let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
                        println!("{}", format!("-- {stamp} --").dimmed());
                        for line in &lines {
                            print_styled(line, &rules, args.grep.as_deref())?;
                        }
                    }
                } else {
                    for line in unseen_lines(&shown, &lines) {
                        print_styled(line, &rules, args.grep.as_deref())?;
                    }
                }
                shown = lines;
            }
            TickApplied::Failed { message, rearmed } => {
                eprintln!("[BFX-TAIL] {message}");
                if !rearmed {
                    break;
                }
            }
            TickApplied::Discarded => {}
        }
    }
    sessions.close_all();
    Ok(())
}

// ──────────────────── dashboard ────────────────────

fn run_dashboard(rt: &Runtime, args: &DashboardArgs) -> Result<(), CliError> {
    if !io::stdout().is_terminal() {
        return Err(CliError::User("dashboard requires an interactive terminal".to_string()));
    }
    let mut dashboard = Dashboard::new(Arc::clone(&rt.config), rt.dispatcher.clone());
    dashboard.start_status()?;
    for path in &args.open {
        dashboard.open_file(&path.to_string_lossy())?;
    }
    for path in &args.watch_dirs {
        dashboard.open_directory(&path.to_string_lossy())?;
    }
    if args.latest_log {
        dashboard.open_latest_log();
    }

    let shutdown = shutdown_flag();
    let result = live::run(&mut dashboard, &shutdown);
    dashboard.shutdown();
    result.map_err(CliError::Io)
}

// ──────────────────── output helpers ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = env::var("BFX_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }
    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };
    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
