#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bfxdiag::core::config::Config;
use bfxdiag::dispatch::action::LocalContext;
use bfxdiag::dispatch::dispatcher::Dispatcher;
use bfxdiag::dispatch::remote::{RecordingTransport, RemoteTransport};
use bfxdiag::dispatch::target::TargetSelector;
use bfxdiag::logger::activity::ActivityLoggerHandle;
use bfxdiag::platform::pal::{MockPlatform, Platform};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_bfxdiag") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "bfxdiag.exe" } else { "bfxdiag" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve bfxdiag binary path for integration test"),
    }
}

/// Run the binary with state files redirected under `sandbox`.
pub fn run_cli_in(case_name: &str, sandbox: &Path, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("bfxdiag-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env("BFX_ACTIVITY_LOG", sandbox.join("activity.jsonl"))
        .env("BFX_REGISTRY_STORE", sandbox.join("registry.toml"))
        .env_remove("BFX_OUTPUT_FORMAT")
        .env_remove("BFX_REMOTE_PASSWORD");
    for (key, value) in envs {
        command.env(key, value);
    }
    let output = command.output().expect("execute bfxdiag command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let transcript = format!(
        "case={case_name}\nbin={}\nargs={args:?}\nsandbox={}\nstatus={}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}\n",
        bin_path.display(),
        sandbox.display(),
        output.status,
    );
    fs::write(&log_path, transcript).expect("write test transcript");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── library fixtures ────────────────────

pub struct Fixture {
    pub config: Arc<Config>,
    pub platform: Arc<MockPlatform>,
    pub transport: Arc<RecordingTransport>,
    pub dispatcher: Dispatcher,
}

pub fn fixture_with(config: Config) -> Fixture {
    let config = Arc::new(config);
    let platform = Arc::new(MockPlatform::new());
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = Dispatcher::new(
        Arc::new(TargetSelector::new()),
        LocalContext {
            platform: Arc::clone(&platform) as Arc<dyn Platform>,
            config: Arc::clone(&config),
        },
        Arc::clone(&transport) as Arc<dyn RemoteTransport>,
        ActivityLoggerHandle::disconnected(),
    );
    Fixture {
        config,
        platform,
        transport,
        dispatcher,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(Config::default())
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}
