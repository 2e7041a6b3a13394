//! PAL trait and host implementations: service control, registry, host identity.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::errors::{DiagError, Result};
use crate::platform::registry::{FileRegistry, Registry};

/// State of the agent service as reported by the OS service table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Running,
    Stopped,
    Unknown,
}

impl ServiceState {
    /// Classify free-form service tool output (`sc query`, `Get-Service`,
    /// `systemctl is-active`).
    #[must_use]
    pub fn from_output(output: &str) -> Self {
        let upper = output.to_ascii_uppercase();
        if upper.contains("RUNNING") {
            return Self::Running;
        }
        if upper.contains("STOPPED") {
            return Self::Stopped;
        }
        match upper.trim() {
            "ACTIVE" => Self::Running,
            "INACTIVE" | "FAILED" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS abstraction used by every local diagnostic procedure.
pub trait Platform: Send + Sync {
    fn service_state(&self, name: &str) -> Result<ServiceState>;
    /// Returns the tool's output on success.
    fn stop_service(&self, name: &str) -> Result<String>;
    fn start_service(&self, name: &str) -> Result<String>;
    fn registry(&self) -> &dyn Registry;
    /// Product version of an executable; `NotFound` when the file is absent.
    fn file_version(&self, path: &Path) -> Result<String>;
    fn hostname(&self) -> Result<String>;
    fn ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>>;
}

// ──────────────────── system implementation ────────────────────

/// Host implementation: `sc`/`net`/`reg.exe` on Windows, `systemctl` plus a
/// file-backed registry elsewhere.
pub struct SystemPlatform {
    registry: Box<dyn Registry>,
}

impl SystemPlatform {
    #[must_use]
    pub fn new(registry: Box<dyn Registry>) -> Self {
        Self { registry }
    }
}

fn run_tool(program: &str, args: &[&str]) -> Result<String> {
    let command_line = format!("{program} {}", args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| DiagError::process(&command_line, format!("failed to launch: {e}")))?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(DiagError::process(
        command_line,
        format!(
            "exit {}: {}",
            output.status.code().unwrap_or(-1),
            if stderr.is_empty() { stdout } else { stderr }
        ),
    ))
}

/// Like [`run_tool`] but keeps stdout on non-zero exit (status queries
/// report "stopped" through the exit code).
fn run_tool_lenient(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program).args(args).output().map_err(|e| {
        DiagError::process(
            format!("{program} {}", args.join(" ")),
            format!("failed to launch: {e}"),
        )
    })?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

impl Platform for SystemPlatform {
    fn service_state(&self, name: &str) -> Result<ServiceState> {
        let output = if cfg!(windows) {
            run_tool_lenient("sc", &["query", name])?
        } else {
            run_tool_lenient("systemctl", &["is-active", name])?
        };
        Ok(ServiceState::from_output(&output))
    }

    fn stop_service(&self, name: &str) -> Result<String> {
        if cfg!(windows) {
            run_tool("net", &["stop", name])
        } else {
            run_tool("systemctl", &["stop", name])
        }
    }

    fn start_service(&self, name: &str) -> Result<String> {
        if cfg!(windows) {
            run_tool("net", &["start", name])
        } else {
            run_tool("systemctl", &["start", name])
        }
    }

    fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    fn file_version(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(DiagError::not_found(path.display().to_string()));
        }
        let display = path.display().to_string();
        let raw = if cfg!(windows) {
            let script = format!(
                "(Get-Item -LiteralPath '{}').VersionInfo.ProductVersion",
                display.replace('\'', "''")
            );
            run_tool("powershell", &["-NoProfile", "-Command", &script])?
        } else {
            run_tool(&display, &["--version"])?
        };
        let version = raw
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| l.rsplit(' ').next().unwrap_or(l).to_string())
            .unwrap_or_default();
        if version.is_empty() {
            return Err(DiagError::not_found(format!("version of {display}")));
        }
        Ok(version)
    }

    fn hostname(&self) -> Result<String> {
        #[cfg(unix)]
        {
            nix::unistd::gethostname()
                .map(|h| h.to_string_lossy().into_owned())
                .map_err(|e| DiagError::Runtime {
                    details: format!("gethostname failed: {e}"),
                })
        }
        #[cfg(not(unix))]
        {
            std::env::var("COMPUTERNAME").map_err(|_| DiagError::not_found("COMPUTERNAME"))
        }
    }

    fn ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>> {
        let host = self.hostname()?;
        resolve_ipv4(&host)
    }
}

/// IPv4 addresses the resolver returns for `host`, deduplicated, in order.
pub fn resolve_ipv4(host: &str) -> Result<Vec<Ipv4Addr>> {
    let addrs = (host, 0)
        .to_socket_addrs()
        .map_err(|e| DiagError::network(host, format!("resolution failed: {e}")))?;
    let mut seen = BTreeSet::new();
    Ok(addrs
        .filter_map(|a| match a.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .filter(|v4| seen.insert(*v4))
        .collect())
}

/// Build the platform for this host from configuration.
pub fn detect_platform(config: &Config) -> Result<Arc<dyn Platform>> {
    #[cfg(windows)]
    {
        let _ = config;
        Ok(Arc::new(SystemPlatform::new(Box::new(
            crate::platform::registry::RegExeRegistry,
        ))))
    }
    #[cfg(not(windows))]
    {
        let registry = FileRegistry::open(&config.paths.registry_store)?;
        Ok(Arc::new(SystemPlatform::new(Box::new(registry))))
    }
}

// ──────────────────── mock ────────────────────

/// In-memory mock implementation for deterministic tests.
pub struct MockPlatform {
    service: Mutex<ServiceState>,
    fail_start: Mutex<Option<String>>,
    registry: FileRegistry,
    versions: Mutex<Vec<(PathBuf, String)>>,
    hostname: String,
    addresses: Vec<Ipv4Addr>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            service: Mutex::new(ServiceState::Running),
            fail_start: Mutex::new(None),
            registry: FileRegistry::in_memory(),
            versions: Mutex::new(Vec::new()),
            hostname: "mock-workstation".to_string(),
            addresses: vec![Ipv4Addr::new(10, 0, 0, 5)],
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_service_state(&self, state: ServiceState) {
        *self.service.lock() = state;
    }

    /// Make the next `start_service` calls fail with this message.
    pub fn fail_start_with(&self, message: &str) {
        *self.fail_start.lock() = Some(message.to_string());
    }

    pub fn set_version(&self, path: &Path, version: &str) {
        self.versions
            .lock()
            .push((path.to_path_buf(), version.to_string()));
    }

    /// Every platform call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl Platform for MockPlatform {
    fn service_state(&self, name: &str) -> Result<ServiceState> {
        self.record(format!("service_state {name}"));
        Ok(*self.service.lock())
    }

    fn stop_service(&self, name: &str) -> Result<String> {
        self.record(format!("stop_service {name}"));
        *self.service.lock() = ServiceState::Stopped;
        Ok(format!("The {name} service was stopped successfully."))
    }

    fn start_service(&self, name: &str) -> Result<String> {
        self.record(format!("start_service {name}"));
        if let Some(message) = self.fail_start.lock().clone() {
            return Err(DiagError::process(format!("net start {name}"), message));
        }
        *self.service.lock() = ServiceState::Running;
        Ok(format!("The {name} service was started successfully."))
    }

    fn registry(&self) -> &dyn Registry {
        &self.registry
    }

    fn file_version(&self, path: &Path) -> Result<String> {
        self.record(format!("file_version {}", path.display()));
        self.versions
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| DiagError::not_found(path.display().to_string()))
    }

    fn hostname(&self) -> Result<String> {
        Ok(self.hostname.clone())
    }

    fn ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>> {
        Ok(self.addresses.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::registry::RegValue;

    #[test]
    fn service_state_classification() {
        let sc = "SERVICE_NAME: BESClient\n        TYPE               : 10  WIN32_OWN_PROCESS\n        STATE              : 4  RUNNING\n";
        assert_eq!(ServiceState::from_output(sc), ServiceState::Running);
        assert_eq!(
            ServiceState::from_output("STATE              : 1  STOPPED"),
            ServiceState::Stopped
        );
        assert_eq!(ServiceState::from_output("Running"), ServiceState::Running);
        assert_eq!(ServiceState::from_output("active\n"), ServiceState::Running);
        assert_eq!(ServiceState::from_output("inactive\n"), ServiceState::Stopped);
        assert_eq!(
            ServiceState::from_output("[SC] OpenService FAILED 1060"),
            ServiceState::Unknown
        );
    }

    #[test]
    fn mock_records_service_calls_in_order() {
        let mock = MockPlatform::new();
        mock.stop_service("BESClient").unwrap();
        assert_eq!(
            mock.service_state("BESClient").unwrap(),
            ServiceState::Stopped
        );
        mock.start_service("BESClient").unwrap();
        assert_eq!(
            mock.calls(),
            vec![
                "stop_service BESClient",
                "service_state BESClient",
                "start_service BESClient"
            ]
        );
    }

    #[test]
    fn mock_start_failure_is_process_error() {
        let mock = MockPlatform::new();
        mock.fail_start_with("access denied");
        let err = mock.start_service("BESClient").unwrap_err();
        assert_eq!(err.code(), "BFX-3001");
    }

    #[test]
    fn mock_registry_is_isolated() {
        let mock = MockPlatform::new();
        mock.registry()
            .write_value("K", "value", &RegValue::String("NO".into()))
            .unwrap();
        assert_eq!(
            mock.registry().read_value("K", "value").unwrap(),
            RegValue::String("NO".into())
        );
        assert!(MockPlatform::new()
            .registry()
            .read_value("K", "value")
            .is_err());
    }

    #[test]
    fn localhost_resolves_to_ipv4() {
        let addrs = resolve_ipv4("127.0.0.1").unwrap();
        assert_eq!(addrs, vec![Ipv4Addr::LOCALHOST]);
    }
}
