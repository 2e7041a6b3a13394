//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DiagError, Result};

/// Full bfxdiag configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub refresh: RefreshConfig,
    pub status: StatusConfig,
    pub remote: RemoteConfig,
    pub agent: AgentConfig,
    pub highlight: HighlightConfig,
    pub paths: PathsConfig,
}

/// Session ticker cadence and buffer bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshConfig {
    /// Period of a file session's ticker.
    pub file_interval_ms: u64,
    /// Period of a directory session's ticker.
    pub directory_interval_ms: u64,
    /// Lines kept from the end of a tailed file.
    pub file_buffer_lines: usize,
    /// Subdirectories kept in a directory view.
    pub directory_entries: usize,
    /// Run one forced tick on every open session when auto-refresh resumes.
    pub force_tick_on_resume: bool,
    /// Initial state of the global auto-refresh flag.
    pub auto_refresh: bool,
}

/// Status poller cadences and probe settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusConfig {
    pub service_interval_ms: u64,
    pub port_interval_ms: u64,
    pub relay_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub probe_host: String,
    pub agent_port: u16,
}

/// Remote command protocol (WS-Man) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub port: u16,
    pub path: String,
    pub timeout_ms: u64,
    pub accept_invalid_certs: bool,
}

/// Where the agent lives on the endpoint and which registry values matter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub service_name: String,
    pub client_exe: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub download_cache_dir: PathBuf,
    pub custom_site_prefix: String,
    /// Registry root under HKLM, e.g. `SOFTWARE\WOW6432Node\BigFix`.
    pub registry_root: String,
    /// Subkey (relative to the root) holding client settings.
    pub settings_key: String,
    pub relay_keys: [String; 2],
    pub throttle_key: String,
    pub subsidiary_key: String,
    /// Name of the value read under each setting subkey.
    pub value_name: String,
}

/// One highlight rule as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HighlightRuleConfig {
    pub keyword: String,
    pub style: String,
}

/// Ordered keyword → style rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HighlightConfig {
    pub rules: Vec<HighlightRuleConfig>,
}

/// Filesystem paths used by bfxdiag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
    /// Backing file for the registry emulation on non-Windows hosts.
    pub registry_store: PathBuf,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            file_interval_ms: 1_000,
            directory_interval_ms: 10_000,
            file_buffer_lines: 100,
            directory_entries: 10,
            force_tick_on_resume: true,
            auto_refresh: true,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            service_interval_ms: 5_000,
            port_interval_ms: 5_000,
            relay_interval_ms: 5_000,
            probe_timeout_ms: 1_000,
            probe_host: "127.0.0.1".to_string(),
            agent_port: 52_311,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            port: 5_985,
            path: "/wsman".to_string(),
            timeout_ms: 10_000,
            accept_invalid_certs: true,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let (service_name, client_exe, data_dir) = if cfg!(windows) {
            let base = PathBuf::from(r"C:\Program Files (x86)\BigFix Enterprise\BES Client");
            (
                "BESClient".to_string(),
                base.join("besclient.exe"),
                base.join("__BESData"),
            )
        } else {
            (
                "besclient".to_string(),
                PathBuf::from("/opt/BESClient/bin/BESClient"),
                PathBuf::from("/var/opt/BESClient/__BESData"),
            )
        };
        let logs_dir = data_dir.join("__Global").join("Logs");
        let download_cache_dir = data_dir.join("__Global").join("__Cache").join("Downloads");
        Self {
            service_name,
            client_exe,
            data_dir,
            logs_dir,
            download_cache_dir,
            custom_site_prefix: "CustomSite_".to_string(),
            registry_root: r"SOFTWARE\WOW6432Node\BigFix".to_string(),
            settings_key: r"EnterpriseClient\Settings\Client".to_string(),
            relay_keys: ["__RelayServer1".to_string(), "__RelayServer2".to_string()],
            throttle_key: "ThrottlingExempt".to_string(),
            subsidiary_key: "Subsidiary".to_string(),
            value_name: "value".to_string(),
        }
    }
}

impl AgentConfig {
    /// Full key path (relative to HKLM) of a client setting subkey.
    #[must_use]
    pub fn setting_key(&self, name: &str) -> String {
        format!(r"{}\{}\{}", self.registry_root, self.settings_key, name)
    }
}

impl Default for HighlightConfig {
    fn default() -> Self {
        let rule = |keyword: &str, style: &str| HighlightRuleConfig {
            keyword: keyword.to_string(),
            style: style.to_string(),
        };
        Self {
            rules: vec![
                rule("ERROR", "red"),
                rule("WARNING", "yellow"),
                rule("SUCCESSFUL", "light green"),
            ],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME")
            .or_else(|| env::var_os("USERPROFILE"))
            .map_or_else(
                || {
                    eprintln!(
                        "[BFX-CONFIG] WARNING: HOME not set, falling back to temp dir for data paths"
                    );
                    env::temp_dir()
                },
                PathBuf::from,
            );
        let cfg = home_dir.join(".config").join("bfxdiag").join("config.toml");
        let data = home_dir.join(".local").join("share").join("bfxdiag");
        Self {
            config_file: cfg,
            activity_log: data.join("activity.jsonl"),
            registry_store: data.join("registry.toml"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DiagError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(DiagError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    #[must_use]
    pub fn file_interval(&self) -> Duration {
        Duration::from_millis(self.refresh.file_interval_ms)
    }

    #[must_use]
    pub fn directory_interval(&self) -> Duration {
        Duration::from_millis(self.refresh.directory_interval_ms)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.status.probe_timeout_ms)
    }

    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.timeout_ms)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // refresh
        set_u64(&mut lookup, "BFX_REFRESH_FILE_INTERVAL_MS", &mut self.refresh.file_interval_ms)?;
        set_u64(
            &mut lookup,
            "BFX_REFRESH_DIRECTORY_INTERVAL_MS",
            &mut self.refresh.directory_interval_ms,
        )?;
        set_usize(
            &mut lookup,
            "BFX_REFRESH_FILE_BUFFER_LINES",
            &mut self.refresh.file_buffer_lines,
        )?;
        set_usize(
            &mut lookup,
            "BFX_REFRESH_DIRECTORY_ENTRIES",
            &mut self.refresh.directory_entries,
        )?;
        set_bool(&mut lookup, "BFX_REFRESH_AUTO", &mut self.refresh.auto_refresh)?;

        // status
        set_u64(
            &mut lookup,
            "BFX_STATUS_SERVICE_INTERVAL_MS",
            &mut self.status.service_interval_ms,
        )?;
        set_u64(&mut lookup, "BFX_STATUS_PORT_INTERVAL_MS", &mut self.status.port_interval_ms)?;
        set_u64(
            &mut lookup,
            "BFX_STATUS_RELAY_INTERVAL_MS",
            &mut self.status.relay_interval_ms,
        )?;
        set_u64(&mut lookup, "BFX_STATUS_PROBE_TIMEOUT_MS", &mut self.status.probe_timeout_ms)?;
        if let Some(raw) = lookup("BFX_STATUS_AGENT_PORT") {
            self.status.agent_port = raw.parse::<u16>().map_err(|error| DiagError::ConfigParse {
                context: "env",
                details: format!("BFX_STATUS_AGENT_PORT={raw:?}: {error}"),
            })?;
        }

        // remote
        set_u64(&mut lookup, "BFX_REMOTE_TIMEOUT_MS", &mut self.remote.timeout_ms)?;

        // agent
        if let Some(raw) = lookup("BFX_AGENT_SERVICE_NAME") {
            self.agent.service_name = raw;
        }
        if let Some(raw) = lookup("BFX_AGENT_DATA_DIR") {
            self.agent.data_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("BFX_AGENT_LOGS_DIR") {
            self.agent.logs_dir = PathBuf::from(raw);
        }

        // paths
        if let Some(raw) = lookup("BFX_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("BFX_REGISTRY_STORE") {
            self.paths.registry_store = PathBuf::from(raw);
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, val) in [
            ("refresh.file_interval_ms", self.refresh.file_interval_ms),
            ("refresh.directory_interval_ms", self.refresh.directory_interval_ms),
            ("status.service_interval_ms", self.status.service_interval_ms),
            ("status.port_interval_ms", self.status.port_interval_ms),
            ("status.relay_interval_ms", self.status.relay_interval_ms),
            ("status.probe_timeout_ms", self.status.probe_timeout_ms),
            ("remote.timeout_ms", self.remote.timeout_ms),
        ] {
            if val == 0 {
                return Err(DiagError::InvalidConfig {
                    details: format!("{name} must be > 0"),
                });
            }
        }

        if self.refresh.file_buffer_lines == 0 || self.refresh.directory_entries == 0 {
            return Err(DiagError::InvalidConfig {
                details: "refresh.file_buffer_lines and refresh.directory_entries must be >= 1"
                    .to_string(),
            });
        }

        if self.status.agent_port == 0 || self.remote.port == 0 {
            return Err(DiagError::InvalidConfig {
                details: "status.agent_port and remote.port must be in 1..=65535".to_string(),
            });
        }

        if !self.remote.path.starts_with('/') {
            return Err(DiagError::InvalidConfig {
                details: format!("remote.path must start with '/', got {:?}", self.remote.path),
            });
        }

        if self.agent.service_name.trim().is_empty() {
            return Err(DiagError::InvalidConfig {
                details: "agent.service_name must not be empty".to_string(),
            });
        }

        for rule in &self.highlight.rules {
            if rule.keyword.trim().is_empty() {
                return Err(DiagError::InvalidConfig {
                    details: "highlight.rules keywords must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.parse::<u64>().map_err(|error| DiagError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .parse::<usize>()
            .map_err(|error| DiagError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &mut F, name: &str, slot: &mut bool) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.parse::<bool>().map_err(|error| DiagError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Config, DiagError};
    use std::collections::HashMap;
    use std::path::Path;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn defaults_match_agent_cadences() {
        let cfg = Config::default();
        assert_eq!(cfg.refresh.file_interval_ms, 1_000);
        assert_eq!(cfg.refresh.directory_interval_ms, 10_000);
        assert_eq!(cfg.refresh.file_buffer_lines, 100);
        assert_eq!(cfg.refresh.directory_entries, 10);
        assert_eq!(cfg.status.service_interval_ms, 5_000);
        assert_eq!(cfg.status.agent_port, 52_311);
        assert_eq!(cfg.remote.port, 5_985);
        assert_eq!(cfg.remote.timeout_ms, 10_000);
    }

    #[test]
    fn default_highlight_rules_keep_order() {
        let cfg = Config::default();
        let keywords: Vec<&str> = cfg
            .highlight
            .rules
            .iter()
            .map(|r| r.keyword.as_str())
            .collect();
        assert_eq!(keywords, ["ERROR", "WARNING", "SUCCESSFUL"]);
    }

    #[test]
    fn setting_key_joins_root_and_settings() {
        let cfg = Config::default();
        assert_eq!(
            cfg.agent.setting_key("ThrottlingExempt"),
            r"SOFTWARE\WOW6432Node\BigFix\EnterpriseClient\Settings\Client\ThrottlingExempt"
        );
    }

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.refresh.file_interval_ms = 0;
        let err = cfg.validate().expect_err("expected interval error");
        assert!(err.to_string().contains("file_interval_ms"));
    }

    #[test]
    fn zero_buffer_rejected() {
        let mut cfg = Config::default();
        cfg.refresh.directory_entries = 0;
        let err = cfg.validate().expect_err("expected buffer error");
        assert!(err.to_string().contains("directory_entries"));
    }

    #[test]
    fn empty_keyword_rejected() {
        let mut cfg = Config::default();
        cfg.highlight.rules[1].keyword = "  ".to_string();
        let err = cfg.validate().expect_err("expected keyword error");
        assert!(err.to_string().contains("keywords"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("BFX_REFRESH_FILE_INTERVAL_MS", "250"),
            ("BFX_REFRESH_AUTO", "false"),
            ("BFX_STATUS_AGENT_PORT", "8080"),
            ("BFX_AGENT_SERVICE_NAME", "BESClientHelper"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");
        assert_eq!(cfg.refresh.file_interval_ms, 250);
        assert!(!cfg.refresh.auto_refresh);
        assert_eq!(cfg.status.agent_port, 8080);
        assert_eq!(cfg.agent.service_name, "BESClientHelper");
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("BFX_STATUS_AGENT_PORT", "70000")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("out-of-range port should fail");
        match err {
            DiagError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("BFX_STATUS_AGENT_PORT"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn toml_sections_parse() {
        let raw = r#"
            [refresh]
            file_interval_ms = 500

            [[highlight.rules]]
            keyword = "FATAL"
            style = "magenta"
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.refresh.file_interval_ms, 500);
        assert_eq!(cfg.refresh.directory_interval_ms, 10_000);
        assert_eq!(cfg.highlight.rules.len(), 1);
        assert_eq!(cfg.highlight.rules[0].keyword, "FATAL");
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/bfxdiag/config.toml")));
        assert!(matches!(result, Err(DiagError::MissingConfig { .. })));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.refresh.file_buffer_lines += 1;
        let after = modified.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
        assert_eq!(before, cfg.stable_hash().expect("hash"));
    }
}
