//! BFX-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DiagError>;

/// Coarse error classes surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// File, directory or registry read/write failure.
    Io,
    /// Service start/stop or other subprocess failure.
    Process,
    /// Remote dispatch failure (timeout, auth, unreachable, non-2xx).
    Network,
    /// Path, registry key or value absent.
    NotFound,
    /// Bad form input, rejected before dispatch.
    Validation,
    /// Configuration or runtime fault.
    Internal,
}

/// Top-level error type for bfxdiag.
#[derive(Debug, Error)]
pub enum DiagError {
    #[error("[BFX-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[BFX-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[BFX-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[BFX-1101] invalid {field}: {details}")]
    Validation { field: &'static str, details: String },

    #[error("[BFX-2001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[BFX-2002] source vanished: {path}")]
    SourceVanished { path: PathBuf },

    #[error("[BFX-2003] registry failure at {key}: {details}")]
    Registry { key: String, details: String },

    #[error("[BFX-2004] not found: {what}")]
    NotFound { what: String },

    #[error("[BFX-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[BFX-3001] process `{command}` failed: {details}")]
    Process { command: String, details: String },

    #[error("[BFX-4001] remote command on {host} failed: {details}")]
    Network { host: String, details: String },

    #[error("[BFX-4002] remote host is not set")]
    NoRemoteTarget,

    #[error("[BFX-5001] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[BFX-5002] no such session: {id}")]
    UnknownSession { id: u64 },

    #[error("[BFX-5003] no session is focused")]
    NoFocusedSession,

    #[error("[BFX-5900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DiagError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "BFX-1001",
            Self::MissingConfig { .. } => "BFX-1002",
            Self::ConfigParse { .. } => "BFX-1003",
            Self::Validation { .. } => "BFX-1101",
            Self::Io { .. } => "BFX-2001",
            Self::SourceVanished { .. } => "BFX-2002",
            Self::Registry { .. } => "BFX-2003",
            Self::NotFound { .. } => "BFX-2004",
            Self::Serialization { .. } => "BFX-2101",
            Self::Process { .. } => "BFX-3001",
            Self::Network { .. } => "BFX-4001",
            Self::NoRemoteTarget => "BFX-4002",
            Self::ChannelClosed { .. } => "BFX-5001",
            Self::UnknownSession { .. } => "BFX-5002",
            Self::NoFocusedSession => "BFX-5003",
            Self::Runtime { .. } => "BFX-5900",
        }
    }

    /// Error class used for reporting.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::Registry { .. } | Self::Serialization { .. } => ErrorKind::Io,
            Self::Process { .. } => ErrorKind::Process,
            Self::Network { .. } | Self::NoRemoteTarget => ErrorKind::Network,
            Self::NotFound { .. } | Self::SourceVanished { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::ConfigParse { .. }
            | Self::ChannelClosed { .. }
            | Self::UnknownSession { .. }
            | Self::NoFocusedSession
            | Self::Runtime { .. } => ErrorKind::Internal,
        }
    }

    /// Whether a later tick might succeed where this one failed.
    ///
    /// Nothing retries automatically; tickers use this to decide whether to
    /// keep re-arming.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Registry { .. }
                | Self::Network { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// A `NotFound` IO error is reported as [`DiagError::SourceVanished`] so
    /// callers can tell a deleted source from a transient failure.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::SourceVanished {
                path: path.as_ref().to_path_buf(),
            };
        }
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    #[must_use]
    pub fn validation(field: &'static str, details: impl Into<String>) -> Self {
        Self::Validation {
            field,
            details: details.into(),
        }
    }

    #[must_use]
    pub fn network(host: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Network {
            host: host.into(),
            details: details.into(),
        }
    }

    #[must_use]
    pub fn process(command: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Process {
            command: command.into(),
            details: details.into(),
        }
    }

    #[must_use]
    pub fn registry(key: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Registry {
            key: key.into(),
            details: details.into(),
        }
    }

    /// True for absent paths, keys and values.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::SourceVanished { .. })
    }
}

impl From<serde_json::Error> for DiagError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DiagError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for DiagError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<reqwest::Error> for DiagError {
    fn from(value: reqwest::Error) -> Self {
        let host = value
            .url()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "<unknown>".to_string());
        let details = if value.is_timeout() {
            format!("timed out: {value}")
        } else if value.is_connect() {
            format!("unreachable: {value}")
        } else {
            value.to_string()
        };
        Self::Network { host, details }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<DiagError> {
        vec![
            DiagError::InvalidConfig {
                details: String::new(),
            },
            DiagError::MissingConfig {
                path: PathBuf::new(),
            },
            DiagError::ConfigParse {
                context: "",
                details: String::new(),
            },
            DiagError::validation("port", ""),
            DiagError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            DiagError::SourceVanished {
                path: PathBuf::new(),
            },
            DiagError::registry("", ""),
            DiagError::not_found(""),
            DiagError::Serialization {
                context: "",
                details: String::new(),
            },
            DiagError::process("", ""),
            DiagError::network("", ""),
            DiagError::NoRemoteTarget,
            DiagError::ChannelClosed { component: "" },
            DiagError::UnknownSession { id: 0 },
            DiagError::NoFocusedSession,
            DiagError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(DiagError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_includes_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code: {msg}"
            );
        }
    }

    #[test]
    fn io_constructor_maps_missing_file_to_vanished() {
        let err = DiagError::io(
            "/tmp/gone.log",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "BFX-2002");
        assert!(!err.is_retryable());
        assert!(err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = DiagError::io(
            "/tmp/locked.log",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.code(), "BFX-2001");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("/tmp/locked.log"));
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(DiagError::network("h", "x").kind(), ErrorKind::Network);
        assert_eq!(DiagError::process("net", "x").kind(), ErrorKind::Process);
        assert_eq!(DiagError::not_found("k").kind(), ErrorKind::NotFound);
        assert_eq!(
            DiagError::validation("port", "x").kind(),
            ErrorKind::Validation
        );
        assert_eq!(DiagError::registry("k", "x").kind(), ErrorKind::Io);
    }

    #[test]
    fn validation_and_not_found_are_not_retryable() {
        assert!(!DiagError::validation("port", "abc").is_retryable());
        assert!(!DiagError::not_found("key").is_retryable());
        assert!(!DiagError::process("net start", "denied").is_retryable());
        assert!(DiagError::network("h", "timed out").is_retryable());
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: DiagError = toml_err.into();
        assert_eq!(err.code(), "BFX-1003");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: DiagError = json_err.into();
        assert_eq!(err.code(), "BFX-2101");
    }
}
