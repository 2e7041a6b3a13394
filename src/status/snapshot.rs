//! Latest known value of every status-panel field.

#![allow(missing_docs)]

use std::fmt;

use serde::Serialize;

use crate::core::errors::{DiagError, Result};
use crate::platform::pal::ServiceState;

/// One field's last observation. Each field updates independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum FieldValue<T> {
    #[default]
    Pending,
    Value(T),
    NotFound,
    Error(String),
}

impl<T> FieldValue<T> {
    /// Convert a check result. `NotFound` errors become [`FieldValue::NotFound`].
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(v) => Self::Value(v),
            Err(e) if e.is_not_found() => Self::NotFound,
            Err(e) => Self::Error(e.to_string()),
        }
    }

    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl<T: fmt::Display> fmt::Display for FieldValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("..."),
            Self::Value(v) => v.fmt(f),
            Self::NotFound => f.write_str("Not Found"),
            Self::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayPair {
    pub primary: String,
    pub secondary: String,
}

impl fmt::Display for RelayPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.primary, self.secondary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workstation {
    pub hostname: String,
    pub addresses: Vec<String>,
}

impl fmt::Display for Workstation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.addresses.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusField {
    Service,
    TcpPort,
    UdpPort,
    Relay,
    Throttle,
    Subsidiary,
    Version,
    Workstation,
}

impl StatusField {
    pub const ALL: [Self; 8] = [
        Self::Service,
        Self::TcpPort,
        Self::UdpPort,
        Self::Relay,
        Self::Throttle,
        Self::Subsidiary,
        Self::Version,
        Self::Workstation,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::TcpPort => "tcp_port",
            Self::UdpPort => "udp_port",
            Self::Relay => "relay",
            Self::Throttle => "throttle",
            Self::Subsidiary => "subsidiary",
            Self::Version => "version",
            Self::Workstation => "workstation",
        }
    }
}

/// A parsed observation for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Service(FieldValue<ServiceState>),
    TcpPort(FieldValue<bool>),
    UdpPort(FieldValue<bool>),
    Relay(FieldValue<RelayPair>),
    Throttle(FieldValue<String>),
    Subsidiary(FieldValue<String>),
    Version(FieldValue<String>),
    Workstation(FieldValue<Workstation>),
}

impl StatusUpdate {
    #[must_use]
    pub const fn field(&self) -> StatusField {
        match self {
            Self::Service(_) => StatusField::Service,
            Self::TcpPort(_) => StatusField::TcpPort,
            Self::UdpPort(_) => StatusField::UdpPort,
            Self::Relay(_) => StatusField::Relay,
            Self::Throttle(_) => StatusField::Throttle,
            Self::Subsidiary(_) => StatusField::Subsidiary,
            Self::Version(_) => StatusField::Version,
            Self::Workstation(_) => StatusField::Workstation,
        }
    }

    /// Error text, when the check failed with something other than NotFound.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        let msg = match self {
            Self::Service(FieldValue::Error(m))
            | Self::TcpPort(FieldValue::Error(m))
            | Self::UdpPort(FieldValue::Error(m))
            | Self::Relay(FieldValue::Error(m))
            | Self::Throttle(FieldValue::Error(m))
            | Self::Subsidiary(FieldValue::Error(m))
            | Self::Version(FieldValue::Error(m))
            | Self::Workstation(FieldValue::Error(m)) => m,
            _ => return None,
        };
        Some(msg)
    }

    /// Parse raw action output for `field`.
    #[must_use]
    pub fn parse(field: StatusField, output: Result<String>) -> Self {
        match field {
            StatusField::Service => Self::Service(FieldValue::from_result(
                output.map(|o| ServiceState::from_output(&o)),
            )),
            StatusField::TcpPort => Self::TcpPort(FieldValue::from_result(output.map(|o| is_open(&o)))),
            StatusField::UdpPort => Self::UdpPort(FieldValue::from_result(output.map(|o| is_open(&o)))),
            StatusField::Relay => Self::Relay(FieldValue::from_result(output.and_then(|o| parse_relays(&o)))),
            StatusField::Throttle => Self::Throttle(FieldValue::from_result(output.map(|o| o.trim().to_string()))),
            StatusField::Subsidiary => {
                Self::Subsidiary(FieldValue::from_result(output.map(|o| o.trim().to_string())))
            }
            StatusField::Version => Self::Version(FieldValue::from_result(output.map(|o| o.trim().to_string()))),
            StatusField::Workstation => {
                Self::Workstation(FieldValue::from_result(output.and_then(|o| parse_workstation(&o))))
            }
        }
    }
}

fn is_open(output: &str) -> bool {
    output.trim().eq_ignore_ascii_case("open")
}

fn parse_relays(output: &str) -> Result<RelayPair> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(a), Some(b)) => Ok(RelayPair {
            primary: a.to_string(),
            secondary: b.to_string(),
        }),
        _ => Err(DiagError::not_found("relay server values")),
    }
}

fn parse_workstation(output: &str) -> Result<Workstation> {
    let mut lines = output.lines().map(str::trim);
    let hostname = lines
        .next()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DiagError::Runtime {
            details: "workstation output had no host name".to_string(),
        })?;
    let addresses = lines
        .next()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Workstation {
        hostname: hostname.to_string(),
        addresses,
    })
}

/// Every field of the status panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub service: FieldValue<ServiceState>,
    pub tcp_port: FieldValue<bool>,
    pub udp_port: FieldValue<bool>,
    pub relay: FieldValue<RelayPair>,
    pub throttle: FieldValue<String>,
    pub subsidiary: FieldValue<String>,
    pub version: FieldValue<String>,
    pub workstation: FieldValue<Workstation>,
}

impl StatusSnapshot {
    pub fn apply(&mut self, update: StatusUpdate) {
        match update {
            StatusUpdate::Service(v) => self.service = v,
            StatusUpdate::TcpPort(v) => self.tcp_port = v,
            StatusUpdate::UdpPort(v) => self.udp_port = v,
            StatusUpdate::Relay(v) => self.relay = v,
            StatusUpdate::Throttle(v) => self.throttle = v,
            StatusUpdate::Subsidiary(v) => self.subsidiary = v,
            StatusUpdate::Version(v) => self.version = v,
            StatusUpdate::Workstation(v) => self.workstation = v,
        }
    }

    /// Human-readable `(label, value)` rows in panel order.
    #[must_use]
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let port = |v: &FieldValue<bool>| match v {
            FieldValue::Value(open) => crate::status::probe::open_label(*open).to_string(),
            other => other.to_string(),
        };
        vec![
            ("BESClient service", self.service.to_string()),
            ("TCP port", port(&self.tcp_port)),
            ("UDP port", port(&self.udp_port)),
            ("Relay servers", self.relay.to_string()),
            ("Throttling exempt", self.throttle.to_string()),
            ("Subsidiary", self.subsidiary.to_string()),
            ("Client version", self.version.to_string()),
            ("Workstation", self.workstation.to_string()),
        ]
    }
}
