//! Typed registry access: value model, edit parsing, and two backends.
//!
//! [`RegExeRegistry`] drives `reg.exe` on Windows hosts. [`FileRegistry`]
//! keeps the same key/value tree in a TOML file (or purely in memory) so
//! non-Windows hosts and tests exercise identical code paths.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{DiagError, Result};

/// Registry value types surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegType {
    String,
    ExpandString,
    Dword,
    Qword,
    MultiString,
    Binary,
    None,
}

impl RegType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::ExpandString => "EXPAND_STRING",
            Self::Dword => "DWORD",
            Self::Qword => "QWORD",
            Self::MultiString => "MULTI_STRING",
            Self::Binary => "BINARY",
            Self::None => "NONE",
        }
    }

    /// Name used by `reg.exe` (`/t` argument and query output).
    #[must_use]
    pub const fn reg_exe_name(self) -> &'static str {
        match self {
            Self::String => "REG_SZ",
            Self::ExpandString => "REG_EXPAND_SZ",
            Self::Dword => "REG_DWORD",
            Self::Qword => "REG_QWORD",
            Self::MultiString => "REG_MULTI_SZ",
            Self::Binary => "REG_BINARY",
            Self::None => "REG_NONE",
        }
    }

    /// Accepts either form (`DWORD` or `REG_DWORD`), case-insensitive.
    pub fn parse(raw: &str) -> Result<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("REG_").unwrap_or(&upper);
        match bare {
            "STRING" | "SZ" => Ok(Self::String),
            "EXPAND_STRING" | "EXPAND_SZ" => Ok(Self::ExpandString),
            "DWORD" => Ok(Self::Dword),
            "QWORD" => Ok(Self::Qword),
            "MULTI_STRING" | "MULTI_SZ" => Ok(Self::MultiString),
            "BINARY" => Ok(Self::Binary),
            "NONE" => Ok(Self::None),
            other => Err(DiagError::validation(
                "registry type",
                format!("unknown type {other:?}"),
            )),
        }
    }
}

impl fmt::Display for RegType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed registry value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    String(String),
    ExpandString(String),
    Dword(u32),
    Qword(u64),
    MultiString(Vec<String>),
    Binary(Vec<u8>),
    None,
}

impl RegValue {
    #[must_use]
    pub const fn reg_type(&self) -> RegType {
        match self {
            Self::String(_) => RegType::String,
            Self::ExpandString(_) => RegType::ExpandString,
            Self::Dword(_) => RegType::Dword,
            Self::Qword(_) => RegType::Qword,
            Self::MultiString(_) => RegType::MultiString,
            Self::Binary(_) => RegType::Binary,
            Self::None => RegType::None,
        }
    }

    /// Parse user-edited text into a value of the given type.
    ///
    /// DWORD/QWORD take a decimal or `0x` hex integer, MULTI_STRING takes one
    /// item per line, BINARY takes a hex string (whitespace ignored).
    pub fn parse_typed(kind: RegType, text: &str) -> Result<Self> {
        match kind {
            RegType::String => Ok(Self::String(text.to_string())),
            RegType::ExpandString => Ok(Self::ExpandString(text.to_string())),
            RegType::Dword => parse_integer(text)
                .and_then(|n| u32::try_from(n).ok())
                .map(Self::Dword)
                .ok_or_else(|| {
                    DiagError::validation("registry value", format!("{text:?} is not a DWORD"))
                }),
            RegType::Qword => parse_integer(text).map(Self::Qword).ok_or_else(|| {
                DiagError::validation("registry value", format!("{text:?} is not a QWORD"))
            }),
            RegType::MultiString => Ok(Self::MultiString(
                text.lines().map(str::to_string).collect(),
            )),
            RegType::Binary => decode_hex(text).map(Self::Binary),
            RegType::None => Ok(Self::None),
        }
    }

    /// Text form, the inverse of [`RegValue::parse_typed`].
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::String(s) | Self::ExpandString(s) => s.clone(),
            Self::Dword(n) => n.to_string(),
            Self::Qword(n) => n.to_string(),
            Self::MultiString(items) => items.join("\n"),
            Self::Binary(bytes) => encode_hex(bytes),
            Self::None => String::new(),
        }
    }

    /// The plain string when this is a string-typed value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::ExpandString(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for RegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultiString(items) => f.write_str(&items.join(", ")),
            other => f.write_str(&other.display_text()),
        }
    }
}

/// Key/value store under a fixed root (`HKLM`).
pub trait Registry: Send + Sync {
    /// Missing key or value yields [`DiagError::NotFound`].
    fn read_value(&self, key: &str, name: &str) -> Result<RegValue>;
    fn write_value(&self, key: &str, name: &str, value: &RegValue) -> Result<()>;
    fn list_values(&self, key: &str) -> Result<Vec<(String, RegValue)>>;
    fn list_subkeys(&self, key: &str) -> Result<Vec<String>>;
}

/// `name (TYPE): data` lines, one per value.
#[must_use]
pub fn format_value_listing(values: &[(String, RegValue)]) -> Vec<String> {
    values
        .iter()
        .map(|(name, value)| {
            let shown = if name.is_empty() { "(Default)" } else { name };
            format!("{shown} ({}): {value}", value.reg_type())
        })
        .collect()
}

// ──────────────────── reg.exe backend ────────────────────

/// Windows registry through `reg.exe` under `HKLM`.
#[derive(Debug, Default)]
pub struct RegExeRegistry;

impl RegExeRegistry {
    fn run(args: &[&str], key: &str) -> Result<String> {
        let output = Command::new("reg")
            .args(args)
            .output()
            .map_err(|e| DiagError::registry(key, format!("failed to launch reg.exe: {e}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("unable to find") {
            return Err(DiagError::not_found(format!(r"HKLM\{key}")));
        }
        Err(DiagError::registry(key, stderr))
    }
}

impl Registry for RegExeRegistry {
    fn read_value(&self, key: &str, name: &str) -> Result<RegValue> {
        let full = format!(r"HKLM\{key}");
        let stdout = Self::run(&["query", &full, "/v", name], key)?;
        parse_reg_query(&stdout)
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
            .ok_or_else(|| DiagError::not_found(format!(r"{full}\{name}")))
    }

    fn write_value(&self, key: &str, name: &str, value: &RegValue) -> Result<()> {
        let full = format!(r"HKLM\{key}");
        let data = match value {
            RegValue::MultiString(items) => items.join(r"\0"),
            other => other.display_text(),
        };
        Self::run(
            &[
                "add",
                &full,
                "/v",
                name,
                "/t",
                value.reg_type().reg_exe_name(),
                "/d",
                &data,
                "/f",
            ],
            key,
        )?;
        Ok(())
    }

    fn list_values(&self, key: &str) -> Result<Vec<(String, RegValue)>> {
        let full = format!(r"HKLM\{key}");
        let stdout = Self::run(&["query", &full], key)?;
        Ok(parse_reg_query(&stdout))
    }

    fn list_subkeys(&self, key: &str) -> Result<Vec<String>> {
        let full = format!(r"HKLM\{key}");
        let stdout = Self::run(&["query", &full], key)?;
        Ok(parse_reg_subkeys(&stdout, key))
    }
}

/// Parse value rows of `reg query` output (`    name    REG_TYPE    data`).
#[must_use]
pub fn parse_reg_query(stdout: &str) -> Vec<(String, RegValue)> {
    let mut values = Vec::new();
    for line in stdout.lines() {
        if !line.starts_with("    ") {
            continue;
        }
        let mut parts = line.trim_start().splitn(3, "    ");
        let (Some(name), Some(kind)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(kind) = RegType::parse(kind) else {
            continue;
        };
        let data = parts.next().unwrap_or("").trim_end();
        let value = match kind {
            RegType::MultiString => {
                RegValue::MultiString(data.split(r"\0").filter(|s| !s.is_empty()).map(str::to_string).collect())
            }
            other => match RegValue::parse_typed(other, data) {
                Ok(v) => v,
                Err(_) => continue,
            },
        };
        let name = if name == "(Default)" { "" } else { name };
        values.push((name.to_string(), value));
    }
    values
}

fn parse_reg_subkeys(stdout: &str, key: &str) -> Vec<String> {
    let own = format!(r"HKEY_LOCAL_MACHINE\{key}");
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("HKEY_") && !l.eq_ignore_ascii_case(&own))
        .filter_map(|l| l.rsplit('\\').next())
        .map(str::to_string)
        .collect()
}

// ──────────────────── file-backed store ────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Store {
    #[serde(default)]
    keys: BTreeMap<String, BTreeMap<String, StoredValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    #[serde(rename = "type")]
    kind: RegType,
    data: String,
}

/// Registry tree persisted as TOML (or held in memory when no path is set).
///
/// Key lookups are case-insensitive, matching Windows semantics.
#[derive(Debug)]
pub struct FileRegistry {
    path: Option<PathBuf>,
    store: Mutex<Store>,
}

impl FileRegistry {
    /// Open (or lazily create) a store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let store = if path.exists() {
            let raw = fs::read_to_string(path).map_err(|source| DiagError::io(path, source))?;
            toml::from_str(&raw)?
        } else {
            Store::default()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            store: Mutex::new(store),
        })
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            store: Mutex::new(Store::default()),
        }
    }

    fn persist(&self, store: &Store) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| DiagError::io(parent, source))?;
        }
        let raw = toml::to_string_pretty(store)?;
        fs::write(path, raw).map_err(|source| DiagError::io(path, source))
    }
}

fn find_key<'a>(
    store: &'a Store,
    key: &str,
) -> Option<(&'a String, &'a BTreeMap<String, StoredValue>)> {
    store.keys.iter().find(|(k, _)| k.eq_ignore_ascii_case(key))
}

fn decode_stored(key: &str, stored: &StoredValue) -> Result<RegValue> {
    RegValue::parse_typed(stored.kind, &stored.data)
        .map_err(|e| DiagError::registry(key, format!("corrupt stored value: {e}")))
}

impl Registry for FileRegistry {
    fn read_value(&self, key: &str, name: &str) -> Result<RegValue> {
        let store = self.store.lock();
        let (_, values) =
            find_key(&store, key).ok_or_else(|| DiagError::not_found(format!(r"HKLM\{key}")))?;
        let stored = values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
            .ok_or_else(|| DiagError::not_found(format!(r"HKLM\{key}\{name}")))?;
        decode_stored(key, stored)
    }

    fn write_value(&self, key: &str, name: &str, value: &RegValue) -> Result<()> {
        let mut store = self.store.lock();
        let existing_key = find_key(&store, key).map(|(k, _)| k.clone());
        let values = store
            .keys
            .entry(existing_key.unwrap_or_else(|| key.to_string()))
            .or_default();
        let existing_name = values
            .keys()
            .find(|n| n.eq_ignore_ascii_case(name))
            .cloned();
        values.insert(
            existing_name.unwrap_or_else(|| name.to_string()),
            StoredValue {
                kind: value.reg_type(),
                data: value.display_text(),
            },
        );
        self.persist(&store)
    }

    fn list_values(&self, key: &str) -> Result<Vec<(String, RegValue)>> {
        let store = self.store.lock();
        let (_, values) =
            find_key(&store, key).ok_or_else(|| DiagError::not_found(format!(r"HKLM\{key}")))?;
        values
            .iter()
            .map(|(name, stored)| Ok((name.clone(), decode_stored(key, stored)?)))
            .collect()
    }

    fn list_subkeys(&self, key: &str) -> Result<Vec<String>> {
        let store = self.store.lock();
        let prefix = format!("{}\\", key.to_ascii_lowercase());
        let mut children: Vec<String> = store
            .keys
            .keys()
            .filter_map(|k| {
                let lower = k.to_ascii_lowercase();
                lower.strip_prefix(&prefix)?;
                k.get(prefix.len()..)
                    .and_then(|rest| rest.split('\\').next())
                    .map(str::to_string)
            })
            .collect();
        children.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
        Ok(children)
    }
}

// ──────────────────── helpers ────────────────────

fn parse_integer(text: &str) -> Option<u64> {
    let t = text.trim();
    t.strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .map_or_else(|| t.parse().ok(), |hex| u64::from_str_radix(hex, 16).ok())
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(DiagError::validation(
            "registry value",
            "binary data needs an even number of hex digits",
        ));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| {
                    DiagError::validation("registry value", format!("invalid hex byte {pair:?}"))
                })
        })
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_typed_per_kind() {
        assert_eq!(
            RegValue::parse_typed(RegType::Dword, "0x10").unwrap(),
            RegValue::Dword(16)
        );
        assert_eq!(
            RegValue::parse_typed(RegType::Qword, "42").unwrap(),
            RegValue::Qword(42)
        );
        assert_eq!(
            RegValue::parse_typed(RegType::MultiString, "a\nb").unwrap(),
            RegValue::MultiString(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            RegValue::parse_typed(RegType::Binary, "de ad BE EF").unwrap(),
            RegValue::Binary(vec![0xde, 0xad, 0xbe, 0xef])
        );
    }

    #[test]
    fn parse_typed_rejects_bad_input() {
        let err = RegValue::parse_typed(RegType::Dword, "4294967296").unwrap_err();
        assert_eq!(err.code(), "BFX-1101");
        assert!(RegValue::parse_typed(RegType::Dword, "abc").is_err());
        assert!(RegValue::parse_typed(RegType::Binary, "abc").is_err());
        assert!(RegValue::parse_typed(RegType::Binary, "zz").is_err());
    }

    #[test]
    fn reg_type_accepts_both_spellings() {
        assert_eq!(RegType::parse("REG_SZ").unwrap(), RegType::String);
        assert_eq!(RegType::parse("multi_string").unwrap(), RegType::MultiString);
        assert!(RegType::parse("REG_LINK").is_err());
    }

    #[test]
    fn parses_reg_query_output() {
        let out = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\WOW6432Node\\BigFix\\EnterpriseClient\\Settings\\Client\\__RelayServer1\r\n    value    REG_SZ    http://relay.example:52311/bfmirror/downloads/\r\n    count    REG_DWORD    0x3\r\n    list    REG_MULTI_SZ    a\\0b\r\n\r\n";
        let values = parse_reg_query(out);
        assert_eq!(values.len(), 3);
        assert_eq!(
            values[0],
            (
                "value".to_string(),
                RegValue::String("http://relay.example:52311/bfmirror/downloads/".into())
            )
        );
        assert_eq!(values[1].1, RegValue::Dword(3));
        assert_eq!(
            values[2].1,
            RegValue::MultiString(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn file_registry_read_write_and_missing() {
        let reg = FileRegistry::in_memory();
        let key = r"SOFTWARE\BigFix\Settings\Client\ThrottlingExempt";
        assert!(reg.read_value(key, "value").unwrap_err().is_not_found());

        reg.write_value(key, "value", &RegValue::String("YES".into()))
            .unwrap();
        assert_eq!(
            reg.read_value(&key.to_ascii_uppercase(), "VALUE").unwrap(),
            RegValue::String("YES".into())
        );
        assert!(reg.read_value(key, "other").unwrap_err().is_not_found());
    }

    #[test]
    fn file_registry_persists_to_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        {
            let reg = FileRegistry::open(&path).unwrap();
            reg.write_value(r"A\B", "bin", &RegValue::Binary(vec![1, 2, 255]))
                .unwrap();
            reg.write_value(r"A\C", "n", &RegValue::Qword(7)).unwrap();
        }
        let reg = FileRegistry::open(&path).unwrap();
        assert_eq!(
            reg.read_value(r"A\B", "bin").unwrap(),
            RegValue::Binary(vec![1, 2, 255])
        );
        assert_eq!(reg.list_subkeys("A").unwrap(), vec!["B", "C"]);
    }

    #[test]
    fn listing_format() {
        let lines = format_value_listing(&[
            ("value".into(), RegValue::String("YES".into())),
            (String::new(), RegValue::Dword(1)),
        ]);
        assert_eq!(lines, vec!["value (STRING): YES", "(Default) (DWORD): 1"]);
    }
}
