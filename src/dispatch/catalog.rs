//! Catalog of diagnostic actions. Each builds the local procedure and the
//! equivalent PowerShell command run by the remote shell.

#![allow(missing_docs)]

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::config::AgentConfig;
use crate::core::errors::{DiagError, Result};
use crate::dispatch::action::{Action, CommandTemplate, LocalContext, NOT_FOUND_SENTINEL, ps_quote};
use crate::platform::registry::{RegType, RegValue, format_value_listing};
use crate::session::source;
use crate::status::probe::{self, Protocol};

/// PowerShell spelling of `session::source::MODIFIED_FORMAT`.
const PS_MODIFIED_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";

/// PowerShell provider path for an `HKLM`-relative key.
fn hklm(key: &str) -> String {
    ps_quote(&format!(r"HKLM:\{key}"))
}

fn path_text(path: &Path) -> String {
    path.display().to_string()
}

// ──────────────────── service ────────────────────

pub fn service_status(agent: &AgentConfig) -> Action {
    let name = agent.service_name.clone();
    let remote = format!(
        "$s = Get-Service -Name {} -ErrorAction SilentlyContinue; if ($s) {{ $s.Status }} else {{ '{NOT_FOUND_SENTINEL}' }}",
        ps_quote(&name)
    );
    Action::new(
        "service status",
        move |ctx: &LocalContext| Ok(ctx.platform.service_state(&name)?.to_string()),
        CommandTemplate::new(remote),
    )
}

/// Stop then start the agent service; either failing aborts with a
/// process error.
pub fn restart_service(agent: &AgentConfig) -> Action {
    let name = agent.service_name.clone();
    let remote = format!(
        "Restart-Service -Name {} -ErrorAction Stop; Write-Output '{} service restarted successfully!'",
        ps_quote(&name),
        name
    );
    Action::new(
        "restart service",
        move |ctx: &LocalContext| {
            ctx.platform.stop_service(&name)?;
            ctx.platform.start_service(&name)?;
            Ok(format!("{name} service restarted successfully!"))
        },
        CommandTemplate::new(remote),
    )
}

// ──────────────────── caches ────────────────────

/// Remove and recreate the most recently modified custom-site directory.
pub fn clear_site_cache(agent: &AgentConfig) -> Action {
    let data_dir = agent.data_dir.clone();
    let prefix = agent.custom_site_prefix.clone();
    let remote = format!(
        "$latest = Get-ChildItem -LiteralPath {dir} -Directory | Where-Object {{ $_.Name -like {pattern} }} | Sort-Object LastWriteTime -Descending | Select-Object -First 1
if ($latest) {{
  Remove-Item -LiteralPath $latest.FullName -Recurse -Force
  New-Item -ItemType Directory -Path $latest.FullName | Out-Null
  Write-Output \"Cache for $($latest.Name) cleared successfully!\"
}} else {{ '{NOT_FOUND_SENTINEL}' }}",
        dir = ps_quote(&path_text(&data_dir)),
        pattern = ps_quote(&format!("{prefix}*")),
    );
    Action::new(
        "clear site cache",
        move |_: &LocalContext| {
            let latest = source::newest_matching(&data_dir, true, |n| n.starts_with(&prefix))?
                .ok_or_else(|| {
                    DiagError::not_found(format!("{prefix}* under {}", data_dir.display()))
                })?;
            recreate_dir(&data_dir.join(&latest))?;
            Ok(format!("Cache for {latest} cleared successfully!"))
        },
        CommandTemplate::new(remote),
    )
}

pub fn clear_agent_cache(agent: &AgentConfig) -> Action {
    let cache = agent.download_cache_dir.clone();
    let remote = format!(
        "$cache = {}
if (Test-Path -LiteralPath $cache) {{ Remove-Item -LiteralPath $cache -Recurse -Force }}
New-Item -ItemType Directory -Path $cache | Out-Null
Write-Output 'Agent cache cleared successfully!'",
        ps_quote(&path_text(&cache))
    );
    Action::new(
        "clear agent cache",
        move |_: &LocalContext| {
            recreate_dir(&cache)?;
            Ok("Agent cache cleared successfully!".to_string())
        },
        CommandTemplate::new(remote),
    )
}

fn recreate_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(DiagError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    }
    fs::create_dir_all(dir).map_err(|source| DiagError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

// ──────────────────── identity ────────────────────

pub fn agent_version(agent: &AgentConfig) -> Action {
    let exe = agent.client_exe.clone();
    let remote = format!(
        "$p = {}; if (Test-Path -LiteralPath $p) {{ (Get-Item -LiteralPath $p).VersionInfo.ProductVersion }} else {{ '{NOT_FOUND_SENTINEL}' }}",
        ps_quote(&path_text(&exe))
    );
    Action::new(
        "agent version",
        move |ctx: &LocalContext| ctx.platform.file_version(&exe),
        CommandTemplate::new(remote),
    )
}

/// Two lines: the host name, then a comma-separated IPv4 list.
pub fn workstation_info() -> Action {
    let remote = "hostname; ((Get-NetIPAddress -AddressFamily IPv4 | Where-Object { $_.IPAddress -ne '127.0.0.1' }).IPAddress) -join ', '";
    Action::new(
        "workstation info",
        |ctx: &LocalContext| {
            let host = ctx.platform.hostname()?;
            let addrs: Vec<String> = ctx
                .platform
                .ipv4_addresses()?
                .iter()
                .map(Ipv4Addr::to_string)
                .collect();
            Ok(format!("{host}\n{}", addrs.join(", ")))
        },
        CommandTemplate::new(remote),
    )
}

// ──────────────────── client settings ────────────────────

fn read_setting_script(agent: &AgentConfig, name: &str) -> String {
    format!(
        "$v = Get-ItemProperty -Path {} -Name {} -ErrorAction SilentlyContinue; if ($v) {{ $v.{} }} else {{ '{NOT_FOUND_SENTINEL}' }}",
        hklm(&agent.setting_key(name)),
        ps_quote(&agent.value_name),
        agent.value_name
    )
}

fn read_setting_local(ctx: &LocalContext, key: &str, value_name: &str) -> Result<String> {
    Ok(ctx
        .platform
        .registry()
        .read_value(key, value_name)?
        .to_string())
}

/// Read the `value` of one client setting (throttle, subsidiary, ...).
pub fn read_setting(agent: &AgentConfig, name: &str) -> Action {
    let key = agent.setting_key(name);
    let value_name = agent.value_name.clone();
    Action::new(
        format!("read {name}"),
        move |ctx: &LocalContext| read_setting_local(ctx, &key, &value_name),
        CommandTemplate::new(read_setting_script(agent, name)),
    )
}

/// Write a string `value` for one client setting and echo it back.
pub fn write_setting(agent: &AgentConfig, name: &str, value: &str) -> Action {
    let key = agent.setting_key(name);
    let value_name = agent.value_name.clone();
    let text = value.to_string();
    let remote = format!(
        "Set-ItemProperty -Path {} -Name {} -Value {} -ErrorAction Stop; Write-Output {}",
        hklm(&key),
        ps_quote(&value_name),
        ps_quote(value),
        ps_quote(value)
    );
    Action::new(
        format!("write {name}"),
        move |ctx: &LocalContext| {
            ctx.platform
                .registry()
                .write_value(&key, &value_name, &RegValue::String(text.clone()))?;
            Ok(text.clone())
        },
        CommandTemplate::new(remote),
    )
}

/// Both relay servers, one per line. Either missing is `NotFound`.
pub fn relay_servers(agent: &AgentConfig) -> Action {
    let keys: Vec<String> = agent.relay_keys.iter().map(|k| agent.setting_key(k)).collect();
    let value_name = agent.value_name.clone();
    let remote = agent
        .relay_keys
        .iter()
        .map(|k| read_setting_script(agent, k))
        .collect::<Vec<_>>()
        .join("\n");
    Action::new(
        "relay servers",
        move |ctx: &LocalContext| {
            let values = keys
                .iter()
                .map(|key| read_setting_local(ctx, key, &value_name))
                .collect::<Result<Vec<_>>>()?;
            Ok(values.join("\n"))
        },
        CommandTemplate::new(remote),
    )
}

// ──────────────────── logs & sources ────────────────────

/// Full path of the newest `*.log` in the agent logs directory.
pub fn latest_log(agent: &AgentConfig) -> Action {
    let logs = agent.logs_dir.clone();
    let remote = format!(
        "$f = Get-ChildItem -LiteralPath {} -Filter '*.log' -File -ErrorAction SilentlyContinue | Sort-Object LastWriteTime -Descending | Select-Object -First 1; if ($f) {{ $f.FullName }} else {{ '{NOT_FOUND_SENTINEL}' }}",
        ps_quote(&path_text(&logs))
    );
    Action::new(
        "latest log",
        move |_: &LocalContext| {
            let name = source::newest_matching(&logs, false, |n| {
                Path::new(n)
                    .extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("log"))
            })?
            .ok_or_else(|| DiagError::not_found(format!("*.log under {}", logs.display())))?;
            Ok(path_text(&logs.join(name)))
        },
        CommandTemplate::new(remote),
    )
}

/// The last `max_lines` lines of a file, each terminated by a newline.
pub fn tail_file(path: &str, max_lines: usize) -> Action {
    let local_path = PathBuf::from(path);
    let remote = format!(
        "$p = {}; if (Test-Path -LiteralPath $p -PathType Leaf) {{ Get-Content -LiteralPath $p -Tail {max_lines} }} else {{ '{NOT_FOUND_SENTINEL}' }}",
        ps_quote(path)
    );
    Action::new(
        format!("tail {path}"),
        move |_: &LocalContext| {
            Ok(source::read_tail(&local_path, max_lines)?
                .into_iter()
                .map(|mut line| {
                    line.push('\n');
                    line
                })
                .collect())
        },
        CommandTemplate::new(remote),
    )
}

/// Newest immediate subdirectories, one `name - Last Modified: ...` per line.
pub fn list_directory(path: &str, max_entries: usize) -> Action {
    let local_path = PathBuf::from(path);
    let remote = format!(
        "$p = {}; if (Test-Path -LiteralPath $p -PathType Container) {{ Get-ChildItem -LiteralPath $p -Directory | Sort-Object LastWriteTime -Descending | Select-Object -First {max_entries} | ForEach-Object {{ \"$($_.Name) - Last Modified: $($_.LastWriteTime.ToString('{PS_MODIFIED_FORMAT}'))\" }} }} else {{ '{NOT_FOUND_SENTINEL}' }}",
        ps_quote(path)
    );
    Action::new(
        format!("list {path}"),
        move |_: &LocalContext| {
            Ok(source::list_recent_dirs(&local_path, max_entries)?
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"))
        },
        CommandTemplate::new(remote),
    )
}

// ──────────────────── ports ────────────────────

/// `Open` or `Closed` for one protocol/port, probed from the target host.
pub fn port_probe(protocol: Protocol, host: &str, port: u16, timeout: Duration) -> Action {
    let probe_host = host.to_string();
    let timeout_ms = timeout.as_millis();
    let remote = match protocol {
        Protocol::Tcp => format!(
            "if (Test-NetConnection -ComputerName {} -Port {port} -InformationLevel Quiet -WarningAction SilentlyContinue) {{ 'Open' }} else {{ 'Closed' }}",
            ps_quote(host)
        ),
        Protocol::Udp => format!(
            "$u = New-Object System.Net.Sockets.UdpClient; $u.Client.ReceiveTimeout = {timeout_ms}
try {{ $u.Connect({}, {port}); [void]$u.Send([byte[]]@(), 0); $ep = $null; [void]$u.Receive([ref]$ep); 'Open' }} catch {{ 'Closed' }} finally {{ $u.Close() }}",
            ps_quote(host)
        ),
    };
    Action::new(
        format!("{protocol} port {port}"),
        move |_: &LocalContext| {
            let open = probe::probe(protocol, &probe_host, port, timeout)?;
            Ok(probe::open_label(open).to_string())
        },
        CommandTemplate::new(remote),
    )
}

// ──────────────────── registry ────────────────────

pub fn registry_get(key: &str, name: &str) -> Action {
    let (k, n) = (key.to_string(), name.to_string());
    let remote = format!(
        "$v = Get-ItemProperty -Path {} -Name {} -ErrorAction SilentlyContinue; if ($v) {{ $v.{} }} else {{ '{NOT_FOUND_SENTINEL}' }}",
        hklm(key),
        ps_quote(name),
        ps_quote(name)
    );
    Action::new(
        format!(r"registry get {key}\{name}"),
        move |ctx: &LocalContext| read_setting_local(ctx, &k, &n),
        CommandTemplate::new(remote),
    )
}

fn ps_property_type(kind: RegType) -> &'static str {
    match kind {
        RegType::String => "String",
        RegType::ExpandString => "ExpandString",
        RegType::Dword => "DWord",
        RegType::Qword => "QWord",
        RegType::MultiString => "MultiString",
        RegType::Binary => "Binary",
        RegType::None => "None",
    }
}

fn ps_value_literal(value: &RegValue) -> String {
    match value {
        RegValue::String(s) | RegValue::ExpandString(s) => ps_quote(s),
        RegValue::Dword(n) => n.to_string(),
        RegValue::Qword(n) => n.to_string(),
        RegValue::MultiString(items) => format!(
            "@({})",
            items.iter().map(|i| ps_quote(i)).collect::<Vec<_>>().join(", ")
        ),
        RegValue::Binary(bytes) => format!(
            "([byte[]]({}))",
            bytes
                .iter()
                .map(|b| format!("0x{b:02X}"))
                .collect::<Vec<_>>()
                .join(",")
        ),
        RegValue::None => "$null".to_string(),
    }
}

pub fn registry_set(key: &str, name: &str, value: RegValue) -> Action {
    let remote = format!(
        "if (-not (Test-Path -Path {path})) {{ New-Item -Path {path} -Force | Out-Null }}
New-ItemProperty -Path {path} -Name {name} -Value {value} -PropertyType {kind} -Force | Out-Null
Write-Output 'Value written.'",
        path = hklm(key),
        name = ps_quote(name),
        value = ps_value_literal(&value),
        kind = ps_property_type(value.reg_type()),
    );
    let (k, n) = (key.to_string(), name.to_string());
    Action::new(
        format!(r"registry set {key}\{name}"),
        move |ctx: &LocalContext| {
            ctx.platform.registry().write_value(&k, &n, &value)?;
            Ok("Value written.".to_string())
        },
        CommandTemplate::new(remote),
    )
}

/// Subkeys (suffixed with `\`) followed by `name (TYPE): data` value lines.
pub fn registry_list(key: &str) -> Action {
    let k = key.to_string();
    let remote = format!(
        "$p = {}; if (Test-Path -Path $p) {{ Get-ChildItem -Path $p | ForEach-Object {{ \"$($_.PSChildName)\\\" }}; $i = Get-Item -Path $p; $i.GetValueNames() | ForEach-Object {{ \"$_ ($($i.GetValueKind($_))): $($i.GetValue($_))\" }} }} else {{ '{NOT_FOUND_SENTINEL}' }}",
        hklm(key)
    );
    Action::new(
        format!("registry list {key}"),
        move |ctx: &LocalContext| {
            let registry = ctx.platform.registry();
            let mut lines: Vec<String> = registry
                .list_subkeys(&k)?
                .into_iter()
                .map(|s| format!("{s}\\"))
                .collect();
            lines.extend(format_value_listing(&registry.list_values(&k)?));
            Ok(lines.join("\n"))
        },
        CommandTemplate::new(remote),
    )
}
