//! Remote command execution over WS-Man (HTTP POST of a SOAP `CommandLine`).

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use crate::core::config::RemoteConfig;
use crate::core::errors::{DiagError, Result};
use crate::dispatch::target::RemoteHost;

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";
const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";

/// Sends one command to a remote host and returns its plain-text output.
pub trait RemoteTransport: Send + Sync {
    fn run(&self, host: &RemoteHost, command: &str) -> Result<String>;
}

/// Build the SOAP envelope carrying `command`.
#[must_use]
pub fn build_envelope(command: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd">
  <s:Header>
    <w:ResourceURI s:mustUnderstand="true">{SHELL_RESOURCE_URI}</w:ResourceURI>
    <w:OptionSet>
      <w:Option Name="WINRS_CONSOLEMODE_STDIN">TRUE</w:Option>
    </w:OptionSet>
    <w:OperationTimeout>PT60S</w:OperationTimeout>
  </s:Header>
  <s:Body>
    <w:CommandLine>
      <w:Command>{}</w:Command>
    </w:CommandLine>
  </s:Body>
</s:Envelope>"#,
        xml_escape(command)
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// WS-Man transport: `http://<host>:<port><path>`, Basic auth, fixed timeout.
pub struct WsmanTransport {
    client: Client,
    port: u16,
    path: String,
}

impl WsmanTransport {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self {
            client,
            port: config.port,
            path: config.path.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, host: &str) -> String {
        format!("http://{host}:{}{}", self.port, self.path)
    }
}

impl RemoteTransport for WsmanTransport {
    fn run(&self, host: &RemoteHost, command: &str) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint(&host.host))
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .basic_auth(&host.username, Some(host.secret.expose()))
            .body(build_envelope(command))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let details = if status.as_u16() == 401 {
                "authentication failed (HTTP 401)".to_string()
            } else {
                format!("HTTP {status}")
            };
            return Err(DiagError::network(&host.host, details));
        }
        Ok(response.text()?.trim().to_string())
    }
}

/// Scripted transport for tests: records every call and replays queued replies.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<(String, String)>>,
    replies: Mutex<VecDeque<Result<String>>>,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: Result<String>) {
        self.replies.lock().push_back(reply);
    }

    /// `(host, command)` pairs in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

impl RemoteTransport for RecordingTransport {
    fn run(&self, host: &RemoteHost, command: &str) -> Result<String> {
        self.calls
            .lock()
            .push((host.host.clone(), command.to_string()));
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}
