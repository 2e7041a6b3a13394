//! TCP/UDP reachability probes and port-check form validation.

#![allow(missing_docs)]

use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use serde::Serialize;

use crate::core::errors::{DiagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Self::Tcp),
            "UDP" => Ok(Self::Udp),
            other => Err(DiagError::validation(
                "protocol",
                format!("{other:?} is not TCP or UDP"),
            )),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        })
    }
}

#[must_use]
pub const fn open_label(open: bool) -> &'static str {
    if open { "Open" } else { "Closed" }
}

/// A validated port-check request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCheck {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// Validate raw form input. Nothing is dispatched when this fails.
pub fn parse_port_check(host: &str, port_text: &str, protocol_text: &str) -> Result<PortCheck> {
    let host = host.trim();
    if host.is_empty() {
        return Err(DiagError::validation("host", "host is empty"));
    }
    let port: u16 = port_text
        .trim()
        .parse()
        .map_err(|_| DiagError::validation("port", "Invalid port number."))?;
    if port == 0 {
        return Err(DiagError::validation("port", "Invalid port number."));
    }
    Ok(PortCheck {
        host: host.to_string(),
        port,
        protocol: Protocol::parse(protocol_text)?,
    })
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| DiagError::network(host, format!("resolution failed: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(DiagError::network(host, "no addresses"));
    }
    Ok(addrs)
}

/// Whether `host:port` accepts a TCP connection within `timeout`.
///
/// Refused or timed-out connections are `Ok(false)`; only resolution
/// failures are errors.
pub fn tcp_open(host: &str, port: u16, timeout: Duration) -> Result<bool> {
    for addr in resolve(host, port)? {
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Send an empty datagram and wait up to `timeout` for any reply.
pub fn udp_open(host: &str, port: u16, timeout: Duration) -> Result<bool> {
    let addr = resolve(host, port)?[0];
    let bind: SocketAddr = if addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0_u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind).map_err(|e| DiagError::network(host, format!("bind: {e}")))?;
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| DiagError::network(host, format!("set timeout: {e}")))?;
    if socket.send_to(&[], addr).is_err() {
        return Ok(false);
    }
    let mut buf = [0_u8; 1024];
    // Timeout, ICMP port-unreachable (reset/refused) and the rest all mean closed.
    Ok(socket.recv_from(&mut buf).is_ok())
}

pub fn probe(protocol: Protocol, host: &str, port: u16, timeout: Duration) -> Result<bool> {
    match protocol {
        Protocol::Tcp => tcp_open(host, port, timeout),
        Protocol::Udp => udp_open(host, port, timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn form_validation() {
        let ok = parse_port_check("127.0.0.1", " 52311 ", "tcp").unwrap();
        assert_eq!(ok.port, 52311);
        assert_eq!(ok.protocol, Protocol::Tcp);

        for bad in ["abc", "", "0", "70000", "-1"] {
            let err = parse_port_check("h", bad, "TCP").unwrap_err();
            assert_eq!(err.code(), "BFX-1101", "{bad}");
            assert!(err.to_string().contains("Invalid port number."));
        }
        assert!(parse_port_check("h", "80", "ICMP").is_err());
        assert!(parse_port_check(" ", "80", "TCP").is_err());
    }

    #[test]
    fn tcp_probe_sees_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(tcp_open("127.0.0.1", port, Duration::from_secs(1)).unwrap());
        drop(listener);
        assert!(!tcp_open("127.0.0.1", port, Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn udp_probe_needs_a_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();
        let echo = thread::spawn(move || {
            let mut buf = [0_u8; 16];
            let (_, from) = server.recv_from(&mut buf).unwrap();
            server.send_to(b"pong", from).unwrap();
        });
        assert!(udp_open("127.0.0.1", port, Duration::from_secs(1)).unwrap());
        echo.join().unwrap();

        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        assert!(!udp_open("127.0.0.1", port, Duration::from_millis(200)).unwrap());
    }

    #[test]
    fn unresolvable_host_is_error() {
        assert!(tcp_open("no-such-host.invalid", 80, Duration::from_millis(200)).is_err());
    }
}
