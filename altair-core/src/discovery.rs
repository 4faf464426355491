//! UDP discovery responder
//!
//! Clients broadcast the magic token to a fixed UDP port and receive a
//! JSON object naming the HTTP listen port. Stateless: a dropped reply is
//! not retried by the server; the client re-broadcasts.

use std::net::UdpSocket;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::server::ServerContext;
use crate::{Error, Result};

/// The standard Alpaca discovery port.
pub const DISCOVERY_PORT: u16 = 32227;

/// The discovery probe payload ("1" is the discovery protocol version).
pub const DISCOVERY_TOKEN: &str = "alpacadiscovery1";

/// Poll interval for observing the shutdown flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(250);

pub struct DiscoveryResponder {
    socket: UdpSocket,
    http_port: u16,
}

impl DiscoveryResponder {
    /// Bind the discovery socket. `http_port` is the value replies carry.
    pub fn bind(host: &str, discovery_port: u16, http_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((host, discovery_port)).map_err(Error::Socket)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT)).map_err(Error::Socket)?;
        info!("discovery responder on udp port {}", discovery_port);
        Ok(Self { socket, http_port })
    }

    /// The actual bound address (useful when port 0 was requested).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.socket.local_addr().map_err(Error::Socket)
    }

    /// Answer probes until the continue-flag clears.
    pub fn run(&self, ctx: &Arc<ServerContext>) {
        let mut buf = [0u8; 1024];
        while ctx.keep_running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((received, from)) => {
                    match discovery_reply(&buf[..received], self.http_port) {
                        Some(reply) => {
                            debug!("discovery probe from {}", from);
                            if let Err(e) = self.socket.send_to(reply.as_bytes(), from) {
                                warn!("discovery reply to {} failed: {}", from, e);
                            }
                        }
                        None => {
                            debug!("ignoring unknown datagram from {}", from);
                        }
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!("discovery recv error: {}", e);
                }
            }
        }
        info!("discovery responder stopped");
    }
}

/// The reply for one datagram, or `None` when the payload is not the
/// magic token and must be ignored.
pub fn discovery_reply(payload: &[u8], http_port: u16) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?;
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case(DISCOVERY_TOKEN) {
        Some(format!("{{\"alpacaport\": {}}}", http_port))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_token_answered() {
        let reply = discovery_reply(b"alpacadiscovery1", 6800).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["alpacaport"], 6800);
    }

    #[test]
    fn test_token_case_and_whitespace_tolerated() {
        assert!(discovery_reply(b"AlpacaDiscovery1\r\n", 80).is_some());
    }

    #[test]
    fn test_other_payloads_ignored() {
        assert!(discovery_reply(b"hello there", 80).is_none());
        assert!(discovery_reply(b"alpacadiscovery", 80).is_none());
        assert!(discovery_reply(b"", 80).is_none());
        assert!(discovery_reply(&[0xff, 0xfe], 80).is_none());
    }

    #[test]
    fn test_round_trip_over_loopback() {
        use crate::config::AltairConfig;
        use crate::server::ServerContext;

        let ctx = Arc::new(ServerContext::new(AltairConfig::default()));
        let responder = DiscoveryResponder::bind("127.0.0.1", 0, 7443).unwrap();
        let addr = responder.local_addr().unwrap();

        let run_ctx = Arc::clone(&ctx);
        let handle = std::thread::spawn(move || responder.run(&run_ctx));

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        client.send_to(DISCOVERY_TOKEN.as_bytes(), addr).unwrap();

        let mut buf = [0u8; 256];
        let (n, _) = client.recv_from(&mut buf).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(parsed["alpacaport"], 7443);

        ctx.keep_running.store(false, std::sync::atomic::Ordering::SeqCst);
        handle.join().unwrap();
    }
}
