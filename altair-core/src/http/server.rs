//! HTTP listener loop
//!
//! Accepts one connection at a time, reads a complete request, hands it to
//! the protocol engine, writes the response, and closes. Requests are
//! processed strictly sequentially; device state machines keep running on
//! the scheduler thread in the meantime.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::{HttpError, HttpResponse, HttpResult, Request, MAX_BODY_LEN, MAX_LINE_LEN};
use crate::protocol;
use crate::server::ServerContext;

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-connection socket timeouts.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking HTTP listener bound to the configured address.
pub struct HttpListener {
    listener: TcpListener,
}

impl HttpListener {
    /// Bind to `host:port`. Failure here is a startup error.
    pub fn bind(host: &str, port: u16) -> HttpResult<Self> {
        let listener = TcpListener::bind((host, port))
            .map_err(|e| HttpError::ServerError(format!("failed to bind {}:{}: {}", host, port, e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| HttpError::ServerError(format!("failed to set nonblocking: {}", e)))?;
        Ok(Self { listener })
    }

    /// The actual bound address (useful when port 0 was requested).
    pub fn local_addr(&self) -> HttpResult<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the context's continue-flag is cleared.
    ///
    /// The flag is observed between accepts; an in-flight request always
    /// completes before the loop exits.
    pub fn run(&self, ctx: &Arc<ServerContext>) {
        while ctx.keep_running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("connection from {}", peer);
                    if let Err(e) = handle_connection(stream, ctx) {
                        // Empty reads from probing clients are routine
                        match e {
                            HttpError::InvalidRequest(ref msg) if msg == "empty request" => {}
                            _ => warn!("error handling connection from {}: {}", peer, e),
                        }
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
    }
}

/// Read, parse, dispatch and answer a single request.
fn handle_connection(mut stream: TcpStream, ctx: &Arc<ServerContext>) -> HttpResult<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;

    let peer = stream.peer_addr().ok();

    let raw = match read_request_bytes(&mut stream) {
        Ok(raw) => raw,
        // Bounded-size violations get a diagnosable 400, not a dropped
        // connection
        Err(e @ (HttpError::LineTooLong { .. } | HttpError::BodyTooLarge(_))) => {
            warn!("rejecting request: {}", e);
            let _ = stream.write_all(&HttpResponse::fixed_bad_request().to_bytes());
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let byte_count = raw.len() as u64;

    let response = match Request::parse(&raw) {
        Ok(mut request) => {
            request.remote_addr = peer;
            protocol::dispatch::handle_request(ctx, &request, byte_count)
        }
        Err(HttpError::InvalidRequest(msg)) if msg == "empty request" => {
            return Err(HttpError::InvalidRequest(msg));
        }
        Err(e) => {
            warn!("request parse failure: {}", e);
            HttpResponse::fixed_bad_request()
        }
    };

    let bytes = response.to_bytes();
    stream.write_all(&bytes)?;
    stream.flush()?;
    Ok(())
}

/// Read the request line, headers and `Content-Length` body bytes.
fn read_request_bytes(stream: &mut TcpStream) -> HttpResult<Vec<u8>> {
    let mut reader = BufReader::new(stream);
    let mut buffer: Vec<u8> = Vec::new();

    // Headers end at the first empty line; lines are length-bounded.
    loop {
        let mut line: Vec<u8> = Vec::new();
        let n = reader
            .by_ref()
            .take((MAX_LINE_LEN + 2) as u64)
            .read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        if n > MAX_LINE_LEN && !line.ends_with(b"\n") {
            return Err(HttpError::LineTooLong { limit: MAX_LINE_LEN });
        }
        buffer.extend_from_slice(&line);
        if line == b"\n" || line == b"\r\n" {
            break;
        }
    }

    if buffer.is_empty() {
        return Err(HttpError::InvalidRequest("empty request".to_string()));
    }

    let content_length = extract_content_length(&buffer)?;
    if content_length > 0 {
        if content_length > MAX_BODY_LEN {
            return Err(HttpError::BodyTooLarge(content_length));
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body)?;
        buffer.extend_from_slice(&body);
    }

    Ok(buffer)
}

/// Scan the header bytes for `Content-Length`.
fn extract_content_length(header_bytes: &[u8]) -> HttpResult<usize> {
    let text = String::from_utf8_lossy(header_bytes);
    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("content-length:") {
            return rest
                .trim()
                .parse::<usize>()
                .map_err(|e| HttpError::InvalidRequest(format!("invalid Content-Length: {}", e)));
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content_length() {
        let hdr = b"PUT /x HTTP/1.1\r\nContent-Length: 42\r\n\r\n";
        assert_eq!(extract_content_length(hdr).unwrap(), 42);
    }

    #[test]
    fn test_extract_content_length_absent() {
        let hdr = b"GET /x HTTP/1.1\r\nHost: y\r\n\r\n";
        assert_eq!(extract_content_length(hdr).unwrap(), 0);
    }

    #[test]
    fn test_extract_content_length_invalid() {
        let hdr = b"PUT /x HTTP/1.1\r\nContent-Length: nope\r\n\r\n";
        assert!(extract_content_length(hdr).is_err());
    }
}
