//! HTTP request parsing and representation
//!
//! Parses the raw bytes of one client request into a structured
//! [`Request`]. The parser keeps the wire tolerances Alpaca clients rely
//! on: bare LF or CR/LF (in either order) terminate a line, GET parameters
//! ride in the `?` query portion of the request target, and PUT parameters
//! arrive as a `Content-Length`-delimited form body.

use std::collections::HashMap;
use std::str::FromStr;

use super::{HttpError, HttpResult, MAX_BODY_LEN, MAX_LINE_LEN};

/// HTTP methods accepted by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Options => "OPTIONS",
        }
    }
}

impl FromStr for Method {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(HttpError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User-agent classification, kept purely for usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Another Altair instance or the bundled client tools
    OwnClient,
    /// The ASCOM ConformU conformance tester
    ConformanceTester,
    /// curl and friends
    HttpTool,
    /// A web browser
    Browser,
    /// RestSharp-based ASCOM clients
    RestClient,
    /// User-Agent present but not recognized
    Unrecognized,
    /// No User-Agent header at all
    Unspecified,
}

impl ClientKind {
    /// Number of variants, used to size the per-kind counters.
    pub const COUNT: usize = 7;

    /// Stable index into the usage counters.
    pub fn index(&self) -> usize {
        match self {
            ClientKind::OwnClient => 0,
            ClientKind::ConformanceTester => 1,
            ClientKind::HttpTool => 2,
            ClientKind::Browser => 3,
            ClientKind::RestClient => 4,
            ClientKind::Unrecognized => 5,
            ClientKind::Unspecified => 6,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClientKind::OwnClient => "Altair",
            ClientKind::ConformanceTester => "ConformU",
            ClientKind::HttpTool => "curl",
            ClientKind::Browser => "browser",
            ClientKind::RestClient => "RestSharp",
            ClientKind::Unrecognized => "unrecognized",
            ClientKind::Unspecified => "not-specified",
        }
    }
}

/// Headers collection; keys are stored lowercase.
pub type Headers = HashMap<String, String>;

/// One parsed client request.
///
/// Created per accepted connection and dropped once the response has been
/// written; never persisted.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request method
    pub method: Method,
    /// Raw request target, e.g. `/api/v1/camera/0/connected?ClientID=3`
    pub target: String,
    /// The full first line, kept for diagnostics
    pub request_line: String,
    /// Header fields, keys lowercased
    pub headers: Headers,
    /// The User-Agent value (possibly truncated, see [`classify_user_agent`])
    pub user_agent: String,
    /// Classification of the User-Agent for usage statistics
    pub client_kind: ClientKind,
    /// Key-value payload: the query substring for GET, the form body for PUT
    pub content_data: String,
    /// Declared Content-Length (0 when absent)
    pub content_length: usize,
    /// Peer address, when known
    pub remote_addr: Option<std::net::SocketAddr>,
}

impl Request {
    /// Parse one request from raw bytes.
    ///
    /// # Errors
    ///
    /// Fails on non-UTF-8 input, a malformed request line, an unsupported
    /// method, an overlong line, or a body shorter than its declared
    /// `Content-Length`.
    pub fn parse(raw: &[u8]) -> HttpResult<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| HttpError::InvalidRequest(format!("invalid UTF-8: {}", e)))?;

        let mut lines = LenientLines::new(text);

        let request_line = match lines.next_line()? {
            Some(line) if !line.is_empty() => line.to_string(),
            _ => return Err(HttpError::InvalidRequest("empty request".to_string())),
        };

        let (method, target) = parse_request_line(&request_line)?;

        // Header lines until the blank separator
        let mut headers = HashMap::new();
        loop {
            match lines.next_line()? {
                Some("") | None => break,
                Some(line) => {
                    if let Some((name, value)) = line.split_once(':') {
                        headers.insert(
                            name.trim().to_ascii_lowercase(),
                            value.trim().to_string(),
                        );
                    }
                }
            }
        }

        let content_length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if content_length > MAX_BODY_LEN {
            return Err(HttpError::BodyTooLarge(content_length));
        }

        let (user_agent, client_kind) =
            classify_user_agent(headers.get("user-agent").map(String::as_str));

        // GET parameters live after '?' in the target; PUT parameters are
        // the body itself.
        let content_data = match method {
            Method::Put | Method::Post => {
                let body = lines.rest();
                if body.len() < content_length {
                    return Err(HttpError::InvalidRequest(format!(
                        "body truncated: expected {} bytes, got {}",
                        content_length,
                        body.len()
                    )));
                }
                String::from_utf8_lossy(&body.as_bytes()[..content_length])
                    .trim()
                    .to_string()
            }
            _ => target
                .split_once('?')
                .map(|(_, query)| query.to_string())
                .unwrap_or_default(),
        };

        Ok(Request {
            method,
            target,
            request_line,
            headers,
            user_agent,
            client_kind,
            content_data,
            content_length,
            remote_addr: None,
        })
    }

    /// Get a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The target path without the query portion.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }
}

/// Parse `GET /path HTTP/1.1` into method and target.
fn parse_request_line(line: &str) -> HttpResult<(Method, String)> {
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HttpError::InvalidRequest("missing method".to_string()))?
        .parse()?;
    let target = parts
        .next()
        .ok_or_else(|| HttpError::InvalidRequest(format!("no target in: {}", line)))?
        .to_string();
    Ok((method, target))
}

/// Classify a User-Agent header value.
///
/// The conformance tester appends an arbitrarily long vendor string after a
/// `+`, so its agent string is truncated there before storage.
pub fn classify_user_agent(value: Option<&str>) -> (String, ClientKind) {
    let ua = match value {
        Some(v) if !v.is_empty() => v,
        _ => return ("not-specified".to_string(), ClientKind::Unspecified),
    };

    let starts = |prefix: &str| {
        ua.len() >= prefix.len() && ua[..prefix.len()].eq_ignore_ascii_case(prefix)
    };

    if starts("Altair") {
        (ua.to_string(), ClientKind::OwnClient)
    } else if starts("ConformU") {
        let truncated = ua.split('+').next().unwrap_or(ua);
        (truncated.to_string(), ClientKind::ConformanceTester)
    } else if starts("curl") {
        (ua.to_string(), ClientKind::HttpTool)
    } else if starts("Mozilla") {
        (ua.to_string(), ClientKind::Browser)
    } else if starts("RestSharp") {
        (ua.to_string(), ClientKind::RestClient)
    } else {
        (ua.to_string(), ClientKind::Unrecognized)
    }
}

/// Line iterator tolerating CR/LF, LF/CR, bare LF and bare CR endings.
struct LenientLines<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> LenientLines<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    /// Next line, or `None` past the end of input.
    fn next_line(&mut self) -> HttpResult<Option<&'a str>> {
        if self.pos >= self.text.len() {
            return Ok(None);
        }
        let bytes = self.text.as_bytes();
        let start = self.pos;
        let mut end = start;
        while end < bytes.len() && bytes[end] != b'\r' && bytes[end] != b'\n' {
            end += 1;
        }
        if end - start > MAX_LINE_LEN {
            return Err(HttpError::LineTooLong { limit: MAX_LINE_LEN });
        }
        // Swallow a two-character ending in either order
        let mut next = end;
        if next < bytes.len() {
            let first = bytes[next];
            next += 1;
            if next < bytes.len() {
                let second = bytes[next];
                if (first == b'\r' && second == b'\n') || (first == b'\n' && second == b'\r') {
                    next += 1;
                }
            }
        }
        self.pos = next;
        Ok(Some(&self.text[start..end]))
    }

    /// Everything not yet consumed, i.e. the body after the blank line.
    fn rest(&self) -> &'a str {
        &self.text[self.pos.min(self.text.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("put".parse::<Method>().unwrap(), Method::Put);
        assert!("DELETE".parse::<Method>().is_err());
    }

    #[test]
    fn test_parse_get_with_query() {
        let raw = b"GET /api/v1/camera/0/connected?ClientID=5&ClientTransactionID=9 HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path(), "/api/v1/camera/0/connected");
        assert_eq!(req.content_data, "ClientID=5&ClientTransactionID=9");
    }

    #[test]
    fn test_parse_put_with_body() {
        let body = "Connected=True&ClientID=3";
        let raw = format!(
            "PUT /api/v1/camera/0/connected HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let req = Request::parse(raw.as_bytes()).unwrap();
        assert_eq!(req.method, Method::Put);
        assert_eq!(req.content_data, body);
        assert_eq!(req.content_length, body.len());
    }

    #[test]
    fn test_bare_lf_line_endings() {
        let raw = b"GET /management/apiversions HTTP/1.1\nHost: x\nUser-Agent: curl/8.0\n\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.client_kind, ClientKind::HttpTool);
        assert_eq!(req.path(), "/management/apiversions");
    }

    #[test]
    fn test_truncated_put_body_is_an_error() {
        let raw = b"PUT /api/v1/camera/0/connect HTTP/1.1\r\nContent-Length: 50\r\n\r\nshort";
        assert!(Request::parse(raw).is_err());
    }

    #[test]
    fn test_overlong_line_is_reported() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN + 10));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        match Request::parse(&raw) {
            Err(HttpError::LineTooLong { .. }) => {}
            other => panic!("expected LineTooLong, got {:?}", other),
        }
    }

    #[test]
    fn test_user_agent_classification() {
        assert_eq!(classify_user_agent(Some("Altair/0.3")).1, ClientKind::OwnClient);
        assert_eq!(classify_user_agent(Some("curl/8.4.0")).1, ClientKind::HttpTool);
        assert_eq!(
            classify_user_agent(Some("Mozilla/5.0 (X11; Linux)")).1,
            ClientKind::Browser
        );
        assert_eq!(classify_user_agent(Some("RestSharp/106")).1, ClientKind::RestClient);
        assert_eq!(classify_user_agent(Some("weird-agent")).1, ClientKind::Unrecognized);
        assert_eq!(classify_user_agent(None).1, ClientKind::Unspecified);
    }

    #[test]
    fn test_conformu_agent_truncated_at_plus() {
        let (ua, kind) =
            classify_user_agent(Some("ConformU/3.0.0+some.very.long.vendor.build.string"));
        assert_eq!(kind, ClientKind::ConformanceTester);
        assert_eq!(ua, "ConformU/3.0.0");
    }
}
