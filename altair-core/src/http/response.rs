//! HTTP response building and serialization

use std::collections::BTreeMap;

use super::constants::{content_types, headers, CRLF};

/// HTTP status codes used by the protocol engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 200,
    BadRequest = 400,
    NotFound = 404,
    MethodNotAllowed = 405,
    InternalServerError = 500,
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn reason_phrase(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

/// HTTP response builder with a fluent API
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(headers::CONNECTION.to_string(), "close".to_string());
        headers.insert("Server".to_string(), "Altair/0.3".to_string());
        Self { status, headers, body: Vec::new() }
    }

    /// Create a 200 OK response
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    /// Create a 400 Bad Request response
    pub fn bad_request() -> Self {
        Self::new(StatusCode::BadRequest)
    }

    /// Create a 404 Not Found response
    pub fn not_found() -> Self {
        Self::new(StatusCode::NotFound)
    }

    /// Create a 500 Internal Server Error response
    pub fn internal_server_error() -> Self {
        Self::new(StatusCode::InternalServerError)
    }

    /// The fixed minimal body sent for unroutable or malformed requests.
    pub fn fixed_bad_request() -> Self {
        Self::bad_request().html("<HTML><HEAD><TITLE>400 Bad Request</TITLE></HEAD><BODY><H1>400 Bad Request</H1></BODY></HTML>")
    }

    /// Set a header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the body as raw bytes
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Set a plain-text body
    pub fn text(self, text: &str) -> Self {
        self.header(headers::CONTENT_TYPE, content_types::TEXT)
            .body(text.as_bytes().to_vec())
    }

    /// Set an HTML body
    pub fn html(self, html: &str) -> Self {
        self.header(headers::CONTENT_TYPE, content_types::HTML)
            .body(html.as_bytes().to_vec())
    }

    /// Set a JSON body
    pub fn json(self, json: String) -> Self {
        self.header(headers::CONTENT_TYPE, content_types::JSON)
            .body(json.into_bytes())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Serialize the full response for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("HTTP/1.1 {}{}", self.status, CRLF));
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        out.push_str(&format!("{}: {}{}", headers::CONTENT_LENGTH, self.body.len(), CRLF));
        out.push_str(CRLF);

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_and_content_length() {
        let resp = HttpResponse::ok().json("{\"Value\": 1}".to_string());
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 12\r\n"));
        assert!(text.ends_with("{\"Value\": 1}"));
    }

    #[test]
    fn test_fixed_bad_request() {
        let resp = HttpResponse::fixed_bad_request();
        assert_eq!(resp.status(), StatusCode::BadRequest);
        assert!(String::from_utf8_lossy(resp.body_bytes()).contains("400 Bad Request"));
    }
}
