//! Hand-rolled HTTP layer
//!
//! A minimal HTTP/1.1 server implementation built from scratch on
//! `std::net::TcpListener`. Alpaca clients only ever issue small GET/PUT
//! requests, so the layer keeps the original wire tolerances (bare LF or
//! CR/LF line endings, `?`-delimited query data) as a compatibility
//! contract while using bounds-checked parsing throughout.
//!
//! - [`request`] - request parsing and user-agent classification
//! - [`response`] - response building and serialization
//! - [`server`] - the blocking accept/parse/dispatch/respond loop

pub mod request;
pub mod response;
pub mod server;

pub use request::{ClientKind, Method, Request};
pub use response::{HttpResponse, StatusCode};
pub use server::HttpListener;

/// Result type for HTTP operations
pub type HttpResult<T> = std::result::Result<T, HttpError>;

/// Maximum length of a single request or header line.
///
/// An overlong line is a reported parse error, not a silent truncation.
pub const MAX_LINE_LEN: usize = 1024;

/// Maximum request body size accepted from a client
pub const MAX_BODY_LEN: usize = 64 * 1024;

/// HTTP-specific error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    /// Invalid HTTP request format
    #[error("invalid HTTP request: {0}")]
    InvalidRequest(String),

    /// Method other than GET/PUT/POST/OPTIONS
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// A request or header line exceeded [`MAX_LINE_LEN`]
    #[error("request line too long (limit {limit} bytes)")]
    LineTooLong { limit: usize },

    /// Request body larger than [`MAX_BODY_LEN`]
    #[error("request body too large: {0} bytes")]
    BodyTooLarge(usize),

    /// Connection-related errors
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Server binding or startup errors
    #[error("server error: {0}")]
    ServerError(String),
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        HttpError::ConnectionError(err.to_string())
    }
}

/// HTTP protocol constants
pub mod constants {
    /// Common HTTP headers
    pub mod headers {
        pub const CONTENT_TYPE: &str = "Content-Type";
        pub const CONTENT_LENGTH: &str = "Content-Length";
        pub const CONNECTION: &str = "Connection";
        pub const USER_AGENT: &str = "User-Agent";
    }

    /// Common content types
    pub mod content_types {
        pub const JSON: &str = "application/json";
        pub const HTML: &str = "text/html; charset=utf-8";
        pub const TEXT: &str = "text/plain; charset=utf-8";
    }

    /// HTTP line ending
    pub const CRLF: &str = "\r\n";
}
