//! URL/path routing
//!
//! Decomposes an Alpaca request target into request kind, protocol
//! version, device type, device number and command, and pulls the client
//! correlation IDs out of the content data.
//!
//! Paths look like `/{kind}/v{N}/{deviceType}/{deviceNumber}/{command}`,
//! with the management API using shortened forms
//! (`/management/apiversions`, `/management/v1/description`).

use crate::http::Request;

/// Classification of the first path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Api,
    Setup,
    Management,
    Stats,
    Web,
    Docs,
    ClassDocs,
    DriverDocs,
    Log,
    Gps,
    Html,
    Form,
    /// Empty path, i.e. `GET /`
    TopLevel,
    Invalid,
}

/// First-segment lookup table. Matching is by prefix, case-insensitive,
/// mirroring the wire tolerance of the original server.
const REQUEST_KINDS: &[(&str, RequestKind)] = &[
    ("api", RequestKind::Api),
    ("classdocs", RequestKind::ClassDocs),
    ("docs", RequestKind::Docs),
    ("driverdocs", RequestKind::DriverDocs),
    ("form", RequestKind::Form),
    ("gps", RequestKind::Gps),
    ("html", RequestKind::Html),
    ("log", RequestKind::Log),
    ("management", RequestKind::Management),
    ("setup", RequestKind::Setup),
    ("stats", RequestKind::Stats),
    ("web", RequestKind::Web),
];

impl RequestKind {
    /// Classify a first path segment; empty means the top-level page.
    pub fn from_segment(segment: &str) -> RequestKind {
        if segment.is_empty() {
            return RequestKind::TopLevel;
        }
        for (name, kind) in REQUEST_KINDS {
            if segment.len() >= name.len() && segment[..name.len()].eq_ignore_ascii_case(name) {
                return *kind;
            }
        }
        RequestKind::Invalid
    }
}

/// A fully routed request, ready for dispatch.
#[derive(Debug, Clone)]
pub struct RoutedRequest {
    pub kind: RequestKind,
    /// Digit following `v` in the version segment; 0 when absent
    pub protocol_version: u32,
    /// Raw device-type segment, lowercase on the wire
    pub device_type: String,
    /// Parsed device number; -1 when absent or non-numeric. Callers must
    /// reject negative numbers with a bad-request response, never dispatch.
    pub device_number: i32,
    /// Command name, truncated at the first of `?`, `&` or space
    pub command: String,
    /// ClientID from the content data, 0 when absent
    pub client_id: u32,
    /// ClientTransactionID from the content data, clamped to >= 0
    pub client_transaction_id: u32,
}

impl RoutedRequest {
    /// Route a parsed HTTP request.
    pub fn route(request: &Request) -> RoutedRequest {
        let path = request.path();
        let mut segments = path.split('/').filter(|s| !s.is_empty());

        let first = segments.next().unwrap_or("");
        let kind = RequestKind::from_segment(first);

        let version_seg = segments.next().unwrap_or("");
        let type_seg = segments.next().unwrap_or("");
        let number_seg = segments.next().unwrap_or("");
        let command_seg = segments.next().unwrap_or("");

        let protocol_version = parse_version(version_seg);
        let device_number = parse_device_number(number_seg);

        // Management paths carry the command in whichever slot actually
        // holds it: /management/apiversions has it in the version slot,
        // /management/v1/description in the type slot.
        let command = if kind == RequestKind::Management {
            if !version_seg.is_empty() && !version_seg.starts_with('v') {
                version_seg
            } else {
                type_seg
            }
        } else {
            command_seg
        };
        let command = truncate_command(command);

        let client_id = keyword_argument(&request.content_data, "ClientID")
            .and_then(|v| v.parse::<i64>().ok())
            .map(|v| v.max(0) as u32)
            .unwrap_or(0);

        // Tolerate non-conformant clients: negative or missing transaction
        // IDs become 0 instead of propagating.
        let client_transaction_id = keyword_argument(&request.content_data, "ClientTransactionID")
            .and_then(|v| v.parse::<i64>().ok())
            .map(|v| v.max(0) as u32)
            .unwrap_or(0);

        RoutedRequest {
            kind,
            protocol_version,
            device_type: type_seg.to_string(),
            device_number,
            command: command.to_ascii_lowercase(),
            client_id,
            client_transaction_id,
        }
    }
}

/// Digit following `v`, e.g. `v1` -> 1.
fn parse_version(segment: &str) -> u32 {
    let mut chars = segment.chars();
    match (chars.next(), chars.next()) {
        (Some('v'), Some(d)) if d.is_ascii_digit() => d as u32 - '0' as u32,
        _ => 0,
    }
}

/// Parse the leading digits of the device-number segment; anything else
/// yields -1 so callers reject before dispatch.
fn parse_device_number(segment: &str) -> i32 {
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return -1;
    }
    digits.parse::<i32>().unwrap_or(-1)
}

/// Cut a command segment at the first of `?`, `&` or space.
fn truncate_command(segment: &str) -> &str {
    let end = segment
        .find(|c| c == '?' || c == '&' || c == ' ')
        .unwrap_or(segment.len());
    &segment[..end]
}

/// Find `keyword=value` in `&`-separated content data.
///
/// The keyword match is case-insensitive and must be terminated by `=`,
/// which keeps `Duration` from matching `Duration1`.
pub fn keyword_argument<'a>(data: &'a str, keyword: &str) -> Option<&'a str> {
    for pair in data.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key.trim().eq_ignore_ascii_case(keyword) {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Parse a boolean argument the way Alpaca clients send them.
pub fn parse_bool_argument(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;

    fn get(target: &str) -> Request {
        let raw = format!("GET {} HTTP/1.1\r\n\r\n", target);
        Request::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn test_api_path() {
        let routed = RoutedRequest::route(&get("/api/v1/filterwheel/0/position"));
        assert_eq!(routed.kind, RequestKind::Api);
        assert_eq!(routed.protocol_version, 1);
        assert_eq!(routed.device_type, "filterwheel");
        assert_eq!(routed.device_number, 0);
        assert_eq!(routed.command, "position");
    }

    #[test]
    fn test_empty_path_is_top_level() {
        let routed = RoutedRequest::route(&get("/"));
        assert_eq!(routed.kind, RequestKind::TopLevel);
    }

    #[test]
    fn test_invalid_device_number() {
        let routed = RoutedRequest::route(&get("/api/v1/camera/zero/connected"));
        assert_eq!(routed.device_number, -1);
    }

    #[test]
    fn test_device_number_leading_digits() {
        let routed = RoutedRequest::route(&get("/api/v1/camera/0junk/connected"));
        assert_eq!(routed.device_number, 0);
    }

    #[test]
    fn test_management_short_form() {
        let routed = RoutedRequest::route(&get("/management/apiversions"));
        assert_eq!(routed.kind, RequestKind::Management);
        assert_eq!(routed.command, "apiversions");
    }

    #[test]
    fn test_management_versioned_form() {
        let routed = RoutedRequest::route(&get("/management/v1/configureddevices"));
        assert_eq!(routed.kind, RequestKind::Management);
        assert_eq!(routed.command, "configureddevices");
    }

    #[test]
    fn test_command_truncated_at_query() {
        let routed = RoutedRequest::route(&get("/api/v1/camera/0/connected?ClientID=4"));
        assert_eq!(routed.command, "connected");
    }

    #[test]
    fn test_client_ids_extracted_case_insensitively() {
        let routed = RoutedRequest::route(&get(
            "/api/v1/camera/0/connected?clientid=7&CLIENTTRANSACTIONID=22",
        ));
        assert_eq!(routed.client_id, 7);
        assert_eq!(routed.client_transaction_id, 22);
    }

    #[test]
    fn test_negative_transaction_id_normalized_to_zero() {
        let body = "ClientID=5&ClientTransactionID=-3";
        let raw = format!(
            "PUT /api/v1/camera/0/connect HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let request = Request::parse(raw.as_bytes()).unwrap();
        let routed = RoutedRequest::route(&request);
        assert_eq!(routed.client_id, 5);
        assert_eq!(routed.client_transaction_id, 0);
    }

    #[test]
    fn test_keyword_requires_equals_terminator() {
        assert_eq!(keyword_argument("Duration1=9&Duration=4", "Duration"), Some("4"));
        assert_eq!(keyword_argument("DurationX", "Duration"), None);
    }

    #[test]
    fn test_unknown_first_segment_is_invalid() {
        let routed = RoutedRequest::route(&get("/favicon.ico"));
        assert_eq!(routed.kind, RequestKind::Invalid);
    }
}
