//! End-to-end tests over a real loopback socket: listener thread, parser,
//! router, dispatcher, devices and envelope together.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use altair_core::config::{AltairConfig, DeviceConfig};
use altair_core::http::HttpListener;
use altair_core::server::AltairServer;

fn device(device_type: &str, name: &str) -> DeviceConfig {
    DeviceConfig {
        device_type: device_type.to_string(),
        name: name.to_string(),
        watchdog_timeout_minutes: None,
        switch_count: None,
    }
}

struct TestServer {
    ctx: Arc<altair_core::server::ServerContext>,
    port: u16,
    listener_thread: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    fn start(devices: Vec<DeviceConfig>) -> Self {
        let config = AltairConfig { devices, ..AltairConfig::default() };
        let server = AltairServer::new(config).expect("server builds");
        let ctx = server.context();

        let listener = HttpListener::bind("127.0.0.1", 0).expect("bind");
        let port = listener.local_addr().unwrap().port();
        let run_ctx = Arc::clone(&ctx);
        let listener_thread = std::thread::spawn(move || listener.run(&run_ctx));

        Self { ctx, port, listener_thread: Some(listener_thread) }
    }

    fn send(&self, raw: &str) -> (u16, serde_json::Value) {
        let (status, body) = self.send_raw(raw);
        let json = serde_json::from_str(&body).expect("response body is valid JSON");
        (status, json)
    }

    fn send_raw(&self, raw: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();

        let status: u16 = response
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("status line");
        let body = response
            .split_once("\r\n\r\n")
            .map(|(_, b)| b.to_string())
            .unwrap_or_default();
        (status, body)
    }

    fn get(&self, path: &str) -> (u16, serde_json::Value) {
        self.send(&format!("GET {} HTTP/1.1\r\nHost: test\r\nUser-Agent: curl/8.0\r\n\r\n", path))
    }

    fn put(&self, path: &str, body: &str) -> (u16, serde_json::Value) {
        self.send(&format!(
            "PUT {} HTTP/1.1\r\nHost: test\r\nContent-Length: {}\r\n\r\n{}",
            path,
            body.len(),
            body
        ))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.ctx.shutdown();
        if let Some(handle) = self.listener_thread.take() {
            let _ = handle.join();
        }
    }
}

#[test]
fn get_connected_round_trip() {
    let server = TestServer::start(vec![device("camera", "Main imager")]);
    let (status, json) = server.get("/api/v1/camera/0/connected?ClientID=3&ClientTransactionID=12");
    assert_eq!(status, 200);
    assert_eq!(json["Value"], false);
    assert_eq!(json["ClientTransactionID"], 12);
    assert_eq!(json["ErrorNumber"], 0);
    assert_eq!(json["ErrorMessage"], "");
    assert!(json["ServerTransactionID"].as_u64().unwrap() >= 1);
}

#[test]
fn put_then_get_connected() {
    let server = TestServer::start(vec![device("filterwheel", "Wheel")]);

    let (status, json) = server.put("/api/v1/filterwheel/0/connected", "Connected=true&ClientID=1");
    assert_eq!(status, 200);
    assert_eq!(json["ErrorNumber"], 0);

    let (_, json) = server.get("/api/v1/filterwheel/0/connected");
    assert_eq!(json["Value"], true);
}

#[test]
fn missing_device_yields_not_found_400() {
    let server = TestServer::start(vec![]);
    let (status, json) = server.get("/api/v1/filterwheel/0/connected");
    assert_eq!(status, 400);
    assert_ne!(json["ErrorNumber"], 0);
}

#[test]
fn unknown_command_yields_400_with_envelope() {
    let server = TestServer::start(vec![device("camera", "cam")]);
    let (status, json) = server.get("/api/v1/camera/0/fnord");
    assert_eq!(status, 400);
    assert!(json["ErrorMessage"].as_str().unwrap().contains("fnord"));
}

#[test]
fn management_api_versions() {
    let server = TestServer::start(vec![device("camera", "cam")]);
    let (status, json) = server.get("/management/apiversions");
    assert_eq!(status, 200);
    assert_eq!(json["Value"], serde_json::json!([1]));
}

#[test]
fn management_configured_devices_lists_instruments() {
    let server = TestServer::start(vec![device("camera", "cam"), device("switch", "power")]);
    let (_, json) = server.get("/management/v1/configureddevices");
    let list = json["Value"].as_array().unwrap();
    assert_eq!(list.len(), 2);
}

#[test]
fn bad_paths_get_fixed_400() {
    let server = TestServer::start(vec![]);
    let (status, body) = server.send_raw("GET /favicon.ico HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(status, 400);
    assert!(body.contains("400 Bad Request"));
}

#[test]
fn top_level_page_is_html() {
    let server = TestServer::start(vec![device("camera", "cam")]);
    let (status, body) = server.send_raw("GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(status, 200);
    assert!(body.contains("<html>"));
    assert!(body.contains("cam"));
}

#[test]
fn every_response_is_a_complete_envelope() {
    let server = TestServer::start(vec![device("camera", "cam")]);
    for path in [
        "/api/v1/camera/0/name",
        "/api/v1/camera/0/devicestate",
        "/api/v1/camera/0/doesnotexist",
        "/api/v1/dome/0/azimuth",
    ] {
        let (_, json) = server.get(path);
        for field in ["ClientTransactionID", "ServerTransactionID", "ErrorNumber", "ErrorMessage"] {
            assert!(json.get(field).is_some(), "{} missing {}", path, field);
        }
    }
}
