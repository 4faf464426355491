//! HTML status pages
//!
//! Ancillary informational surfaces: the top-level page, the device web
//! page, the statistics page with per-command counters, the request log
//! and the command-table documentation. All are plain generated HTML.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::http::HttpResponse;
use crate::protocol::commands::{device_cmd_table, COMMON_CMD_TABLE};
use crate::protocol::path::RoutedRequest;
use crate::server::ServerContext;

fn page(title: &str, body: &str) -> HttpResponse {
    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{}</title></head>\n<body>\n<h1>{}</h1>\n{}\n<p><a href=\"/\">home</a> | <a href=\"/web\">devices</a> | <a href=\"/stats\">stats</a> | <a href=\"/log\">log</a> | <a href=\"/docs\">docs</a></p>\n</body>\n</html>\n",
        title, title, body
    );
    HttpResponse::ok().html(&html)
}

/// `GET /`
pub fn top_level_page(ctx: &Arc<ServerContext>) -> HttpResponse {
    let registry = ctx.registry.lock().expect("registry lock poisoned");
    let mut body = String::new();
    let _ = writeln!(
        body,
        "<p>{} version {} serving {} device(s), up {} s.</p>",
        ctx.server_info.server_name,
        ctx.server_info.manufacturer_version,
        registry.len(),
        ctx.uptime_secs()
    );
    let _ = writeln!(body, "<ul>");
    for device in registry.iter_live() {
        let c = device.common();
        let _ = writeln!(
            body,
            "<li>{} #{} &mdash; {}</li>",
            c.device_type.display_name(),
            c.device_number,
            c.name
        );
    }
    let _ = writeln!(body, "</ul>");
    page("Altair Alpaca server", &body)
}

/// `GET /web` - device list with links to their API commands.
pub fn web_page(ctx: &Arc<ServerContext>) -> HttpResponse {
    let registry = ctx.registry.lock().expect("registry lock poisoned");
    let mut body = String::new();
    let _ = writeln!(body, "<table border=\"1\">");
    let _ = writeln!(
        body,
        "<tr><th>Type</th><th>#</th><th>Name</th><th>Connected</th><th>Commands</th><th>Errors</th></tr>"
    );
    for device in registry.iter_live() {
        let c = device.common();
        let _ = writeln!(
            body,
            "<tr><td>{}</td><td>{}</td><td><a href=\"/setup/v1/{}/{}/setup\">{}</a></td><td>{}</td><td>{}</td><td>{}</td></tr>",
            c.device_type.display_name(),
            c.device_number,
            c.device_type.name(),
            c.device_number,
            c.name,
            c.connected,
            c.total_cmds_processed,
            c.total_cmd_errors
        );
    }
    let _ = writeln!(body, "</table>");
    page("Devices", &body)
}

/// `GET /stats` - per-command statistics plus user-agent counters.
pub fn stats_page(ctx: &Arc<ServerContext>) -> HttpResponse {
    let registry = ctx.registry.lock().expect("registry lock poisoned");
    let mut body = String::new();

    for device in registry.iter_live() {
        let c = device.common();
        let _ = writeln!(
            body,
            "<h2>{} #{} ({})</h2>",
            c.device_type.display_name(),
            c.device_number,
            c.name
        );
        let _ = writeln!(
            body,
            "<p>commands {} / errors {} / bytes in {} / bytes out {} / state-machine time {} ms</p>",
            c.total_cmds_processed,
            c.total_cmd_errors,
            c.total_bytes_received,
            c.total_bytes_sent,
            c.cpu.total_millis
        );
        let _ = writeln!(body, "<table border=\"1\">");
        let _ = writeln!(
            body,
            "<tr><th>Command</th><th>Total</th><th>GET</th><th>PUT</th><th>Errors</th></tr>"
        );
        for entry in device_cmd_table(c.device_type).iter().chain(COMMON_CMD_TABLE) {
            let s = c.cmd_stats(entry.cmd);
            if s.total == 0 {
                continue;
            }
            let _ = writeln!(
                body,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                entry.name, s.total, s.get, s.put, s.errors
            );
        }
        let _ = writeln!(body, "</table>");
    }

    let _ = writeln!(body, "<h2>Clients</h2>\n<table border=\"1\">");
    for (label, count) in ctx.user_agent_counts() {
        let _ = writeln!(body, "<tr><td>{}</td><td>{}</td></tr>", label, count);
    }
    let _ = writeln!(body, "</table>");
    page("Statistics", &body)
}

/// `GET /log` - the most recent request lines.
pub fn log_page(ctx: &Arc<ServerContext>) -> HttpResponse {
    let log = ctx.recent_requests();
    let mut body = String::from("<pre>\n");
    for line in &log {
        let _ = writeln!(body, "{}", line);
    }
    body.push_str("</pre>\n");
    page("Request log", &body)
}

/// `GET /docs` - command tables as clickable links, one section per
/// registered device.
pub fn docs_page(ctx: &Arc<ServerContext>) -> HttpResponse {
    let registry = ctx.registry.lock().expect("registry lock poisoned");
    let mut body = String::new();
    for device in registry.iter_live() {
        let c = device.common();
        let _ = writeln!(
            body,
            "<h2>{} #{}</h2>\n<ul>",
            c.device_type.display_name(),
            c.device_number
        );
        for entry in device_cmd_table(c.device_type).iter().chain(COMMON_CMD_TABLE) {
            let _ = writeln!(
                body,
                "<li><a href=\"/api/v1/{}/{}/{}\">{}</a> ({:?})</li>",
                c.device_type.name(),
                c.device_number,
                entry.name,
                entry.name,
                entry.verb
            );
        }
        let _ = writeln!(body, "</ul>");
    }
    page("Command tables", &body)
}

/// `GET /setup` and `/setup/v1/{type}/{n}/setup`.
pub fn setup_page(ctx: &Arc<ServerContext>, route: &RoutedRequest) -> HttpResponse {
    let registry = ctx.registry.lock().expect("registry lock poisoned");
    let mut body = String::new();
    if route.device_type.is_empty() {
        let _ = writeln!(body, "<p>No server-wide settings; per-device pages:</p><ul>");
        for device in registry.iter_live() {
            let c = device.common();
            let _ = writeln!(
                body,
                "<li><a href=\"/setup/v1/{}/{}/setup\">{} #{}</a></li>",
                c.device_type.name(),
                c.device_number,
                c.device_type.display_name(),
                c.device_number
            );
        }
        let _ = writeln!(body, "</ul>");
        return page("Setup", &body);
    }

    let mut found = false;
    for device in registry.iter_live() {
        let c = device.common();
        if c.device_type.name() == route.device_type && c.device_number as i32 == route.device_number
        {
            let _ = writeln!(body, "<p>{}</p>", c.description);
            let _ = writeln!(body, "<p>Driver: {} {}</p>", c.driver_info, c.driver_version);
            let _ = writeln!(body, "<p>UniqueID: {}</p>", c.unique_id);
            let _ = writeln!(
                body,
                "<p>Watchdog: {:?}, timeout {} min</p>",
                c.watchdog.state(),
                c.watchdog.timeout_minutes
            );
            found = true;
            break;
        }
    }
    if !found {
        return HttpResponse::fixed_bad_request();
    }
    page("Device setup", &body)
}

/// Informational paths with nothing behind them yet.
pub fn placeholder_page(route: &RoutedRequest) -> HttpResponse {
    page("Altair", &format!("<p>Nothing to see under {:?}.</p>", route.kind))
}
