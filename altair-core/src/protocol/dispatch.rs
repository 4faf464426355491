//! Command dispatch
//!
//! Takes a parsed request, routes it, resolves the command against the
//! two-level tables, verifies the verb, invokes the matched device and
//! assembles the response envelope. Statistics and watchdog bookkeeping
//! for a command are completed under the registry lock, before the
//! response bytes are written.

use std::sync::Arc;

use log::{debug, warn};

use crate::device::{now_epoch_secs, CommandContext, ConfiguredDevice};
use crate::http::{HttpResponse, Method, Request};
use crate::logging;
use crate::pages;
use crate::server::ServerContext;

use super::commands::{self, DeviceType};
use super::envelope::{EnvelopeWriter, INCLUDE_COMMA};
use super::path::{RequestKind, RoutedRequest};
use super::{AlpacaErr, AlpacaStatus};

/// Entry point for every parsed request.
pub fn handle_request(ctx: &Arc<ServerContext>, request: &Request, byte_count: u64) -> HttpResponse {
    ctx.count_user_agent(request.client_kind);
    let route = RoutedRequest::route(request);
    ctx.log_request(request, &route);

    // One increment per processed command, regardless of device
    let server_txn = ctx.next_server_transaction_id();

    match route.kind {
        RequestKind::Api => {
            if request.method != Method::Get && request.method != Method::Put {
                return HttpResponse::fixed_bad_request();
            }
            dispatch_api(ctx, request, &route, server_txn, byte_count)
        }
        RequestKind::Management => dispatch_management(ctx, request, &route, server_txn, byte_count),
        RequestKind::Setup => pages::setup_page(ctx, &route),
        RequestKind::TopLevel => pages::top_level_page(ctx),
        RequestKind::Web => pages::web_page(ctx),
        RequestKind::Stats => pages::stats_page(ctx),
        RequestKind::Log => pages::log_page(ctx),
        RequestKind::Docs | RequestKind::ClassDocs | RequestKind::DriverDocs => {
            pages::docs_page(ctx)
        }
        RequestKind::Gps | RequestKind::Html | RequestKind::Form => {
            pages::placeholder_page(&route)
        }
        RequestKind::Invalid => {
            warn!("unroutable request: {}", request.request_line);
            HttpResponse::fixed_bad_request()
        }
    }
}

/// Dispatch `/api/v1/{type}/{number}/{command}`.
fn dispatch_api(
    ctx: &Arc<ServerContext>,
    request: &Request,
    route: &RoutedRequest,
    server_txn: u32,
    byte_count: u64,
) -> HttpResponse {
    // An unparseable device number is rejected before any dispatch
    if route.device_number < 0 {
        warn!("invalid device number in: {}", request.request_line);
        return HttpResponse::fixed_bad_request();
    }

    let device_type = match DeviceType::from_name(&route.device_type) {
        Some(t) if t != DeviceType::Management => t,
        _ => {
            warn!("unknown device type in: {}", request.request_line);
            return not_found_response(route, server_txn);
        }
    };

    dispatch_to_device(ctx, request, route, device_type, route.device_number, server_txn, byte_count, &[])
}

/// Dispatch `/management/...` through the registered management device.
fn dispatch_management(
    ctx: &Arc<ServerContext>,
    request: &Request,
    route: &RoutedRequest,
    server_txn: u32,
    byte_count: u64,
) -> HttpResponse {
    let snapshot = {
        let registry = ctx.registry.lock().expect("registry lock poisoned");
        registry.configured_devices()
    };
    dispatch_to_device(
        ctx,
        request,
        route,
        DeviceType::Management,
        -1,
        server_txn,
        byte_count,
        &snapshot,
    )
}

/// Look up the device, resolve the command, verify the verb, invoke, and
/// record statistics. Every path out of here produces a well-formed JSON
/// envelope except registry misses, which get the not-found envelope.
#[allow(clippy::too_many_arguments)]
fn dispatch_to_device(
    ctx: &Arc<ServerContext>,
    request: &Request,
    route: &RoutedRequest,
    device_type: DeviceType,
    device_number: i32,
    server_txn: u32,
    byte_count: u64,
    devices: &[ConfiguredDevice],
) -> HttpResponse {
    let is_put = request.method == Method::Put;

    let mut registry = ctx.registry.lock().expect("registry lock poisoned");
    let device = match registry.find_mut(device_type, device_number) {
        Some(d) => d,
        None => {
            drop(registry);
            debug!(
                "no {} device #{} registered (command {})",
                device_type.name(),
                device_number,
                route.command
            );
            return not_found_response(route, server_txn);
        }
    };

    let device_name = device.common().name.clone();
    let mut json = EnvelopeWriter::new();
    let mut http_status_400 = false;

    // Header fields mirroring the original server's envelope
    let mut outcome = json
        .add_string("Device", &device_name, INCLUDE_COMMA)
        .and_then(|_| json.add_string("Command", &route.command, INCLUDE_COMMA))
        .map_err(AlpacaErr::from);

    if outcome.is_ok() {
        outcome = match commands::find_in_table(&route.command, device.command_table())
            .or_else(|| commands::find_in_table(&route.command, commands::COMMON_CMD_TABLE))
        {
            None => {
                // The unknown string is logged verbatim for diagnosis
                warn!("unrecognized command \"{}\" for {}", route.command, device_name);
                http_status_400 = true;
                Err(AlpacaErr::invalid_operation(format!(
                    "Unrecognized command: {}",
                    route.command
                )))
            }
            Some(entry) if !entry.verb.accepts(is_put) => {
                // Verb mismatch: total counts, the per-verb counter does not
                device.common_mut().record_cmd_stats(entry.cmd, None, false);
                Err(AlpacaErr::invalid_operation(format!(
                    "Command {} does not accept {}",
                    entry.name,
                    request.method.as_str()
                )))
            }
            Some(entry) => {
                let mut cmd_ctx = CommandContext {
                    cmd: entry.cmd,
                    command_name: &route.command,
                    is_put,
                    content_data: &request.content_data,
                    json: &mut json,
                    devices,
                    server_info: &ctx.server_info,
                };
                let result = device.process_command(&mut cmd_ctx);
                device
                    .common_mut()
                    .record_cmd_stats(entry.cmd, Some(is_put), result.is_ok());
                if result.is_ok() {
                    // Watchdog bookkeeping happens-before the response write
                    device
                        .common_mut()
                        .watchdog
                        .record_valid_command(now_epoch_secs());
                }
                result
            }
        };
    }

    {
        let common = device.common_mut();
        common.total_cmds_processed += 1;
        common.total_bytes_received += byte_count;
        if outcome.is_err() {
            common.total_cmd_errors += 1;
        }
    }

    let (error_number, error_message) = match &outcome {
        Ok(()) => (AlpacaStatus::Success.code(), String::new()),
        Err(e) => (e.status.code(), e.message.clone()),
    };

    let body = match json.finish(route.client_transaction_id, server_txn, error_number, &error_message)
    {
        Ok(body) => body,
        Err(e) => {
            warn!("envelope overflow answering {}: {}", route.command, e);
            return HttpResponse::internal_server_error()
                .json(format!("{{\"ErrorNumber\": {}, \"ErrorMessage\": \"response too large\"}}", AlpacaStatus::InternalError.code()));
        }
    };
    device.common_mut().total_bytes_sent += body.len() as u64;
    drop(registry);

    if error_number != 0 || ctx.config.server.verbose_logging {
        logging::event(&device_name, &route.command, error_number, &error_message);
    }

    let response = if http_status_400 {
        HttpResponse::bad_request()
    } else {
        HttpResponse::ok()
    };
    response.json(body)
}

/// Envelope for a routed request that matches no registered device:
/// HTTP 400 with the not-found status, and no device method invoked.
fn not_found_response(route: &RoutedRequest, server_txn: u32) -> HttpResponse {
    let message = format!(
        "No {} device with number {}",
        if route.device_type.is_empty() { "such" } else { route.device_type.as_str() },
        route.device_number
    );
    logging::event(&route.device_type, &route.command, AlpacaStatus::NotImplemented.code(), &message);

    let mut json = EnvelopeWriter::new();
    let built = json
        .add_string("Command", &route.command, INCLUDE_COMMA)
        .is_ok();
    if !built {
        return HttpResponse::fixed_bad_request();
    }
    match json.finish(
        route.client_transaction_id,
        server_txn,
        AlpacaStatus::NotImplemented.code(),
        &message,
    ) {
        Ok(body) => HttpResponse::bad_request().json(body),
        Err(_) => HttpResponse::fixed_bad_request(),
    }
}

impl ServerContext {
    /// Record one request line for the `/log` page.
    fn log_request(&self, request: &Request, route: &RoutedRequest) {
        debug!(
            "{} {} [{:?}] client={} txn={}",
            request.method,
            request.target,
            route.kind,
            route.client_id,
            route.client_transaction_id
        );
        let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let peer = request
            .remote_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        self.push_request_log(format!(
            "{} {} {} {} ({})",
            stamp, peer, request.method, request.target, request.user_agent
        ));
    }
}
