//! Process-wide server context and thread wiring
//!
//! [`ServerContext`] is the single shared-state object: the device
//! registry behind its mutex, the transaction and usage counters, and the
//! cooperative continue-flag. [`AltairServer`] builds the context from
//! configuration, registers the devices, and runs the three execution
//! contexts (HTTP listener, discovery responder, scheduler).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::config::{AltairConfig, DeviceConfig};
use crate::device::management::ManagementDevice;
use crate::device::registry::DeviceRegistry;
use crate::device::sim::{
    SimCamera, SimDome, SimFilterWheel, SimFocuser, SimSafetyMonitor, SimSwitch,
};
use crate::device::watchdog::Watchdog;
use crate::device::{now_epoch_secs, AlpacaDevice, ServerInfo};
use crate::discovery::DiscoveryResponder;
use crate::http::{ClientKind, HttpListener};
use crate::protocol::commands::DeviceType;
use crate::{scheduler, Error, Result};

/// Capacity of the in-memory request log backing the `/log` page.
const REQUEST_LOG_CAPACITY: usize = 128;

/// Shared state for the three execution contexts.
pub struct ServerContext {
    pub config: AltairConfig,
    pub server_info: ServerInfo,
    pub registry: Mutex<DeviceRegistry>,
    /// Cooperative shutdown flag, observed by every loop
    pub keep_running: AtomicBool,
    /// Actual HTTP port once the listener is bound
    pub http_port: AtomicU16,
    server_transaction_id: AtomicU32,
    user_agent_counts: [AtomicU32; ClientKind::COUNT],
    request_log: Mutex<VecDeque<String>>,
    started_at: i64,
}

impl ServerContext {
    pub fn new(config: AltairConfig) -> Self {
        let server_info = ServerInfo {
            location: config.server.location.clone(),
            ..ServerInfo::default()
        };
        let http_port = config.server.port;
        Self {
            config,
            server_info,
            registry: Mutex::new(DeviceRegistry::new()),
            keep_running: AtomicBool::new(true),
            http_port: AtomicU16::new(http_port),
            server_transaction_id: AtomicU32::new(0),
            user_agent_counts: Default::default(),
            request_log: Mutex::new(VecDeque::with_capacity(REQUEST_LOG_CAPACITY)),
            started_at: now_epoch_secs(),
        }
    }

    /// Next value of the process-wide monotonically increasing counter,
    /// incremented once per processed command regardless of device.
    pub fn next_server_transaction_id(&self) -> u32 {
        self.server_transaction_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count_user_agent(&self, kind: ClientKind) {
        self.user_agent_counts[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// (label, count) pairs for the stats page.
    pub fn user_agent_counts(&self) -> Vec<(&'static str, u32)> {
        [
            ClientKind::OwnClient,
            ClientKind::ConformanceTester,
            ClientKind::HttpTool,
            ClientKind::Browser,
            ClientKind::RestClient,
            ClientKind::Unrecognized,
            ClientKind::Unspecified,
        ]
        .iter()
        .map(|k| (k.label(), self.user_agent_counts[k.index()].load(Ordering::Relaxed)))
        .collect()
    }

    pub(crate) fn push_request_log(&self, line: String) {
        let mut log = self.request_log.lock().expect("request log lock poisoned");
        if log.len() == REQUEST_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(line);
    }

    pub fn recent_requests(&self) -> Vec<String> {
        self.request_log
            .lock()
            .expect("request log lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn uptime_secs(&self) -> i64 {
        now_epoch_secs() - self.started_at
    }

    /// Request cooperative shutdown.
    pub fn shutdown(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }
}

/// The assembled server.
pub struct AltairServer {
    ctx: Arc<ServerContext>,
}

impl AltairServer {
    /// Build the context and register the management device plus every
    /// configured instrument. Registry capacity exhaustion surfaces here
    /// as a startup error.
    pub fn new(config: AltairConfig) -> Result<Self> {
        let ctx = Arc::new(ServerContext::new(config));

        {
            let mut registry = ctx.registry.lock().expect("registry lock poisoned");
            registry.register(Box::new(ManagementDevice::new()))?;

            let devices = ctx.config.devices.clone();
            for device_config in &devices {
                let mut device = build_device(device_config)?;
                apply_watchdog(&ctx.config, device_config, device.as_mut());
                let number = registry.register(device)?;
                info!(
                    "registered {} #{} ({})",
                    device_config.device_type, number, device_config.name
                );
            }
        }

        Ok(Self { ctx })
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Bind the sockets, start the listener and discovery threads, and
    /// run the scheduler on the calling thread until shutdown.
    pub fn run(&self) -> Result<()> {
        let listener =
            HttpListener::bind(&self.ctx.config.server.host, self.ctx.config.server.port)?;
        let bound_port = listener.local_addr()?.port();
        self.ctx.http_port.store(bound_port, Ordering::SeqCst);
        info!("http listener on port {}", bound_port);

        let listener_ctx = Arc::clone(&self.ctx);
        let listener_thread = std::thread::Builder::new()
            .name("http-listener".to_string())
            .spawn(move || listener.run(&listener_ctx))
            .map_err(Error::Socket)?;

        let discovery_thread = if self.ctx.config.discovery.enabled {
            let responder = DiscoveryResponder::bind(
                &self.ctx.config.server.host,
                self.ctx.config.discovery.port,
                bound_port,
            )?;
            let discovery_ctx = Arc::clone(&self.ctx);
            Some(
                std::thread::Builder::new()
                    .name("discovery".to_string())
                    .spawn(move || responder.run(&discovery_ctx))
                    .map_err(Error::Socket)?,
            )
        } else {
            None
        };

        // The scheduler owns the calling thread until shutdown
        scheduler::run(&self.ctx);

        if listener_thread.join().is_err() {
            warn!("http listener thread panicked");
        }
        if let Some(handle) = discovery_thread {
            if handle.join().is_err() {
                warn!("discovery thread panicked");
            }
        }
        info!("clean exit");
        Ok(())
    }
}

/// Instantiate the simulated back-end for one configured device.
fn build_device(config: &DeviceConfig) -> Result<Box<dyn AlpacaDevice>> {
    let device_type = DeviceType::from_name(&config.device_type)
        .ok_or_else(|| Error::UnknownDeviceType(config.device_type.clone()))?;
    let device: Box<dyn AlpacaDevice> = match device_type {
        DeviceType::Camera => Box::new(SimCamera::new(&config.name)),
        DeviceType::Dome => Box::new(SimDome::new(&config.name)),
        DeviceType::Filterwheel => Box::new(SimFilterWheel::new(&config.name)),
        DeviceType::Focuser => Box::new(SimFocuser::new(&config.name)),
        DeviceType::SafetyMonitor => Box::new(SimSafetyMonitor::new(&config.name)),
        DeviceType::Switch => Box::new(SimSwitch::new(&config.name, config.switch_count.unwrap_or(8))),
        other => {
            return Err(Error::Config(format!(
                "no driver available for device type {}",
                other.name()
            )))
        }
    };
    Ok(device)
}

/// Arm the watchdog per config; the device-level override wins.
fn apply_watchdog(config: &AltairConfig, device_config: &DeviceConfig, device: &mut dyn AlpacaDevice) {
    let timeout = device_config.watchdog_timeout_minutes;
    if config.watchdog.enabled || timeout.is_some() {
        let minutes = timeout.unwrap_or(config.watchdog.timeout_minutes);
        device.common_mut().watchdog = Watchdog::armed(minutes, now_epoch_secs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(devices: Vec<DeviceConfig>) -> AltairConfig {
        AltairConfig { devices, ..AltairConfig::default() }
    }

    fn device(device_type: &str, name: &str) -> DeviceConfig {
        DeviceConfig {
            device_type: device_type.to_string(),
            name: name.to_string(),
            watchdog_timeout_minutes: None,
            switch_count: None,
        }
    }

    #[test]
    fn test_startup_registers_management_and_devices() {
        let server = AltairServer::new(config_with(vec![
            device("camera", "Main imager"),
            device("camera", "Guider"),
            device("filterwheel", "Wheel"),
        ]))
        .unwrap();

        let ctx = server.context();
        let registry = ctx.registry.lock().unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.count_by_type(DeviceType::Camera), 2);
        assert_eq!(registry.count_by_type(DeviceType::Management), 1);

        // The second camera got instance number 1
        let devices = registry.configured_devices();
        let guider = devices.iter().find(|d| d.device_name == "Guider").unwrap();
        assert_eq!(guider.device_number, 1);
    }

    #[test]
    fn test_unknown_type_fails_startup() {
        let result = AltairServer::new(config_with(vec![device("telescope", "scope")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_device_watchdog_override_arms() {
        let mut device_config = device("dome", "Dome");
        device_config.watchdog_timeout_minutes = Some(2);
        let server = AltairServer::new(config_with(vec![device_config])).unwrap();

        let ctx = server.context();
        let mut registry = ctx.registry.lock().unwrap();
        let dome = registry.find_mut(DeviceType::Dome, 0).unwrap();
        assert!(dome.common().watchdog.is_enabled());
        assert_eq!(dome.common().watchdog.timeout_minutes, 2);
    }

    #[test]
    fn test_transaction_counter_is_monotonic() {
        let ctx = ServerContext::new(AltairConfig::default());
        assert_eq!(ctx.next_server_transaction_id(), 1);
        assert_eq!(ctx.next_server_transaction_id(), 2);
        assert_eq!(ctx.next_server_transaction_id(), 3);
    }

    #[test]
    fn test_request_log_is_bounded() {
        let ctx = ServerContext::new(AltairConfig::default());
        for i in 0..(REQUEST_LOG_CAPACITY + 10) {
            ctx.push_request_log(format!("line {}", i));
        }
        let log = ctx.recent_requests();
        assert_eq!(log.len(), REQUEST_LOG_CAPACITY);
        assert_eq!(log[0], "line 10");
    }
}
