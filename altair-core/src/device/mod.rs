//! Device capability interface
//!
//! Every instrument the server exposes implements [`AlpacaDevice`]. The
//! trait owns the four engine-facing operations (command processing, the
//! cooperative state machine, the watchdog safety action, and device-state
//! reporting) while [`DeviceCommon`] carries the properties, statistics
//! and watchdog bookkeeping shared by all device kinds.
//!
//! - [`registry`] - fixed-capacity ordered collection of live devices
//! - [`watchdog`] - per-device timeout state machine
//! - [`management`] - the management API modelled as a device
//! - [`sim`] - simulated instruments standing in for hardware back-ends

pub mod management;
pub mod registry;
pub mod sim;
pub mod watchdog;

use crate::protocol::commands::{self, device_cmd_table, CmdEntry, DeviceType, MAX_DEVICE_CMDS};
use crate::protocol::envelope::{EnvelopeError, EnvelopeResult, EnvelopeWriter, INCLUDE_COMMA};
use crate::protocol::path::{keyword_argument, parse_bool_argument};
use crate::protocol::{AlpacaErr, AlpacaResult};

use watchdog::Watchdog;

/// Base state-machine poll interval when a device has nothing pending, in
/// microseconds.
pub const DEFAULT_STATE_MACHINE_DELAY_US: u64 = 5_000_000;

pub(crate) fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn now_epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Envelope overflow inside a device handler surfaces as an internal error
/// in the response envelope.
impl From<EnvelopeError> for AlpacaErr {
    fn from(err: EnvelopeError) -> Self {
        AlpacaErr::internal(err.to_string())
    }
}

/// Per-command statistics counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmdStats {
    pub total: u32,
    pub get: u32,
    pub put: u32,
    pub errors: u32,
}

/// CPU-time accounting for one device's state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuAccounting {
    pub total_nanos: u64,
    accumulated_nanos: u64,
    pub total_millis: u64,
}

impl CpuAccounting {
    /// Add one timed state-machine call.
    pub fn accumulate(&mut self, delta_nanos: u64) {
        self.total_nanos += delta_nanos;
        self.accumulated_nanos += delta_nanos;
        while self.accumulated_nanos >= 1_000_000 {
            self.accumulated_nanos -= 1_000_000;
            self.total_millis += 1;
        }
    }
}

/// Snapshot of one registered device, used by the management API and the
/// HTML status pages while the registry lock is held.
#[derive(Debug, Clone)]
pub struct ConfiguredDevice {
    pub device_name: String,
    pub device_type: DeviceType,
    pub device_number: u32,
    pub unique_id: String,
}

/// Static server identity reported by the management API.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub server_name: String,
    pub manufacturer: String,
    pub manufacturer_version: String,
    pub location: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            server_name: "Altair".to_string(),
            manufacturer: "Altair Team".to_string(),
            manufacturer_version: env!("CARGO_PKG_VERSION").to_string(),
            location: String::new(),
        }
    }
}

/// Everything the dispatcher hands a device for one command.
pub struct CommandContext<'a> {
    /// Resolved command code from the tables
    pub cmd: u16,
    /// The command name as routed, for diagnostics
    pub command_name: &'a str,
    /// True for PUT, false for GET
    pub is_put: bool,
    /// Raw `&`-separated key-value payload
    pub content_data: &'a str,
    /// The response envelope under construction
    pub json: &'a mut EnvelopeWriter,
    /// Registry snapshot, populated for management commands
    pub devices: &'a [ConfiguredDevice],
    /// Server identity, populated for management commands
    pub server_info: &'a ServerInfo,
}

impl CommandContext<'_> {
    /// Case-insensitive parameter lookup in the content data.
    pub fn param(&self, keyword: &str) -> Option<&str> {
        keyword_argument(self.content_data, keyword)
    }

    /// A required boolean parameter, e.g. `Connected=True`.
    pub fn require_bool(&self, keyword: &str) -> Result<bool, AlpacaErr> {
        self.param(keyword)
            .and_then(parse_bool_argument)
            .ok_or_else(|| AlpacaErr::invalid_value(format!("missing boolean argument {}", keyword)))
    }

    /// A required numeric parameter.
    pub fn require_f64(&self, keyword: &str) -> Result<f64, AlpacaErr> {
        self.param(keyword)
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| AlpacaErr::invalid_value(format!("missing numeric argument {}", keyword)))
    }

    /// A required integer parameter.
    pub fn require_i32(&self, keyword: &str) -> Result<i32, AlpacaErr> {
        self.param(keyword)
            .and_then(|v| v.parse::<i32>().ok())
            .ok_or_else(|| AlpacaErr::invalid_value(format!("missing integer argument {}", keyword)))
    }
}

/// Properties, statistics and watchdog state common to every device.
#[derive(Debug)]
pub struct DeviceCommon {
    pub device_type: DeviceType,
    /// Stable per-type instance number assigned by the registry
    pub device_number: u32,
    pub name: String,
    pub description: String,
    pub driver_info: String,
    pub driver_version: String,
    pub interface_version: i32,
    pub connected: bool,
    pub connecting: bool,
    pub unique_id: String,
    pub watchdog: Watchdog,
    /// Soft-delete flag; the scheduler reaps flagged devices at the end of
    /// its cycle, never mid-dispatch
    pub delete_pending: bool,
    pub total_cmds_processed: u64,
    pub total_cmd_errors: u64,
    pub total_bytes_received: u64,
    pub total_bytes_sent: u64,
    pub cpu: CpuAccounting,
    common_stats: [CmdStats; commands::common::COUNT],
    device_stats: [CmdStats; MAX_DEVICE_CMDS],
}

impl DeviceCommon {
    pub fn new(device_type: DeviceType, name: &str, description: &str) -> Self {
        Self {
            device_type,
            device_number: 0,
            name: name.to_string(),
            description: description.to_string(),
            driver_info: "Altair device driver".to_string(),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            interface_version: 1,
            connected: false,
            connecting: false,
            unique_id: uuid::Uuid::new_v4().to_string(),
            watchdog: Watchdog::disabled(),
            delete_pending: false,
            total_cmds_processed: 0,
            total_cmd_errors: 0,
            total_bytes_received: 0,
            total_bytes_sent: 0,
            cpu: CpuAccounting::default(),
            common_stats: [CmdStats::default(); commands::common::COUNT],
            device_stats: [CmdStats::default(); MAX_DEVICE_CMDS],
        }
    }

    /// Update the statistics bucket for one dispatched command.
    ///
    /// `counted_verb` is `Some(is_put)` only when the request verb matched
    /// the table entry; a verb mismatch still counts toward the total but
    /// leaves the per-verb counters untouched.
    pub fn record_cmd_stats(&mut self, cmd: u16, counted_verb: Option<bool>, success: bool) {
        let stats = if cmd >= commands::COMMON_CMD_OFFSET {
            let idx = (cmd - commands::COMMON_CMD_OFFSET) as usize;
            match self.common_stats.get_mut(idx) {
                Some(s) => s,
                None => return,
            }
        } else {
            match self.device_stats.get_mut(cmd as usize) {
                Some(s) => s,
                None => return,
            }
        };
        stats.total += 1;
        match counted_verb {
            Some(true) => stats.put += 1,
            Some(false) => stats.get += 1,
            None => {}
        }
        if !success {
            stats.errors += 1;
        }
    }

    /// Statistics for one command, for the stats page and tests.
    pub fn cmd_stats(&self, cmd: u16) -> CmdStats {
        if cmd >= commands::COMMON_CMD_OFFSET {
            let idx = (cmd - commands::COMMON_CMD_OFFSET) as usize;
            self.common_stats.get(idx).copied().unwrap_or_default()
        } else {
            self.device_stats.get(cmd as usize).copied().unwrap_or_default()
        }
    }

    /// Snapshot for the management API.
    pub fn configured_device(&self) -> ConfiguredDevice {
        ConfiguredDevice {
            device_name: self.name.clone(),
            device_type: self.device_type,
            device_number: self.device_number,
            unique_id: self.unique_id.clone(),
        }
    }
}

/// The polymorphic device capability.
///
/// `process_command` and `run_state_machine` must be non-blocking and
/// return quickly; hardware I/O belongs in a back-end thread.
pub trait AlpacaDevice: Send {
    fn common(&self) -> &DeviceCommon;

    fn common_mut(&mut self) -> &mut DeviceCommon;

    /// The device-specific command table; defaults to the table registered
    /// for this device type.
    fn command_table(&self) -> &'static [CmdEntry] {
        device_cmd_table(self.common().device_type)
    }

    /// Handle one resolved command, writing `Value` fields into the
    /// envelope. Common commands are expected to fall through to
    /// [`AlpacaDevice::handle_common`].
    fn process_command(&mut self, ctx: &mut CommandContext<'_>) -> AlpacaResult;

    /// Advance the device state machine. Returns the requested delay until
    /// the next poll, in microseconds.
    fn run_state_machine(&mut self) -> u64 {
        DEFAULT_STATE_MACHINE_DELAY_US
    }

    /// Safety action taken when the watchdog breaches. The base behaviour
    /// is an idempotent no-op.
    fn watchdog_timeout(&mut self) {}

    /// Write this device's operational values as named-value items (each
    /// with a trailing comma) into an open array. Returns true when
    /// content was written.
    fn device_state_content(&self, json: &mut EnvelopeWriter) -> EnvelopeResult<bool>;

    /// Common-command processing shared by every device kind. Concrete
    /// devices may intercept individual common commands before delegating
    /// here.
    fn handle_common(&mut self, ctx: &mut CommandContext<'_>) -> AlpacaResult {
        use crate::protocol::commands::common::*;

        match ctx.cmd {
            ACTION | COMMAND_BLIND | COMMAND_BOOL | COMMAND_STRING => {
                ctx.json.add_string("Value", "", INCLUDE_COMMA)?;
                Ok(())
            }
            CONNECTED => {
                if ctx.is_put {
                    let wanted = ctx.require_bool("Connected")?;
                    self.common_mut().connected = wanted;
                } else {
                    ctx.json.add_bool("Value", self.common().connected, INCLUDE_COMMA)?;
                }
                Ok(())
            }
            CONNECT => {
                let common = self.common_mut();
                common.connecting = false;
                common.connected = true;
                Ok(())
            }
            CONNECTING => {
                ctx.json.add_bool("Value", self.common().connecting, INCLUDE_COMMA)?;
                Ok(())
            }
            DESCRIPTION => {
                ctx.json.add_string("Value", &self.common().description, INCLUDE_COMMA)?;
                Ok(())
            }
            DEVICE_STATE => {
                ctx.json.begin_array("Value")?;
                self.device_state_content(ctx.json)?;
                let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
                ctx.json.add_named_string("TimeStamp", &stamp, false)?;
                ctx.json.end_array(INCLUDE_COMMA)?;
                Ok(())
            }
            DISCONNECT => {
                self.common_mut().connected = false;
                Ok(())
            }
            DRIVER_INFO => {
                ctx.json.add_string("Value", &self.common().driver_info, INCLUDE_COMMA)?;
                Ok(())
            }
            DRIVER_VERSION => {
                ctx.json.add_string("Value", &self.common().driver_version, INCLUDE_COMMA)?;
                Ok(())
            }
            INTERFACE_VERSION => {
                ctx.json.add_i32("Value", self.common().interface_version, INCLUDE_COMMA)?;
                Ok(())
            }
            NAME => {
                ctx.json.add_string("Value", &self.common().name, INCLUDE_COMMA)?;
                Ok(())
            }
            SUPPORTED_ACTIONS => {
                let names: Vec<String> = self
                    .command_table()
                    .iter()
                    .map(|e| format!("\"{}\"", e.name))
                    .collect();
                ctx.json.add_raw("Value", &format!("[{}]", names.join(", ")), INCLUDE_COMMA)?;
                Ok(())
            }
            READ_ALL => {
                let common = self.common();
                ctx.json.add_bool("connected", common.connected, INCLUDE_COMMA)?;
                ctx.json.add_string("description", &common.description, INCLUDE_COMMA)?;
                ctx.json.add_string("driverinfo", &common.driver_info, INCLUDE_COMMA)?;
                ctx.json.add_string("driverversion", &common.driver_version, INCLUDE_COMMA)?;
                ctx.json.add_i32("interfaceversion", common.interface_version, INCLUDE_COMMA)?;
                ctx.json.add_string("name", &common.name, INCLUDE_COMMA)?;
                ctx.json.begin_array("DeviceState")?;
                self.device_state_content(ctx.json)?;
                let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
                ctx.json.add_named_string("TimeStamp", &stamp, false)?;
                ctx.json.end_array(INCLUDE_COMMA)?;
                Ok(())
            }
            RESTART => {
                self.common_mut().delete_pending = true;
                Ok(())
            }
            _ => Err(AlpacaErr::invalid_operation("Unrecognized command")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::common;

    #[test]
    fn test_cmd_stats_bucketing() {
        let mut c = DeviceCommon::new(DeviceType::Camera, "cam", "test camera");
        c.record_cmd_stats(common::CONNECTED, Some(false), true);
        c.record_cmd_stats(common::CONNECTED, Some(true), true);
        c.record_cmd_stats(3, Some(false), false);

        let conn = c.cmd_stats(common::CONNECTED);
        assert_eq!(conn.total, 2);
        assert_eq!(conn.get, 1);
        assert_eq!(conn.put, 1);
        assert_eq!(conn.errors, 0);

        let dev = c.cmd_stats(3);
        assert_eq!(dev.total, 1);
        assert_eq!(dev.errors, 1);
    }

    #[test]
    fn test_verb_mismatch_counts_total_only() {
        let mut c = DeviceCommon::new(DeviceType::Camera, "cam", "test camera");
        c.record_cmd_stats(common::NAME, None, false);
        let s = c.cmd_stats(common::NAME);
        assert_eq!(s.total, 1);
        assert_eq!(s.get, 0);
        assert_eq!(s.put, 0);
        assert_eq!(s.errors, 1);
    }

    #[test]
    fn test_cpu_accounting_rollover() {
        let mut cpu = CpuAccounting::default();
        cpu.accumulate(600_000);
        cpu.accumulate(600_000);
        assert_eq!(cpu.total_millis, 1);
        assert_eq!(cpu.total_nanos, 1_200_000);
    }
}
