//! Management API device
//!
//! The management endpoints are modelled as a device registered in the
//! registry like any other, so they share the dispatch, statistics and
//! envelope machinery. The dispatcher hands it a snapshot of the other
//! registered devices for `configureddevices`.

use crate::protocol::commands::{management, DeviceType};
use crate::protocol::envelope::{EnvelopeResult, EnvelopeWriter, INCLUDE_COMMA};
use crate::protocol::AlpacaResult;

use super::{AlpacaDevice, CommandContext, DeviceCommon};

/// The Alpaca protocol version this server implements.
pub const SUPPORTED_API_VERSIONS: &[u32] = &[1];

pub struct ManagementDevice {
    common: DeviceCommon,
}

impl ManagementDevice {
    pub fn new() -> Self {
        let mut common = DeviceCommon::new(
            DeviceType::Management,
            "management",
            "Altair management interface",
        );
        common.connected = true;
        Self { common }
    }
}

impl Default for ManagementDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AlpacaDevice for ManagementDevice {
    fn common(&self) -> &DeviceCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DeviceCommon {
        &mut self.common
    }

    fn process_command(&mut self, ctx: &mut CommandContext<'_>) -> AlpacaResult {
        match ctx.cmd {
            management::API_VERSIONS => {
                let versions: Vec<String> =
                    SUPPORTED_API_VERSIONS.iter().map(|v| v.to_string()).collect();
                ctx.json.add_raw("Value", &format!("[{}]", versions.join(", ")), INCLUDE_COMMA)?;
                Ok(())
            }
            management::DESCRIPTION => {
                let info = ctx.server_info;
                let value = format!(
                    "{{\"ServerName\": \"{}\", \"Manufacturer\": \"{}\", \"ManufacturerVersion\": \"{}\", \"Location\": \"{}\"}}",
                    info.server_name, info.manufacturer, info.manufacturer_version, info.location
                );
                ctx.json.add_raw("Value", &value, INCLUDE_COMMA)?;
                Ok(())
            }
            management::CONFIGURED_DEVICES => {
                let items: Vec<String> = ctx
                    .devices
                    .iter()
                    .map(|d| {
                        format!(
                            "{{\"DeviceName\": \"{}\", \"DeviceType\": \"{}\", \"DeviceNumber\": {}, \"UniqueID\": \"{}\"}}",
                            d.device_name,
                            d.device_type.display_name(),
                            d.device_number,
                            d.unique_id
                        )
                    })
                    .collect();
                ctx.json.add_raw("Value", &format!("[{}]", items.join(", ")), INCLUDE_COMMA)?;
                Ok(())
            }
            _ => self.handle_common(ctx),
        }
    }

    fn device_state_content(&self, json: &mut EnvelopeWriter) -> EnvelopeResult<bool> {
        json.add_named_bool("Connected", self.common.connected, INCLUDE_COMMA)?;
        Ok(true)
    }
}
