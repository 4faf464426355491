//! Static command tables
//!
//! Two-level dispatch data: one table of commands common to every device
//! type, plus one table per device type. Entries map a case-insensitive
//! command name to a numeric command code and the verb it accepts.
//!
//! Command codes below [`COMMON_CMD_OFFSET`] are device-specific and
//! index that device's statistics bucket directly; codes at or above the
//! offset are common commands.

/// Device categories served by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Camera,
    CoverCalibrator,
    Dome,
    Filterwheel,
    Focuser,
    Management,
    ObservingConditions,
    Rotator,
    SafetyMonitor,
    Switch,
    Telescope,
}

/// Wire-name table for device types.
const DEVICE_TYPES: &[(&str, DeviceType)] = &[
    ("camera", DeviceType::Camera),
    ("covercalibrator", DeviceType::CoverCalibrator),
    ("dome", DeviceType::Dome),
    ("filterwheel", DeviceType::Filterwheel),
    ("focuser", DeviceType::Focuser),
    ("management", DeviceType::Management),
    ("observingconditions", DeviceType::ObservingConditions),
    ("rotator", DeviceType::Rotator),
    ("safetymonitor", DeviceType::SafetyMonitor),
    ("switch", DeviceType::Switch),
    ("telescope", DeviceType::Telescope),
];

impl DeviceType {
    /// Case-insensitive lookup of a wire name.
    pub fn from_name(name: &str) -> Option<DeviceType> {
        DEVICE_TYPES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, t)| *t)
    }

    /// Lowercase wire name, as used in URLs.
    pub fn name(&self) -> &'static str {
        DEVICE_TYPES
            .iter()
            .find(|(_, t)| t == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }

    /// Human-readable display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceType::Camera => "Camera",
            DeviceType::CoverCalibrator => "CoverCalibrator",
            DeviceType::Dome => "Dome",
            DeviceType::Filterwheel => "FilterWheel",
            DeviceType::Focuser => "Focuser",
            DeviceType::Management => "Management",
            DeviceType::ObservingConditions => "ObservingConditions",
            DeviceType::Rotator => "Rotator",
            DeviceType::SafetyMonitor => "SafetyMonitor",
            DeviceType::Switch => "Switch",
            DeviceType::Telescope => "Telescope",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Which verb a table entry accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Put,
    Both,
}

impl Verb {
    /// Does an incoming GET/PUT satisfy this entry?
    pub fn accepts(&self, is_put: bool) -> bool {
        match self {
            Verb::Get => !is_put,
            Verb::Put => is_put,
            Verb::Both => true,
        }
    }
}

/// One command-table entry.
#[derive(Debug, Clone, Copy)]
pub struct CmdEntry {
    pub name: &'static str,
    pub cmd: u16,
    pub verb: Verb,
}

const fn entry(name: &'static str, cmd: u16, verb: Verb) -> CmdEntry {
    CmdEntry { name, cmd, verb }
}

/// Command codes at or above this value are common commands; the rest are
/// device-specific. Statistics bucketing keys off this split.
pub const COMMON_CMD_OFFSET: u16 = 1000;

/// Size of the device-specific statistics bucket.
pub const MAX_DEVICE_CMDS: usize = 100;

/// Common command codes.
pub mod common {
    use super::COMMON_CMD_OFFSET;

    pub const ACTION: u16 = COMMON_CMD_OFFSET;
    pub const COMMAND_BLIND: u16 = COMMON_CMD_OFFSET + 1;
    pub const COMMAND_BOOL: u16 = COMMON_CMD_OFFSET + 2;
    pub const COMMAND_STRING: u16 = COMMON_CMD_OFFSET + 3;
    pub const CONNECTED: u16 = COMMON_CMD_OFFSET + 4;
    pub const CONNECT: u16 = COMMON_CMD_OFFSET + 5;
    pub const CONNECTING: u16 = COMMON_CMD_OFFSET + 6;
    pub const DESCRIPTION: u16 = COMMON_CMD_OFFSET + 7;
    pub const DEVICE_STATE: u16 = COMMON_CMD_OFFSET + 8;
    pub const DISCONNECT: u16 = COMMON_CMD_OFFSET + 9;
    pub const DRIVER_INFO: u16 = COMMON_CMD_OFFSET + 10;
    pub const DRIVER_VERSION: u16 = COMMON_CMD_OFFSET + 11;
    pub const INTERFACE_VERSION: u16 = COMMON_CMD_OFFSET + 12;
    pub const NAME: u16 = COMMON_CMD_OFFSET + 13;
    pub const SUPPORTED_ACTIONS: u16 = COMMON_CMD_OFFSET + 14;
    pub const READ_ALL: u16 = COMMON_CMD_OFFSET + 15;
    pub const RESTART: u16 = COMMON_CMD_OFFSET + 16;

    /// Number of common commands, sizes the common statistics bucket.
    pub const COUNT: usize = 17;
}

/// The shared table of commands every device type answers.
pub const COMMON_CMD_TABLE: &[CmdEntry] = &[
    entry("action", common::ACTION, Verb::Put),
    entry("commandblind", common::COMMAND_BLIND, Verb::Put),
    entry("commandbool", common::COMMAND_BOOL, Verb::Put),
    entry("commandstring", common::COMMAND_STRING, Verb::Put),
    entry("connected", common::CONNECTED, Verb::Both),
    entry("connect", common::CONNECT, Verb::Put),
    entry("connecting", common::CONNECTING, Verb::Get),
    entry("description", common::DESCRIPTION, Verb::Get),
    entry("devicestate", common::DEVICE_STATE, Verb::Get),
    entry("disconnect", common::DISCONNECT, Verb::Put),
    entry("driverinfo", common::DRIVER_INFO, Verb::Get),
    entry("driverversion", common::DRIVER_VERSION, Verb::Get),
    entry("interfaceversion", common::INTERFACE_VERSION, Verb::Get),
    entry("name", common::NAME, Verb::Get),
    entry("supportedactions", common::SUPPORTED_ACTIONS, Verb::Get),
    // vendor extras
    entry("readall", common::READ_ALL, Verb::Get),
    entry("restart", common::RESTART, Verb::Put),
];

/// Camera command codes.
pub mod camera {
    pub const BIN_X: u16 = 0;
    pub const BIN_Y: u16 = 1;
    pub const CAMERA_STATE: u16 = 2;
    pub const CCD_TEMPERATURE: u16 = 3;
    pub const COOLER_ON: u16 = 4;
    pub const GAIN: u16 = 5;
    pub const IMAGE_READY: u16 = 6;
    pub const LAST_EXPOSURE_DURATION: u16 = 7;
    pub const PERCENT_COMPLETED: u16 = 8;
    pub const SENSOR_NAME: u16 = 9;
    pub const SET_CCD_TEMPERATURE: u16 = 10;
    pub const START_EXPOSURE: u16 = 11;
    pub const STOP_EXPOSURE: u16 = 12;
    pub const ABORT_EXPOSURE: u16 = 13;
}

pub const CAMERA_CMD_TABLE: &[CmdEntry] = &[
    entry("abortexposure", camera::ABORT_EXPOSURE, Verb::Put),
    entry("binx", camera::BIN_X, Verb::Both),
    entry("biny", camera::BIN_Y, Verb::Both),
    entry("camerastate", camera::CAMERA_STATE, Verb::Get),
    entry("ccdtemperature", camera::CCD_TEMPERATURE, Verb::Get),
    entry("cooleron", camera::COOLER_ON, Verb::Both),
    entry("gain", camera::GAIN, Verb::Both),
    entry("imageready", camera::IMAGE_READY, Verb::Get),
    entry("lastexposureduration", camera::LAST_EXPOSURE_DURATION, Verb::Get),
    entry("percentcompleted", camera::PERCENT_COMPLETED, Verb::Get),
    entry("sensorname", camera::SENSOR_NAME, Verb::Get),
    entry("setccdtemperature", camera::SET_CCD_TEMPERATURE, Verb::Both),
    entry("startexposure", camera::START_EXPOSURE, Verb::Put),
    entry("stopexposure", camera::STOP_EXPOSURE, Verb::Put),
];

/// Filter wheel command codes.
pub mod filterwheel {
    pub const FOCUS_OFFSETS: u16 = 0;
    pub const NAMES: u16 = 1;
    pub const POSITION: u16 = 2;
}

pub const FILTERWHEEL_CMD_TABLE: &[CmdEntry] = &[
    entry("focusoffsets", filterwheel::FOCUS_OFFSETS, Verb::Get),
    entry("names", filterwheel::NAMES, Verb::Get),
    entry("position", filterwheel::POSITION, Verb::Both),
];

/// Dome command codes.
pub mod dome {
    pub const ABORT_SLEW: u16 = 0;
    pub const ALTITUDE: u16 = 1;
    pub const AT_HOME: u16 = 2;
    pub const AT_PARK: u16 = 3;
    pub const AZIMUTH: u16 = 4;
    pub const CAN_SET_SHUTTER: u16 = 5;
    pub const CLOSE_SHUTTER: u16 = 6;
    pub const FIND_HOME: u16 = 7;
    pub const OPEN_SHUTTER: u16 = 8;
    pub const PARK: u16 = 9;
    pub const SHUTTER_STATUS: u16 = 10;
    pub const SLEWING: u16 = 11;
    pub const SLEW_TO_AZIMUTH: u16 = 12;
}

pub const DOME_CMD_TABLE: &[CmdEntry] = &[
    entry("abortslew", dome::ABORT_SLEW, Verb::Put),
    entry("altitude", dome::ALTITUDE, Verb::Get),
    entry("athome", dome::AT_HOME, Verb::Get),
    entry("atpark", dome::AT_PARK, Verb::Get),
    entry("azimuth", dome::AZIMUTH, Verb::Get),
    entry("cansetshutter", dome::CAN_SET_SHUTTER, Verb::Get),
    entry("closeshutter", dome::CLOSE_SHUTTER, Verb::Put),
    entry("findhome", dome::FIND_HOME, Verb::Put),
    entry("openshutter", dome::OPEN_SHUTTER, Verb::Put),
    entry("park", dome::PARK, Verb::Put),
    entry("shutterstatus", dome::SHUTTER_STATUS, Verb::Get),
    entry("slewing", dome::SLEWING, Verb::Get),
    entry("slewtoazimuth", dome::SLEW_TO_AZIMUTH, Verb::Put),
];

/// Focuser command codes.
pub mod focuser {
    pub const ABSOLUTE: u16 = 0;
    pub const HALT: u16 = 1;
    pub const IS_MOVING: u16 = 2;
    pub const MAX_INCREMENT: u16 = 3;
    pub const MAX_STEP: u16 = 4;
    pub const MOVE: u16 = 5;
    pub const POSITION: u16 = 6;
    pub const STEP_SIZE: u16 = 7;
    pub const TEMP_COMP: u16 = 8;
    pub const TEMPERATURE: u16 = 9;
}

pub const FOCUSER_CMD_TABLE: &[CmdEntry] = &[
    entry("absolute", focuser::ABSOLUTE, Verb::Get),
    entry("halt", focuser::HALT, Verb::Put),
    entry("ismoving", focuser::IS_MOVING, Verb::Get),
    entry("maxincrement", focuser::MAX_INCREMENT, Verb::Get),
    entry("maxstep", focuser::MAX_STEP, Verb::Get),
    entry("move", focuser::MOVE, Verb::Put),
    entry("position", focuser::POSITION, Verb::Get),
    entry("stepsize", focuser::STEP_SIZE, Verb::Get),
    entry("tempcomp", focuser::TEMP_COMP, Verb::Both),
    entry("temperature", focuser::TEMPERATURE, Verb::Get),
];

/// Switch command codes.
pub mod switch {
    pub const CAN_WRITE: u16 = 0;
    pub const GET_SWITCH: u16 = 1;
    pub const GET_SWITCH_DESCRIPTION: u16 = 2;
    pub const GET_SWITCH_NAME: u16 = 3;
    pub const GET_SWITCH_VALUE: u16 = 4;
    pub const MAX_SWITCH: u16 = 5;
    pub const MAX_SWITCH_VALUE: u16 = 6;
    pub const MIN_SWITCH_VALUE: u16 = 7;
    pub const SET_SWITCH: u16 = 8;
    pub const SET_SWITCH_NAME: u16 = 9;
    pub const SET_SWITCH_VALUE: u16 = 10;
    pub const SWITCH_STEP: u16 = 11;
}

pub const SWITCH_CMD_TABLE: &[CmdEntry] = &[
    entry("canwrite", switch::CAN_WRITE, Verb::Get),
    entry("getswitch", switch::GET_SWITCH, Verb::Get),
    entry("getswitchdescription", switch::GET_SWITCH_DESCRIPTION, Verb::Get),
    entry("getswitchname", switch::GET_SWITCH_NAME, Verb::Get),
    entry("getswitchvalue", switch::GET_SWITCH_VALUE, Verb::Get),
    entry("maxswitch", switch::MAX_SWITCH, Verb::Get),
    entry("maxswitchvalue", switch::MAX_SWITCH_VALUE, Verb::Get),
    entry("minswitchvalue", switch::MIN_SWITCH_VALUE, Verb::Get),
    entry("setswitch", switch::SET_SWITCH, Verb::Put),
    entry("setswitchname", switch::SET_SWITCH_NAME, Verb::Put),
    entry("setswitchvalue", switch::SET_SWITCH_VALUE, Verb::Put),
    entry("switchstep", switch::SWITCH_STEP, Verb::Get),
];

/// Safety monitor command codes.
pub mod safetymonitor {
    pub const IS_SAFE: u16 = 0;
}

pub const SAFETYMONITOR_CMD_TABLE: &[CmdEntry] =
    &[entry("issafe", safetymonitor::IS_SAFE, Verb::Get)];

/// Management API command codes.
pub mod management {
    pub const API_VERSIONS: u16 = 0;
    pub const DESCRIPTION: u16 = 1;
    pub const CONFIGURED_DEVICES: u16 = 2;
}

pub const MANAGEMENT_CMD_TABLE: &[CmdEntry] = &[
    entry("apiversions", management::API_VERSIONS, Verb::Get),
    entry("configureddevices", management::CONFIGURED_DEVICES, Verb::Get),
    entry("description", management::DESCRIPTION, Verb::Get),
];

/// The device-specific table for a device type; empty when the type has
/// no specific commands wired up yet.
pub fn device_cmd_table(device_type: DeviceType) -> &'static [CmdEntry] {
    match device_type {
        DeviceType::Camera => CAMERA_CMD_TABLE,
        DeviceType::Dome => DOME_CMD_TABLE,
        DeviceType::Filterwheel => FILTERWHEEL_CMD_TABLE,
        DeviceType::Focuser => FOCUSER_CMD_TABLE,
        DeviceType::Management => MANAGEMENT_CMD_TABLE,
        DeviceType::SafetyMonitor => SAFETYMONITOR_CMD_TABLE,
        DeviceType::Switch => SWITCH_CMD_TABLE,
        _ => &[],
    }
}

/// Case-insensitive lookup within one table.
pub fn find_in_table(name: &str, table: &'static [CmdEntry]) -> Option<&'static CmdEntry> {
    table.iter().find(|e| e.name.eq_ignore_ascii_case(name))
}

/// Two-level lookup: the device-specific table first, then the common one.
pub fn find_command(name: &str, device_type: DeviceType) -> Option<&'static CmdEntry> {
    find_in_table(name, device_cmd_table(device_type))
        .or_else(|| find_in_table(name, COMMON_CMD_TABLE))
}

/// Reverse lookup of a command name for diagnostics.
pub fn command_name(cmd: u16, device_type: DeviceType) -> &'static str {
    let from = |table: &'static [CmdEntry]| {
        table.iter().find(|e| e.cmd == cmd).map(|e| e.name)
    };
    if cmd >= COMMON_CMD_OFFSET {
        from(COMMON_CMD_TABLE).unwrap_or("????")
    } else {
        from(device_cmd_table(device_type)).unwrap_or("????")
    }
}
