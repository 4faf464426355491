//! Simulated instruments
//!
//! Stand-ins for the excluded hardware back-ends. Each simulator keeps a
//! small time-based state machine so the scheduler, watchdog and
//! device-state paths all see realistic behaviour: exposures progress,
//! filter wheels take time to move, the dome shutter travels, and the
//! dome's watchdog action drives it to a safe state.

use log::{info, warn};

use crate::protocol::commands::{camera, dome, filterwheel, focuser, safetymonitor, switch};
use crate::protocol::commands::DeviceType;
use crate::protocol::envelope::{EnvelopeResult, EnvelopeWriter, INCLUDE_COMMA};
use crate::protocol::{AlpacaErr, AlpacaResult};

use super::{
    now_epoch_millis, AlpacaDevice, CommandContext, DeviceCommon, DEFAULT_STATE_MACHINE_DELAY_US,
};

/// Poll interval while a simulated mechanism is in motion, microseconds.
const BUSY_DELAY_US: u64 = 100_000;

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

/// Exposure phases, reported by `camerastate` with the standard codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CameraState {
    Idle = 0,
    Exposing = 2,
    Reading = 3,
}

/// Simulated camera with a timed exposure state machine and a cooler that
/// drifts toward its setpoint.
pub struct SimCamera {
    common: DeviceCommon,
    state: CameraState,
    exposure_duration: f64,
    exposure_end_ms: i64,
    exposure_start_ms: i64,
    last_exposure_duration: f64,
    image_ready: bool,
    ccd_temperature: f64,
    target_temperature: f64,
    cooler_on: bool,
    gain: i32,
    bin_x: i32,
    bin_y: i32,
    sensor_name: String,
    last_cooler_step_ms: i64,
}

impl SimCamera {
    pub fn new(name: &str) -> Self {
        let mut common = DeviceCommon::new(DeviceType::Camera, name, "Simulated camera");
        common.interface_version = 3;
        Self {
            common,
            state: CameraState::Idle,
            exposure_duration: 0.0,
            exposure_end_ms: 0,
            exposure_start_ms: 0,
            last_exposure_duration: 0.0,
            image_ready: false,
            ccd_temperature: 10.0,
            target_temperature: 10.0,
            cooler_on: false,
            gain: 100,
            bin_x: 1,
            bin_y: 1,
            sensor_name: "SimSensor-1600".to_string(),
            last_cooler_step_ms: now_epoch_millis(),
        }
    }

    fn percent_completed(&self, now_ms: i64) -> i32 {
        match self.state {
            CameraState::Idle => 100,
            CameraState::Reading => 99,
            CameraState::Exposing => {
                let total = self.exposure_end_ms - self.exposure_start_ms;
                if total <= 0 {
                    return 100;
                }
                let done = (now_ms - self.exposure_start_ms).clamp(0, total);
                ((done * 100) / total) as i32
            }
        }
    }

    fn require_connected(&self) -> AlpacaResult {
        if self.common.connected {
            Ok(())
        } else {
            Err(AlpacaErr::not_connected())
        }
    }
}

impl AlpacaDevice for SimCamera {
    fn common(&self) -> &DeviceCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DeviceCommon {
        &mut self.common
    }

    fn process_command(&mut self, ctx: &mut CommandContext<'_>) -> AlpacaResult {
        match ctx.cmd {
            camera::BIN_X => {
                if ctx.is_put {
                    self.bin_x = ctx.require_i32("BinX")?;
                } else {
                    ctx.json.add_i32("Value", self.bin_x, INCLUDE_COMMA)?;
                }
                Ok(())
            }
            camera::BIN_Y => {
                if ctx.is_put {
                    self.bin_y = ctx.require_i32("BinY")?;
                } else {
                    ctx.json.add_i32("Value", self.bin_y, INCLUDE_COMMA)?;
                }
                Ok(())
            }
            camera::CAMERA_STATE => {
                ctx.json.add_i32("Value", self.state as i32, INCLUDE_COMMA)?;
                Ok(())
            }
            camera::CCD_TEMPERATURE => {
                ctx.json.add_f64("Value", self.ccd_temperature, INCLUDE_COMMA)?;
                Ok(())
            }
            camera::COOLER_ON => {
                if ctx.is_put {
                    self.cooler_on = ctx.require_bool("CoolerOn")?;
                } else {
                    ctx.json.add_bool("Value", self.cooler_on, INCLUDE_COMMA)?;
                }
                Ok(())
            }
            camera::GAIN => {
                if ctx.is_put {
                    self.gain = ctx.require_i32("Gain")?;
                } else {
                    ctx.json.add_i32("Value", self.gain, INCLUDE_COMMA)?;
                }
                Ok(())
            }
            camera::IMAGE_READY => {
                ctx.json.add_bool("Value", self.image_ready, INCLUDE_COMMA)?;
                Ok(())
            }
            camera::LAST_EXPOSURE_DURATION => {
                ctx.json.add_f64("Value", self.last_exposure_duration, INCLUDE_COMMA)?;
                Ok(())
            }
            camera::PERCENT_COMPLETED => {
                let pct = self.percent_completed(now_epoch_millis());
                ctx.json.add_i32("Value", pct, INCLUDE_COMMA)?;
                Ok(())
            }
            camera::SENSOR_NAME => {
                ctx.json.add_string("Value", &self.sensor_name, INCLUDE_COMMA)?;
                Ok(())
            }
            camera::SET_CCD_TEMPERATURE => {
                if ctx.is_put {
                    self.target_temperature = ctx.require_f64("SetCCDTemperature")?;
                } else {
                    ctx.json.add_f64("Value", self.target_temperature, INCLUDE_COMMA)?;
                }
                Ok(())
            }
            camera::START_EXPOSURE => {
                self.require_connected()?;
                if self.state != CameraState::Idle {
                    return Err(AlpacaErr::invalid_operation("exposure already in progress"));
                }
                let duration = ctx.require_f64("Duration")?;
                if duration < 0.0 {
                    return Err(AlpacaErr::invalid_value("Duration must be >= 0"));
                }
                let now = now_epoch_millis();
                self.exposure_duration = duration;
                self.exposure_start_ms = now;
                self.exposure_end_ms = now + (duration * 1000.0) as i64;
                self.image_ready = false;
                self.state = CameraState::Exposing;
                info!("{}: exposure started ({:.3} s)", self.common.name, duration);
                Ok(())
            }
            camera::STOP_EXPOSURE => {
                if self.state == CameraState::Exposing {
                    // A stopped exposure still reads out what it has
                    self.exposure_end_ms = now_epoch_millis();
                }
                Ok(())
            }
            camera::ABORT_EXPOSURE => {
                self.state = CameraState::Idle;
                self.image_ready = false;
                Ok(())
            }
            _ => self.handle_common(ctx),
        }
    }

    fn run_state_machine(&mut self) -> u64 {
        let now = now_epoch_millis();

        match self.state {
            CameraState::Exposing if now >= self.exposure_end_ms => {
                self.state = CameraState::Reading;
                BUSY_DELAY_US
            }
            CameraState::Exposing => BUSY_DELAY_US,
            CameraState::Reading => {
                self.state = CameraState::Idle;
                self.image_ready = true;
                self.last_exposure_duration = self.exposure_duration;
                info!("{}: exposure complete", self.common.name);
                DEFAULT_STATE_MACHINE_DELAY_US
            }
            CameraState::Idle => {
                // Cooler drifts toward the setpoint at ~1 degree/second
                if self.cooler_on && now - self.last_cooler_step_ms >= 1000 {
                    let diff = self.target_temperature - self.ccd_temperature;
                    self.ccd_temperature += diff.clamp(-1.0, 1.0);
                    self.last_cooler_step_ms = now;
                }
                DEFAULT_STATE_MACHINE_DELAY_US
            }
        }
    }

    fn device_state_content(&self, json: &mut EnvelopeWriter) -> EnvelopeResult<bool> {
        json.add_named_i32("CameraState", self.state as i32, INCLUDE_COMMA)?;
        json.add_named_f64("CCDTemperature", self.ccd_temperature, INCLUDE_COMMA)?;
        json.add_named_bool("CoolerOn", self.cooler_on, INCLUDE_COMMA)?;
        json.add_named_bool("ImageReady", self.image_ready, INCLUDE_COMMA)?;
        json.add_named_i32(
            "PercentCompleted",
            self.percent_completed(now_epoch_millis()),
            INCLUDE_COMMA,
        )?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Filter wheel
// ---------------------------------------------------------------------------

/// Time to move between adjacent filter slots.
const FILTER_SLOT_TRAVEL_MS: i64 = 500;

pub struct SimFilterWheel {
    common: DeviceCommon,
    names: Vec<String>,
    focus_offsets: Vec<i32>,
    position: i32,
    target_position: i32,
    move_end_ms: i64,
    moving: bool,
}

impl SimFilterWheel {
    pub fn new(name: &str) -> Self {
        let mut common = DeviceCommon::new(DeviceType::Filterwheel, name, "Simulated filter wheel");
        common.interface_version = 2;
        let names = ["Luminance", "Red", "Green", "Blue", "Ha"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            common,
            names,
            focus_offsets: vec![0, 120, 120, 130, 400],
            position: 0,
            target_position: 0,
            move_end_ms: 0,
            moving: false,
        }
    }

    pub fn slot_count(&self) -> i32 {
        self.names.len() as i32
    }
}

impl AlpacaDevice for SimFilterWheel {
    fn common(&self) -> &DeviceCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DeviceCommon {
        &mut self.common
    }

    fn process_command(&mut self, ctx: &mut CommandContext<'_>) -> AlpacaResult {
        match ctx.cmd {
            filterwheel::FOCUS_OFFSETS => {
                let items: Vec<String> =
                    self.focus_offsets.iter().map(|v| v.to_string()).collect();
                ctx.json.add_raw("Value", &format!("[{}]", items.join(", ")), INCLUDE_COMMA)?;
                Ok(())
            }
            filterwheel::NAMES => {
                let items: Vec<String> =
                    self.names.iter().map(|n| format!("\"{}\"", n)).collect();
                ctx.json.add_raw("Value", &format!("[{}]", items.join(", ")), INCLUDE_COMMA)?;
                Ok(())
            }
            filterwheel::POSITION => {
                if ctx.is_put {
                    let wanted = ctx.require_i32("Position")?;
                    if wanted < 0 || wanted >= self.slot_count() {
                        return Err(AlpacaErr::invalid_value(format!(
                            "Position {} out of range 0..{}",
                            wanted,
                            self.slot_count() - 1
                        )));
                    }
                    let distance = (wanted - self.position).unsigned_abs() as i64;
                    if distance > 0 {
                        self.target_position = wanted;
                        self.move_end_ms =
                            now_epoch_millis() + distance * FILTER_SLOT_TRAVEL_MS;
                        self.moving = true;
                    }
                } else {
                    // Position reads -1 while the wheel is in motion
                    let reported = if self.moving { -1 } else { self.position };
                    ctx.json.add_i32("Value", reported, INCLUDE_COMMA)?;
                }
                Ok(())
            }
            _ => self.handle_common(ctx),
        }
    }

    fn run_state_machine(&mut self) -> u64 {
        if self.moving {
            if now_epoch_millis() >= self.move_end_ms {
                self.position = self.target_position;
                self.moving = false;
                info!("{}: now at slot {}", self.common.name, self.position);
                DEFAULT_STATE_MACHINE_DELAY_US
            } else {
                BUSY_DELAY_US
            }
        } else {
            DEFAULT_STATE_MACHINE_DELAY_US
        }
    }

    fn device_state_content(&self, json: &mut EnvelopeWriter) -> EnvelopeResult<bool> {
        let reported = if self.moving { -1 } else { self.position };
        json.add_named_i32("Position", reported, INCLUDE_COMMA)?;
        json.add_named_bool("IsMoving", self.moving, INCLUDE_COMMA)?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Dome
// ---------------------------------------------------------------------------

/// Shutter status codes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutterState {
    Open = 0,
    Closed = 1,
    Opening = 2,
    Closing = 3,
}

/// Shutter travel time.
const SHUTTER_TRAVEL_MS: i64 = 3_000;

/// Slew rate in degrees per second.
const DOME_SLEW_DEG_PER_SEC: f64 = 5.0;

pub struct SimDome {
    common: DeviceCommon,
    azimuth: f64,
    target_azimuth: f64,
    slewing: bool,
    at_park: bool,
    shutter: ShutterState,
    shutter_deadline_ms: i64,
    last_slew_step_ms: i64,
}

impl SimDome {
    pub fn new(name: &str) -> Self {
        let mut common = DeviceCommon::new(DeviceType::Dome, name, "Simulated dome");
        common.interface_version = 2;
        Self {
            common,
            azimuth: 0.0,
            target_azimuth: 0.0,
            slewing: false,
            at_park: true,
            shutter: ShutterState::Closed,
            shutter_deadline_ms: 0,
            last_slew_step_ms: 0,
        }
    }

    fn start_shutter(&mut self, target: ShutterState) {
        self.shutter = target;
        self.shutter_deadline_ms = now_epoch_millis() + SHUTTER_TRAVEL_MS;
    }
}

impl AlpacaDevice for SimDome {
    fn common(&self) -> &DeviceCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DeviceCommon {
        &mut self.common
    }

    fn process_command(&mut self, ctx: &mut CommandContext<'_>) -> AlpacaResult {
        match ctx.cmd {
            dome::ABORT_SLEW => {
                self.slewing = false;
                self.target_azimuth = self.azimuth;
                Ok(())
            }
            dome::ALTITUDE => {
                ctx.json.add_f64("Value", 0.0, INCLUDE_COMMA)?;
                Ok(())
            }
            dome::AT_HOME => {
                ctx.json.add_bool("Value", self.azimuth == 0.0, INCLUDE_COMMA)?;
                Ok(())
            }
            dome::AT_PARK => {
                ctx.json.add_bool("Value", self.at_park, INCLUDE_COMMA)?;
                Ok(())
            }
            dome::AZIMUTH => {
                ctx.json.add_f64("Value", self.azimuth, INCLUDE_COMMA)?;
                Ok(())
            }
            dome::CAN_SET_SHUTTER => {
                ctx.json.add_bool("Value", true, INCLUDE_COMMA)?;
                Ok(())
            }
            dome::CLOSE_SHUTTER => {
                if self.shutter != ShutterState::Closed {
                    self.start_shutter(ShutterState::Closing);
                }
                Ok(())
            }
            dome::FIND_HOME => {
                self.target_azimuth = 0.0;
                self.slewing = true;
                self.at_park = false;
                self.last_slew_step_ms = now_epoch_millis();
                Ok(())
            }
            dome::OPEN_SHUTTER => {
                if self.shutter != ShutterState::Open {
                    self.start_shutter(ShutterState::Opening);
                }
                Ok(())
            }
            dome::PARK => {
                self.target_azimuth = 0.0;
                self.slewing = true;
                self.at_park = true;
                self.last_slew_step_ms = now_epoch_millis();
                Ok(())
            }
            dome::SHUTTER_STATUS => {
                ctx.json.add_i32("Value", self.shutter as i32, INCLUDE_COMMA)?;
                Ok(())
            }
            dome::SLEWING => {
                ctx.json.add_bool("Value", self.slewing, INCLUDE_COMMA)?;
                Ok(())
            }
            dome::SLEW_TO_AZIMUTH => {
                let az = ctx.require_f64("Azimuth")?;
                if !(0.0..360.0).contains(&az) {
                    return Err(AlpacaErr::invalid_value("Azimuth out of range 0..360"));
                }
                self.target_azimuth = az;
                self.slewing = true;
                self.at_park = false;
                self.last_slew_step_ms = now_epoch_millis();
                Ok(())
            }
            _ => self.handle_common(ctx),
        }
    }

    fn run_state_machine(&mut self) -> u64 {
        let now = now_epoch_millis();
        let mut busy = false;

        match self.shutter {
            ShutterState::Opening if now >= self.shutter_deadline_ms => {
                self.shutter = ShutterState::Open;
                info!("{}: shutter open", self.common.name);
            }
            ShutterState::Closing if now >= self.shutter_deadline_ms => {
                self.shutter = ShutterState::Closed;
                info!("{}: shutter closed", self.common.name);
            }
            ShutterState::Opening | ShutterState::Closing => busy = true,
            _ => {}
        }

        if self.slewing {
            let elapsed_s = (now - self.last_slew_step_ms).max(0) as f64 / 1000.0;
            let max_step = DOME_SLEW_DEG_PER_SEC * elapsed_s;
            let diff = self.target_azimuth - self.azimuth;
            if diff.abs() <= max_step {
                self.azimuth = self.target_azimuth;
                self.slewing = false;
            } else {
                self.azimuth += max_step * diff.signum();
                busy = true;
            }
            self.last_slew_step_ms = now;
        }

        if busy {
            BUSY_DELAY_US
        } else {
            DEFAULT_STATE_MACHINE_DELAY_US
        }
    }

    /// Safe state: an unattended dome closes its shutter.
    fn watchdog_timeout(&mut self) {
        if matches!(self.shutter, ShutterState::Open | ShutterState::Opening) {
            warn!("{}: watchdog timeout, closing shutter", self.common.name);
            self.start_shutter(ShutterState::Closing);
        }
    }

    fn device_state_content(&self, json: &mut EnvelopeWriter) -> EnvelopeResult<bool> {
        json.add_named_f64("Altitude", 0.0, INCLUDE_COMMA)?;
        json.add_named_f64("Azimuth", self.azimuth, INCLUDE_COMMA)?;
        json.add_named_bool("AtPark", self.at_park, INCLUDE_COMMA)?;
        json.add_named_i32("ShutterStatus", self.shutter as i32, INCLUDE_COMMA)?;
        json.add_named_bool("Slewing", self.slewing, INCLUDE_COMMA)?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Focuser
// ---------------------------------------------------------------------------

/// Steps moved per second.
const FOCUSER_STEPS_PER_SEC: i64 = 1_000;

pub struct SimFocuser {
    common: DeviceCommon,
    position: i32,
    target_position: i32,
    moving: bool,
    temp_comp: bool,
    temperature: f64,
    max_step: i32,
    last_step_ms: i64,
}

impl SimFocuser {
    pub fn new(name: &str) -> Self {
        let mut common = DeviceCommon::new(DeviceType::Focuser, name, "Simulated focuser");
        common.interface_version = 3;
        Self {
            common,
            position: 5_000,
            target_position: 5_000,
            moving: false,
            temp_comp: false,
            temperature: 12.5,
            max_step: 60_000,
            last_step_ms: 0,
        }
    }
}

impl AlpacaDevice for SimFocuser {
    fn common(&self) -> &DeviceCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DeviceCommon {
        &mut self.common
    }

    fn process_command(&mut self, ctx: &mut CommandContext<'_>) -> AlpacaResult {
        match ctx.cmd {
            focuser::ABSOLUTE => {
                ctx.json.add_bool("Value", true, INCLUDE_COMMA)?;
                Ok(())
            }
            focuser::HALT => {
                self.moving = false;
                self.target_position = self.position;
                Ok(())
            }
            focuser::IS_MOVING => {
                ctx.json.add_bool("Value", self.moving, INCLUDE_COMMA)?;
                Ok(())
            }
            focuser::MAX_INCREMENT | focuser::MAX_STEP => {
                ctx.json.add_i32("Value", self.max_step, INCLUDE_COMMA)?;
                Ok(())
            }
            focuser::MOVE => {
                let wanted = ctx.require_i32("Position")?;
                if wanted < 0 || wanted > self.max_step {
                    return Err(AlpacaErr::invalid_value("Position out of range"));
                }
                self.target_position = wanted;
                self.moving = wanted != self.position;
                self.last_step_ms = now_epoch_millis();
                Ok(())
            }
            focuser::POSITION => {
                ctx.json.add_i32("Value", self.position, INCLUDE_COMMA)?;
                Ok(())
            }
            focuser::STEP_SIZE => {
                ctx.json.add_f64("Value", 1.2, INCLUDE_COMMA)?;
                Ok(())
            }
            focuser::TEMP_COMP => {
                if ctx.is_put {
                    self.temp_comp = ctx.require_bool("TempComp")?;
                } else {
                    ctx.json.add_bool("Value", self.temp_comp, INCLUDE_COMMA)?;
                }
                Ok(())
            }
            focuser::TEMPERATURE => {
                ctx.json.add_f64("Value", self.temperature, INCLUDE_COMMA)?;
                Ok(())
            }
            _ => self.handle_common(ctx),
        }
    }

    fn run_state_machine(&mut self) -> u64 {
        if !self.moving {
            return DEFAULT_STATE_MACHINE_DELAY_US;
        }
        let now = now_epoch_millis();
        let steps = ((now - self.last_step_ms).max(0) * FOCUSER_STEPS_PER_SEC) / 1000;
        let diff = i64::from(self.target_position - self.position);
        if diff.abs() <= steps {
            self.position = self.target_position;
            self.moving = false;
        } else {
            self.position += (steps * diff.signum()) as i32;
        }
        self.last_step_ms = now;
        if self.moving {
            BUSY_DELAY_US
        } else {
            DEFAULT_STATE_MACHINE_DELAY_US
        }
    }

    fn device_state_content(&self, json: &mut EnvelopeWriter) -> EnvelopeResult<bool> {
        json.add_named_bool("IsMoving", self.moving, INCLUDE_COMMA)?;
        json.add_named_i32("Position", self.position, INCLUDE_COMMA)?;
        json.add_named_f64("Temperature", self.temperature, INCLUDE_COMMA)?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Switch bank
// ---------------------------------------------------------------------------

pub struct SimSwitch {
    common: DeviceCommon,
    names: Vec<String>,
    values: Vec<f64>,
}

impl SimSwitch {
    pub fn new(name: &str, count: usize) -> Self {
        let mut common = DeviceCommon::new(DeviceType::Switch, name, "Simulated switch bank");
        common.interface_version = 2;
        Self {
            common,
            names: (0..count).map(|i| format!("Switch {}", i)).collect(),
            values: vec![0.0; count],
        }
    }

    fn switch_id(&self, ctx: &CommandContext<'_>) -> Result<usize, AlpacaErr> {
        let id = ctx.require_i32("Id")?;
        if id < 0 || id as usize >= self.values.len() {
            return Err(AlpacaErr::invalid_value(format!(
                "Id {} out of range 0..{}",
                id,
                self.values.len() - 1
            )));
        }
        Ok(id as usize)
    }
}

impl AlpacaDevice for SimSwitch {
    fn common(&self) -> &DeviceCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DeviceCommon {
        &mut self.common
    }

    fn process_command(&mut self, ctx: &mut CommandContext<'_>) -> AlpacaResult {
        match ctx.cmd {
            switch::CAN_WRITE => {
                self.switch_id(ctx)?;
                ctx.json.add_bool("Value", true, INCLUDE_COMMA)?;
                Ok(())
            }
            switch::GET_SWITCH => {
                let id = self.switch_id(ctx)?;
                ctx.json.add_bool("Value", self.values[id] != 0.0, INCLUDE_COMMA)?;
                Ok(())
            }
            switch::GET_SWITCH_DESCRIPTION => {
                let id = self.switch_id(ctx)?;
                ctx.json.add_string(
                    "Value",
                    &format!("Simulated switch output {}", id),
                    INCLUDE_COMMA,
                )?;
                Ok(())
            }
            switch::GET_SWITCH_NAME => {
                let id = self.switch_id(ctx)?;
                ctx.json.add_string("Value", &self.names[id], INCLUDE_COMMA)?;
                Ok(())
            }
            switch::GET_SWITCH_VALUE => {
                let id = self.switch_id(ctx)?;
                ctx.json.add_f64("Value", self.values[id], INCLUDE_COMMA)?;
                Ok(())
            }
            switch::MAX_SWITCH => {
                ctx.json.add_i32("Value", self.values.len() as i32, INCLUDE_COMMA)?;
                Ok(())
            }
            switch::MAX_SWITCH_VALUE => {
                self.switch_id(ctx)?;
                ctx.json.add_f64("Value", 1.0, INCLUDE_COMMA)?;
                Ok(())
            }
            switch::MIN_SWITCH_VALUE => {
                self.switch_id(ctx)?;
                ctx.json.add_f64("Value", 0.0, INCLUDE_COMMA)?;
                Ok(())
            }
            switch::SET_SWITCH => {
                let id = self.switch_id(ctx)?;
                let on = ctx.require_bool("State")?;
                self.values[id] = if on { 1.0 } else { 0.0 };
                Ok(())
            }
            switch::SET_SWITCH_NAME => {
                let id = self.switch_id(ctx)?;
                let name = ctx
                    .param("Name")
                    .ok_or_else(|| AlpacaErr::invalid_value("missing Name argument"))?;
                self.names[id] = name.to_string();
                Ok(())
            }
            switch::SET_SWITCH_VALUE => {
                let id = self.switch_id(ctx)?;
                let value = ctx.require_f64("Value")?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(AlpacaErr::invalid_value("Value out of range 0..1"));
                }
                self.values[id] = value;
                Ok(())
            }
            switch::SWITCH_STEP => {
                self.switch_id(ctx)?;
                ctx.json.add_f64("Value", 1.0, INCLUDE_COMMA)?;
                Ok(())
            }
            _ => self.handle_common(ctx),
        }
    }

    fn device_state_content(&self, json: &mut EnvelopeWriter) -> EnvelopeResult<bool> {
        for (i, value) in self.values.iter().enumerate() {
            json.add_named_f64(&format!("Switch{}", i), *value, INCLUDE_COMMA)?;
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Safety monitor
// ---------------------------------------------------------------------------

pub struct SimSafetyMonitor {
    common: DeviceCommon,
    is_safe: bool,
}

impl SimSafetyMonitor {
    pub fn new(name: &str) -> Self {
        let mut common =
            DeviceCommon::new(DeviceType::SafetyMonitor, name, "Simulated safety monitor");
        common.interface_version = 1;
        Self { common, is_safe: true }
    }
}

impl AlpacaDevice for SimSafetyMonitor {
    fn common(&self) -> &DeviceCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DeviceCommon {
        &mut self.common
    }

    fn process_command(&mut self, ctx: &mut CommandContext<'_>) -> AlpacaResult {
        match ctx.cmd {
            safetymonitor::IS_SAFE => {
                ctx.json.add_bool("Value", self.is_safe, INCLUDE_COMMA)?;
                Ok(())
            }
            _ => self.handle_common(ctx),
        }
    }

    /// An unattended safety monitor reports unsafe.
    fn watchdog_timeout(&mut self) {
        warn!("{}: watchdog timeout, reporting unsafe", self.common.name);
        self.is_safe = false;
    }

    fn device_state_content(&self, json: &mut EnvelopeWriter) -> EnvelopeResult<bool> {
        json.add_named_bool("IsSafe", self.is_safe, INCLUDE_COMMA)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::EnvelopeWriter;
    use crate::device::ServerInfo;

    fn ctx<'a>(
        cmd: u16,
        is_put: bool,
        content: &'a str,
        json: &'a mut EnvelopeWriter,
        info: &'a ServerInfo,
    ) -> CommandContext<'a> {
        CommandContext {
            cmd,
            command_name: "test",
            is_put,
            content_data: content,
            json,
            devices: &[],
            server_info: info,
        }
    }

    #[test]
    fn test_camera_exposure_state_machine() {
        let mut cam = SimCamera::new("cam");
        cam.common_mut().connected = true;

        let info = ServerInfo::default();
        let mut json = EnvelopeWriter::new();
        let mut c = ctx(camera::START_EXPOSURE, true, "Duration=0", &mut json, &info);
        cam.process_command(&mut c).unwrap();
        assert_eq!(cam.state, CameraState::Exposing);
        assert!(!cam.image_ready);

        // Zero-length exposure finishes on the next two polls
        cam.run_state_machine();
        assert_eq!(cam.state, CameraState::Reading);
        cam.run_state_machine();
        assert_eq!(cam.state, CameraState::Idle);
        assert!(cam.image_ready);
    }

    #[test]
    fn test_camera_rejects_exposure_when_disconnected() {
        let mut cam = SimCamera::new("cam");
        let info = ServerInfo::default();
        let mut json = EnvelopeWriter::new();
        let mut c = ctx(camera::START_EXPOSURE, true, "Duration=1", &mut json, &info);
        let err = cam.process_command(&mut c).unwrap_err();
        assert_eq!(err.status, crate::protocol::AlpacaStatus::NotConnected);
    }

    #[test]
    fn test_filterwheel_reports_minus_one_while_moving() {
        let mut fw = SimFilterWheel::new("fw");
        let info = ServerInfo::default();

        let mut json = EnvelopeWriter::new();
        let mut c = ctx(filterwheel::POSITION, true, "Position=3", &mut json, &info);
        fw.process_command(&mut c).unwrap();
        assert!(fw.moving);

        let mut json = EnvelopeWriter::new();
        let mut c = ctx(filterwheel::POSITION, false, "", &mut json, &info);
        fw.process_command(&mut c).unwrap();
        let body = json.finish(0, 0, 0, "").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["Value"], -1);
    }

    #[test]
    fn test_filterwheel_rejects_out_of_range_position() {
        let mut fw = SimFilterWheel::new("fw");
        let info = ServerInfo::default();
        let mut json = EnvelopeWriter::new();
        let mut c = ctx(filterwheel::POSITION, true, "Position=9", &mut json, &info);
        assert!(fw.process_command(&mut c).is_err());
    }

    #[test]
    fn test_dome_watchdog_closes_open_shutter() {
        let mut dome = SimDome::new("dome");
        dome.shutter = ShutterState::Open;
        dome.watchdog_timeout();
        assert_eq!(dome.shutter, ShutterState::Closing);

        // Idempotent once the shutter is no longer open
        dome.shutter = ShutterState::Closed;
        dome.watchdog_timeout();
        assert_eq!(dome.shutter, ShutterState::Closed);
    }

    #[test]
    fn test_switch_set_and_get() {
        let mut sw = SimSwitch::new("sw", 4);
        let info = ServerInfo::default();

        let mut json = EnvelopeWriter::new();
        let mut c = ctx(switch::SET_SWITCH, true, "Id=2&State=true", &mut json, &info);
        sw.process_command(&mut c).unwrap();

        let mut json = EnvelopeWriter::new();
        let mut c = ctx(switch::GET_SWITCH, false, "Id=2", &mut json, &info);
        sw.process_command(&mut c).unwrap();
        let body = json.finish(0, 0, 0, "").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["Value"], true);
    }

    #[test]
    fn test_switch_rejects_bad_id() {
        let mut sw = SimSwitch::new("sw", 2);
        let info = ServerInfo::default();
        let mut json = EnvelopeWriter::new();
        let mut c = ctx(switch::GET_SWITCH, false, "Id=7", &mut json, &info);
        assert!(sw.process_command(&mut c).is_err());
    }
}
