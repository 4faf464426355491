//! Logging backend and the device event sink
//!
//! Standard `log` facade (`info!`, `warn!`, ...) with a logger configured
//! once at startup: level, text or JSON line format, timestamps, writing
//! to stderr. The [`event`] function is the fire-and-forget audit sink
//! fed by the dispatcher and the scheduler with
//! (device, command, error code, message) tuples.

use std::io::Write;
use std::str::FromStr;
use std::sync::Once;

use serde::{Deserialize, Serialize};

static INIT: Once = Once::new();

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Declarative logging configuration, part of the server config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info, format: LogFormat::Text }
    }
}

/// Install the global logger. Safe to call more than once; only the first
/// call takes effect.
pub fn init(config: &LoggingConfig) -> crate::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        let logger = AltairLogger { format: config.format };
        result = log::set_boxed_logger(Box::new(logger))
            .map_err(|e| crate::Error::Logging(e.to_string()));
        log::set_max_level(config.level.into());
    });
    result
}

/// The audit sink: one line per device error, or per command when verbose
/// logging is enabled. Fire-and-forget.
pub fn event(device: &str, command: &str, error_code: u32, message: &str) {
    if error_code == 0 {
        log::info!(target: "event", "{} {} ok {}", device, command, message);
    } else {
        log::warn!(target: "event", "{} {} {:#x} {}", device, command, error_code, message);
    }
}

struct AltairLogger {
    format: LogFormat,
}

impl log::Log for AltairLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let line = match self.format {
            LogFormat::Text => format!(
                "{} {:5} [{}] {}\n",
                stamp,
                record.level(),
                record.target(),
                record.args()
            ),
            LogFormat::Json => format!(
                "{{\"ts\": \"{}\", \"level\": \"{}\", \"target\": \"{}\", \"message\": \"{}\"}}\n",
                stamp,
                record.level(),
                record.target(),
                format!("{}", record.args()).replace('"', "\\\"")
            ),
        };
        let _ = std::io::stderr().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init(&config).unwrap();
        init(&config).unwrap();
    }
}
