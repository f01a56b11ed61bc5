/// Logging support for Modbus roles and transports
///
/// Three layers are available:
///
/// - `log` macros for operational messages throughout the crate; [`init_logging`]
///   installs `env_logger` for binaries and honours `RUST_LOG`.
/// - [`log_packet`], a `tracing` event per frame on the wire, enabled per transport.
/// - [`CallbackLogger`], an application-supplied sink that masters and slaves report
///   every request and response to.

use std::sync::Arc;
use crate::protocol::{ModbusFunction, ModbusMessage, EXCEPTION_MODIFIER};

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

/// Logging mode for message display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show raw message bytes only
    Raw,
    /// Show decoded unit, function and fields
    Interpreted,
    /// Show both raw and interpreted data
    Both,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Matching `log` crate filter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

/// Install `env_logger` with `level` as the default filter
///
/// `RUST_LOG` overrides the default. Calling it twice is harmless.
pub fn init_logging(level: LogLevel) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level.to_level_filter())
        .parse_default_env()
        .try_init();
}

/// Hex dump used by every packet log line
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Emit a `tracing` event for one frame on the wire
pub fn log_packet(direction: &str, data: &[u8], protocol: &str, unit_id: Option<u8>) {
    let hex_string = format_hex_packet(data);
    match unit_id {
        Some(id) => tracing::info!("[MODBUS-{}] {} unit:{} {}", protocol, direction, id, hex_string),
        None => tracing::info!("[MODBUS-{}] {} {}", protocol, direction, hex_string),
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    /// Create a new callback logger with specific mode
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger with default console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => eprintln!("[{}] {}: {}", timestamp, level.as_str(), message),
                LogLevel::Info | LogLevel::Debug => println!("[{}] {}: {}", timestamp, level.as_str(), message),
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level <= self.min_level
    }

    /// Log an outgoing request
    pub fn log_request(&self, message: &ModbusMessage) {
        self.log_message("Modbus Request ->", message);
    }

    /// Log an incoming response
    pub fn log_response(&self, message: &ModbusMessage) {
        self.log_message("Modbus Response <-", message);
    }

    fn log_message(&self, prefix: &str, message: &ModbusMessage) {
        if !self.should_log(LogLevel::Info) {
            return;
        }

        let raw = format!("{} Raw: tx:{} {}", prefix, message.transaction_id(), format_hex_packet(message.as_bytes()));
        match self.mode {
            LoggingMode::Raw => self.info(&raw),
            LoggingMode::Interpreted => self.info(&format!("{} {}", prefix, interpret(message))),
            LoggingMode::Both => {
                self.info(&format!("{} {}", prefix, interpret(message)));
                self.debug(&raw);
            }
        }
    }
}

/// Human-readable summary of a message body
fn interpret(message: &ModbusMessage) -> String {
    let (unit, code) = match (message.unit_id(), message.function_code()) {
        (Some(unit), Some(code)) => (unit, code),
        _ => return format!("tx:{} Data: {}", message.transaction_id(), hex::encode(message.as_bytes())),
    };

    if code & EXCEPTION_MODIFIER != 0 {
        let exception = message.as_bytes().get(2).copied().unwrap_or(0);
        return format!(
            "tx:{} Unit: {}, Exception for function 0x{:02X}, Code: 0x{:02X}",
            message.transaction_id(),
            unit,
            code & !EXCEPTION_MODIFIER,
            exception
        );
    }

    let function = match ModbusFunction::from_u8(code) {
        Ok(function) => function.to_string(),
        Err(_) => format!("Unknown (0x{:02X})", code),
    };
    let fields = match (message.read_u16(2), message.read_u16(4)) {
        (Some(reference), Some(count)) => format!("Reference: {}, Count: {}", reference, count),
        _ => format!("Data: {}", hex::encode(&message.as_bytes()[2..])),
    };
    format!("tx:{} Unit: {}, Function: {}, {}", message.transaction_id(), unit, function, fields)
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Convenience macro for creating a custom logger
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}
