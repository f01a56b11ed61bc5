//! # Voltage Modbus Link - Modbus Framing with Master and Slave Roles
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.1.0
//! **License:** MIT
//!
//! Async Modbus transports (TCP, ASCII, an RTU stub and an in-process pair) with
//! master and slave transaction state machines on top of them.
//!
//! ## Features
//!
//! - **🔌 Pluggable Transports**: every framing implements [`ModbusTransport`]
//! - **🔁 Resynchronizing ASCII**: garbage between frames is skipped, bytes after a frame are kept
//! - **🧭 Typed Failures**: contract, transport, frame, protocol and exception errors are told apart
//! - **🏭 Multi-client Server**: one slave session per TCP connection over shared banks
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! Every other function code is answered with an `ILLEGAL_FUNCTION` exception.
//!
//! ## Quick Start
//!
//! ### Master Example
//!
//! ```rust,no_run
//! use voltage_modbus_link::{ModbusMaster, ModbusResult, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let transport = TcpTransport::connect("127.0.0.1:502".parse().unwrap()).await?;
//!     let mut master = ModbusMaster::new(transport);
//!
//!     let mut values = [0u16; 3];
//!     master.read_holding_registers(10, 3, &mut values).await?;
//!     println!("Read registers: {:?}", values);
//!
//!     master.write_multiple_registers(0, 2, &[42, 43]).await?;
//!     master.disconnect().await
//! }
//! ```
//!
//! ### Server Example
//!
//! ```rust,no_run
//! use voltage_modbus_link::{ModbusServer, ModbusTcpServer, ModbusTcpServerConfig, RegisterBank};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ModbusTcpServerConfig {
//!         bind_address: "127.0.0.1:502".parse()?,
//!         ..Default::default()
//!     };
//!
//!     let holding = RegisterBank::shared(100);
//!     let mut server = ModbusTcpServer::with_banks(config, RegisterBank::shared(100), holding.clone())?;
//!     server.start().await?;
//!
//!     holding.write().unwrap().set(0, 1234)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │  ModbusMaster   │    │   ModbusSlave   │──► Register / Coil Banks
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────────────────────────────┐
//! │        codec (request / response)       │
//! └─────────────────────────────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Transport     │◄──►│   Transport     │
//! │ TCP/ASCII/Local │    │ TCP/ASCII/Local │
//! └─────────────────┘    └─────────────────┘
//! ```

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// Function codes, exception codes and the message buffer
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod protocol;

/// Request and response layouts shared by both roles
pub mod codec;

/// TCP, ASCII, RTU and in-process transports
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod transport;

/// Master role
pub mod master;

/// Slave role
pub mod slave;

/// Modbus TCP server running one slave per connection
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod server;

/// Register and coil storage for slaves
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod register_bank;

/// Logging system for the library
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod logging;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use protocol::{ExceptionCode, ModbusFunction, ModbusMessage, UnitId};
pub use transport::{
    AsciiTransport, LocalTransport, ModbusTransport, RtuConfig, RtuTransport, TcpTransport, TransportStats,
};
pub use master::ModbusMaster;
pub use slave::{ModbusSlave, SlaveState, SlaveStats};
pub use server::{ModbusServer, ModbusTcpServer, ModbusTcpServerConfig, ServerStats};
pub use register_bank::{CoilBank, RegisterBank, SharedCoilBank, SharedRegisterBank};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Modbus Link v{} - Modbus TCP/ASCII framing with master and slave roles", VERSION)
}
