/// Modbus protocol definitions and the message buffer
///
/// This module contains the function code registry, the exception codes and
/// [`ModbusMessage`], the fixed-capacity buffer every transport fills and drains.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ModbusError, ModbusResult};

/// Maximum length of a Modbus message body (unit id + function code + data)
pub const MAX_MESSAGE_LENGTH: usize = 256;

/// Added to the request function code in an exception response
pub const EXCEPTION_MODIFIER: u8 = 0x80;

/// Coil value for "on" in a write coil request
pub const COIL_ON: u8 = 0xFF;

/// Coil value for "off"
pub const COIL_OFF: u8 = 0x00;

/// Highest register or coil reference
pub const ADDRESS_MAX: usize = 65535;

/// Modbus unit (slave) identifier
pub type UnitId = u8;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Input Discretes (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Read Exception Status (0x07)
    ReadExceptionStatus = 0x07,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x07 => Ok(ModbusFunction::ReadExceptionStatus),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::protocol(format!("Unknown function code 0x{:02X}", value))),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Function code carried by an exception response to this function
    pub fn exception_code(self) -> u8 {
        self.to_u8().wrapping_add(EXCEPTION_MODIFIER)
    }

    /// Check if this is a register read handled by the master and slave
    pub fn is_register_read(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Input Discretes",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::ReadExceptionStatus => "Read Exception Status",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes produced by the slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    IllegalResponseLength = 0x04,
}

impl ExceptionCode {
    /// Convert from u8 to ExceptionCode
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::IllegalResponseLength),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "The function code is not supported by the slave",
            ExceptionCode::IllegalDataAddress => "The reference and count fall outside the addressed bank",
            ExceptionCode::IllegalDataValue => "The request body is malformed for its function code",
            ExceptionCode::IllegalResponseLength => "The response would exceed the maximum message length",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), *self as u8)
    }
}

/// Transfer buffer for one Modbus message body
///
/// Holds the unit id, function code and data of a message together with the
/// transaction id that travels alongside it. Transports fill it on receive and
/// read it on send; only the first `len()` bytes are meaningful.
///
/// A role object owns one request and one response message and reuses them for
/// every transaction.
#[derive(Clone)]
pub struct ModbusMessage {
    payload: [u8; MAX_MESSAGE_LENGTH],
    length: usize,
    transaction_id: u16,
}

impl ModbusMessage {
    /// Create an empty message
    pub fn new() -> Self {
        Self {
            payload: [0u8; MAX_MESSAGE_LENGTH],
            length: 0,
            transaction_id: 0,
        }
    }

    /// Create a message holding a copy of `bytes`
    pub fn from_bytes(transaction_id: u16, bytes: &[u8]) -> ModbusResult<Self> {
        let mut message = Self::new();
        message.set_bytes(bytes)?;
        message.transaction_id = transaction_id;
        Ok(message)
    }

    /// Valid portion of the payload
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload[..self.length]
    }

    /// Whole payload buffer, for writers that set the length afterwards
    pub fn buffer_mut(&mut self) -> &mut [u8; MAX_MESSAGE_LENGTH] {
        &mut self.payload
    }

    /// Replace the valid contents with a copy of `bytes`
    pub fn set_bytes(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        self.set_length(bytes.len())?;
        self.payload[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Set the number of valid bytes
    pub fn set_length(&mut self, length: usize) -> ModbusResult<()> {
        if length > MAX_MESSAGE_LENGTH {
            return Err(ModbusError::invalid_argument(format!(
                "Message length {} exceeds capacity {}",
                length, MAX_MESSAGE_LENGTH
            )));
        }
        self.length = length;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Mark the message empty; the transaction id is kept
    pub fn clear(&mut self) {
        self.length = 0;
    }

    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    pub fn set_transaction_id(&mut self, transaction_id: u16) {
        self.transaction_id = transaction_id;
    }

    /// Unit id byte, if present
    pub fn unit_id(&self) -> Option<UnitId> {
        self.as_bytes().first().copied()
    }

    /// Function code byte, if present
    pub fn function_code(&self) -> Option<u8> {
        self.as_bytes().get(1).copied()
    }

    /// Big-endian 16-bit field at `offset` of the valid contents
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.as_bytes();
        match (bytes.get(offset), bytes.get(offset + 1)) {
            (Some(&hi), Some(&lo)) => Some(u16::from_be_bytes([hi, lo])),
            _ => None,
        }
    }
}

impl Default for ModbusMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModbusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusMessage")
            .field("transaction_id", &self.transaction_id)
            .field("length", &self.length)
            .field("payload", &hex::encode_upper(self.as_bytes()))
            .finish()
    }
}

impl PartialEq for ModbusMessage {
    fn eq(&self, other: &Self) -> bool {
        self.transaction_id == other.transaction_id && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ModbusMessage {}
