/// Request/response codec shared by the master and slave roles
///
/// Every supported function has a fixed-offset body layout:
///
/// ```text
/// read request      unit | fc | ref hi | ref lo | cnt hi | cnt lo
/// read response     unit | fc | byte count | (value hi | value lo) * cnt
/// write request     unit | 0x10 | ref hi | ref lo | cnt hi | cnt lo | byte count | values
/// write response    unit | 0x10 | ref hi | ref lo | cnt hi | cnt lo
/// exception         unit | fc + 0x80 | code
/// ```
///
/// Values are big-endian 16-bit unsigned integers.

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{
    ExceptionCode, ModbusFunction, ModbusMessage, UnitId, EXCEPTION_MODIFIER, MAX_MESSAGE_LENGTH,
};

/// Body length of a register read request
pub const READ_REQUEST_LENGTH: usize = 6;

/// Header length of a register read response (unit, fc, byte count)
pub const READ_RESPONSE_HEADER_LENGTH: usize = 3;

/// Header length of a write multiple registers request
pub const WRITE_REQUEST_HEADER_LENGTH: usize = 7;

/// Body length of a write multiple registers response
pub const WRITE_RESPONSE_LENGTH: usize = 6;

/// Body length of an exception response
pub const EXCEPTION_RESPONSE_LENGTH: usize = 3;

/// Largest register count a single write request can carry
pub const MAX_WRITE_COUNT: usize = (MAX_MESSAGE_LENGTH - WRITE_REQUEST_HEADER_LENGTH) / 2;

/// Reject a zero count or a caller buffer holding fewer than `count` registers
pub fn check_count(count: u16, available: usize, buffer: &str) -> ModbusResult<()> {
    if count == 0 {
        return Err(ModbusError::invalid_argument("Register count must be at least 1"));
    }
    if available < count as usize {
        return Err(ModbusError::invalid_argument(format!(
            "{} holds {} registers, {} requested",
            buffer, available, count
        )));
    }
    Ok(())
}

/// Encode a read holding/input registers request into `request`
pub fn encode_read_request(
    request: &mut ModbusMessage,
    function: ModbusFunction,
    unit_id: UnitId,
    reference: u16,
    count: u16,
    transaction_id: u16,
) -> ModbusResult<()> {
    if !function.is_register_read() {
        return Err(ModbusError::invalid_argument(format!("{} is not a register read", function)));
    }
    if count == 0 {
        return Err(ModbusError::invalid_argument("Register count must be at least 1"));
    }

    let buf = request.buffer_mut();
    buf[0] = unit_id;
    buf[1] = function.to_u8();
    buf[2..4].copy_from_slice(&reference.to_be_bytes());
    buf[4..6].copy_from_slice(&count.to_be_bytes());
    request.set_length(READ_REQUEST_LENGTH)?;
    request.set_transaction_id(transaction_id);
    Ok(())
}

/// Encode a write multiple registers request carrying `values` into `request`
pub fn encode_write_multiple_request(
    request: &mut ModbusMessage,
    unit_id: UnitId,
    reference: u16,
    values: &[u16],
    transaction_id: u16,
) -> ModbusResult<()> {
    if values.is_empty() {
        return Err(ModbusError::invalid_argument("Register count must be at least 1"));
    }
    if values.len() > MAX_WRITE_COUNT {
        return Err(ModbusError::invalid_argument(format!(
            "Writing {} registers exceeds the {} that fit in one message",
            values.len(),
            MAX_WRITE_COUNT
        )));
    }

    let count = values.len() as u16;
    let buf = request.buffer_mut();
    buf[0] = unit_id;
    buf[1] = ModbusFunction::WriteMultipleRegisters.to_u8();
    buf[2..4].copy_from_slice(&reference.to_be_bytes());
    buf[4..6].copy_from_slice(&count.to_be_bytes());
    buf[6] = (2 * values.len()) as u8;
    for (i, value) in values.iter().enumerate() {
        let at = WRITE_REQUEST_HEADER_LENGTH + 2 * i;
        buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }
    request.set_length(WRITE_REQUEST_HEADER_LENGTH + 2 * values.len())?;
    request.set_transaction_id(transaction_id);
    Ok(())
}

/// Checks every response must pass before its function-specific body is looked at
fn check_response_header(
    response: &ModbusMessage,
    function: ModbusFunction,
    unit_id: UnitId,
    transaction_id: u16,
) -> ModbusResult<()> {
    let body = response.as_bytes();

    if body.len() < 3 {
        return Err(ModbusError::unexpected_response(format!(
            "Response length {} is shorter than 3",
            body.len()
        )));
    }
    if response.transaction_id() != transaction_id {
        return Err(ModbusError::unexpected_response(format!(
            "Transaction id {} does not match request {}",
            response.transaction_id(),
            transaction_id
        )));
    }
    if body[0] != unit_id {
        return Err(ModbusError::unexpected_response(format!(
            "Unit id {} does not match request {}",
            body[0], unit_id
        )));
    }
    if body[1] == function.exception_code() {
        return Err(ModbusError::exception(function.to_u8(), body[2]));
    }
    if body[1] != function.to_u8() {
        return Err(ModbusError::unexpected_response(format!(
            "Function code 0x{:02X} does not match request 0x{:02X}",
            body[1],
            function.to_u8()
        )));
    }
    Ok(())
}

/// Validate a register read response and decode `count` values into `results`
///
/// `results` is left untouched unless every check passes.
pub fn validate_read_response(
    response: &ModbusMessage,
    function: ModbusFunction,
    unit_id: UnitId,
    transaction_id: u16,
    count: u16,
    results: &mut [u16],
) -> ModbusResult<()> {
    check_response_header(response, function, unit_id, transaction_id)?;

    let body = response.as_bytes();
    let byte_count = body[2] as usize;
    if body.len() != READ_RESPONSE_HEADER_LENGTH + byte_count {
        return Err(ModbusError::unexpected_response(format!(
            "Response length {} does not match byte count {}",
            body.len(),
            byte_count
        )));
    }
    if body.len() != READ_RESPONSE_HEADER_LENGTH + 2 * count as usize {
        return Err(ModbusError::unexpected_response(format!(
            "Response carries {} bytes, {} registers requested",
            byte_count, count
        )));
    }

    let data = &body[READ_RESPONSE_HEADER_LENGTH..];
    for (slot, pair) in results.iter_mut().zip(data.chunks_exact(2)) {
        *slot = u16::from_be_bytes([pair[0], pair[1]]);
    }
    Ok(())
}

/// Validate a write multiple registers response against what was sent
pub fn validate_write_response(
    response: &ModbusMessage,
    unit_id: UnitId,
    transaction_id: u16,
    reference: u16,
    count: u16,
) -> ModbusResult<()> {
    check_response_header(response, ModbusFunction::WriteMultipleRegisters, unit_id, transaction_id)?;

    if response.len() != WRITE_RESPONSE_LENGTH {
        return Err(ModbusError::unexpected_response(format!(
            "Write response length {} is not {}",
            response.len(),
            WRITE_RESPONSE_LENGTH
        )));
    }
    if response.read_u16(2) != Some(reference) {
        return Err(ModbusError::unexpected_response("Echoed reference does not match request"));
    }
    if response.read_u16(4) != Some(count) {
        return Err(ModbusError::unexpected_response("Echoed count does not match request"));
    }
    Ok(())
}

/// Reference and count fields of a request (bytes 2..6)
pub fn decode_reference_count(request: &ModbusMessage) -> Option<(usize, usize)> {
    let reference = request.read_u16(2)?;
    let count = request.read_u16(4)?;
    Some((reference as usize, count as usize))
}

/// Encode an exception response to a request carrying `function_code`
pub fn encode_exception(
    response: &mut ModbusMessage,
    unit_id: UnitId,
    function_code: u8,
    code: ExceptionCode,
) -> ModbusResult<()> {
    let buf = response.buffer_mut();
    buf[0] = unit_id;
    buf[1] = function_code.wrapping_add(EXCEPTION_MODIFIER);
    buf[2] = code.to_u8();
    response.set_length(EXCEPTION_RESPONSE_LENGTH)
}

/// Encode a register read response carrying `values`
pub fn encode_read_response(
    response: &mut ModbusMessage,
    unit_id: UnitId,
    function: ModbusFunction,
    values: &[u16],
) -> ModbusResult<()> {
    let length = READ_RESPONSE_HEADER_LENGTH + 2 * values.len();
    if length > MAX_MESSAGE_LENGTH {
        return Err(ModbusError::invalid_argument(format!(
            "Read response of {} bytes exceeds {}",
            length, MAX_MESSAGE_LENGTH
        )));
    }

    let buf = response.buffer_mut();
    buf[0] = unit_id;
    buf[1] = function.to_u8();
    buf[2] = (2 * values.len()) as u8;
    for (i, value) in values.iter().enumerate() {
        let at = READ_RESPONSE_HEADER_LENGTH + 2 * i;
        buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }
    response.set_length(length)
}

/// Encode a write multiple registers response echoing `reference` and `count`
pub fn encode_write_response(
    response: &mut ModbusMessage,
    unit_id: UnitId,
    reference: u16,
    count: u16,
) -> ModbusResult<()> {
    let buf = response.buffer_mut();
    buf[0] = unit_id;
    buf[1] = ModbusFunction::WriteMultipleRegisters.to_u8();
    buf[2..4].copy_from_slice(&reference.to_be_bytes());
    buf[4..6].copy_from_slice(&count.to_be_bytes());
    response.set_length(WRITE_RESPONSE_LENGTH)
}
