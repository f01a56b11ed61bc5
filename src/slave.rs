/// Modbus slave role
///
/// A slave answers requests addressed to its unit id from the banks attached to
/// it. Each cycle receives one request, builds either a normal or an exception
/// response and sends it back with the request's transaction id. Requests for
/// other units are dropped without a reply.
///
/// | Function | Bank |
/// |----------|------|
/// | 0x03 Read Holding Registers | output registers |
/// | 0x04 Read Input Registers | input registers |
/// | 0x10 Write Multiple Registers | output registers |
///
/// Any other function code is answered with `ILLEGAL_FUNCTION`. Coil banks can be
/// attached so that sessions share them with the application, but no coil function
/// is served.
///
/// Banks are read and written under their `RwLock`; the lock is never held across
/// an await point.

use log::{debug, warn};

use crate::codec;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{ExceptionCode, ModbusFunction, ModbusMessage, UnitId, MAX_MESSAGE_LENGTH};
use crate::register_bank::{SharedCoilBank, SharedRegisterBank};
use crate::transport::ModbusTransport;

/// Where the slave is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    /// Waiting for the next request
    Idle,
    /// Handling a received request
    Dispatching,
}

/// Counters kept by a slave session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaveStats {
    /// Requests addressed to this unit and answered
    pub requests_handled: u64,
    /// Requests addressed to other units
    pub requests_ignored: u64,
    /// Answers that were exception responses
    pub exceptions_sent: u64,
}

/// Slave side of a Modbus link
pub struct ModbusSlave<T: ModbusTransport> {
    transport: T,
    unit_id: UnitId,
    request: ModbusMessage,
    response: ModbusMessage,
    input_registers: Option<SharedRegisterBank>,
    output_registers: Option<SharedRegisterBank>,
    input_coils: Option<SharedCoilBank>,
    output_coils: Option<SharedCoilBank>,
    state: SlaveState,
    stats: SlaveStats,
    logger: Option<CallbackLogger>,
}

impl<T: ModbusTransport> ModbusSlave<T> {
    /// Create a slave answering to `unit_id` with no banks attached
    pub fn new(transport: T, unit_id: UnitId) -> Self {
        Self {
            transport,
            unit_id,
            request: ModbusMessage::new(),
            response: ModbusMessage::new(),
            input_registers: None,
            output_registers: None,
            input_coils: None,
            output_coils: None,
            state: SlaveState::Idle,
            stats: SlaveStats::default(),
            logger: None,
        }
    }

    /// Report every answered request and its response to `logger`
    pub fn set_logger(&mut self, logger: CallbackLogger) {
        self.logger = Some(logger);
    }

    /// Serve 0x04 from `bank`
    pub fn attach_input_registers(&mut self, bank: SharedRegisterBank) {
        debug!("Slave {}: input registers enabled", self.unit_id);
        self.input_registers = Some(bank);
    }

    /// Serve 0x03 and 0x10 from `bank`
    pub fn attach_output_registers(&mut self, bank: SharedRegisterBank) {
        debug!("Slave {}: output registers enabled", self.unit_id);
        self.output_registers = Some(bank);
    }

    /// Attach the discrete input bank; no function code reads it yet
    pub fn attach_input_coils(&mut self, bank: SharedCoilBank) {
        debug!("Slave {}: input coils enabled", self.unit_id);
        self.input_coils = Some(bank);
    }

    /// Attach the coil bank; no function code reads or writes it yet
    pub fn attach_output_coils(&mut self, bank: SharedCoilBank) {
        debug!("Slave {}: output coils enabled", self.unit_id);
        self.output_coils = Some(bank);
    }

    /// Unit id this slave answers to
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Current dispatch state
    pub fn state(&self) -> SlaveState {
        self.state
    }

    /// Counters for this session
    pub fn stats(&self) -> &SlaveStats {
        &self.stats
    }

    /// The attached discrete input bank, if any
    pub fn input_coils(&self) -> Option<&SharedCoilBank> {
        self.input_coils.as_ref()
    }

    /// The attached coil bank, if any
    pub fn output_coils(&self) -> Option<&SharedCoilBank> {
        self.output_coils.as_ref()
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Give back the transport, dropping the banks
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Process requests until the transport fails, returning that failure
    pub async fn serve_forever(&mut self) -> ModbusError {
        debug!("Slave {}: starting serve loop", self.unit_id);
        loop {
            if let Err(e) = self.process_one_request().await {
                debug!("Slave {}: serve loop ended: {}", self.unit_id, e);
                return e;
            }
        }
    }

    /// Receive one request and answer it
    ///
    /// Returns `Ok(true)` for every completed cycle: a normal response, an
    /// exception response, or a request for another unit that was dropped.
    /// A receive or send failure ends the cycle with `Err`; the session should
    /// be considered over.
    pub async fn process_one_request(&mut self) -> ModbusResult<bool> {
        self.state = SlaveState::Idle;
        self.request.clear();
        if let Err(e) = self.transport.receive(&mut self.request).await {
            debug!("Slave {}: receive failed: {}", self.unit_id, e);
            return Err(e);
        }

        self.state = SlaveState::Dispatching;
        let respond = self.dispatch();
        let respond = match respond {
            Ok(respond) => respond,
            Err(e) => {
                self.state = SlaveState::Idle;
                warn!("Slave {}: request dropped: {}", self.unit_id, e);
                return Err(e);
            }
        };

        if respond {
            self.response.set_transaction_id(self.request.transaction_id());
            if let Some(ref logger) = self.logger {
                logger.log_request(&self.request);
                logger.log_response(&self.response);
            }
            if let Err(e) = self.transport.send(&self.response).await {
                self.state = SlaveState::Idle;
                debug!("Slave {}: response send failed: {}", self.unit_id, e);
                return Err(e);
            }
            debug!("Slave {}: response sent", self.unit_id);
        }

        self.state = SlaveState::Idle;
        Ok(true)
    }

    /// Build the response to the current request; `false` means send nothing
    fn dispatch(&mut self) -> ModbusResult<bool> {
        let (unit_id, function_code) = match (self.request.unit_id(), self.request.function_code()) {
            (Some(unit_id), Some(function_code)) => (unit_id, function_code),
            _ => {
                debug!("Slave {}: ignoring {} byte request", self.unit_id, self.request.len());
                self.stats.requests_ignored += 1;
                return Ok(false);
            }
        };

        if unit_id != self.unit_id {
            debug!("Slave {}: request not addressed to us, address: {}", self.unit_id, unit_id);
            self.stats.requests_ignored += 1;
            return Ok(false);
        }

        let outcome = match ModbusFunction::from_u8(function_code) {
            Ok(function @ ModbusFunction::ReadHoldingRegisters) => {
                debug!("Slave {}: process {}", self.unit_id, function);
                read_registers(&self.request, &mut self.response, self.unit_id, function, self.output_registers.as_ref())?
            }
            Ok(function @ ModbusFunction::ReadInputRegisters) => {
                debug!("Slave {}: process {}", self.unit_id, function);
                read_registers(&self.request, &mut self.response, self.unit_id, function, self.input_registers.as_ref())?
            }
            Ok(function @ ModbusFunction::WriteMultipleRegisters) => {
                debug!("Slave {}: process {}", self.unit_id, function);
                write_registers(&self.request, &mut self.response, self.unit_id, self.output_registers.as_ref())?
            }
            _ => {
                debug!("Slave {}: unsupported function 0x{:02X}", self.unit_id, function_code);
                Some(ExceptionCode::IllegalFunction)
            }
        };

        if let Some(code) = outcome {
            debug!("Slave {}: exception {}", self.unit_id, code);
            codec::encode_exception(&mut self.response, self.unit_id, function_code, code)?;
            self.stats.exceptions_sent += 1;
        }
        self.stats.requests_handled += 1;
        Ok(true)
    }
}

fn poisoned<E>(_: E) -> ModbusError {
    ModbusError::internal("Register bank lock poisoned")
}

/// Answer a register read; `Some` is the exception to send instead
fn read_registers(
    request: &ModbusMessage,
    response: &mut ModbusMessage,
    unit_id: UnitId,
    function: ModbusFunction,
    bank: Option<&SharedRegisterBank>,
) -> ModbusResult<Option<ExceptionCode>> {
    let bank = match bank {
        Some(bank) => bank,
        None => return Ok(Some(ExceptionCode::IllegalDataAddress)),
    };
    if request.len() != codec::READ_REQUEST_LENGTH {
        return Ok(Some(ExceptionCode::IllegalDataValue));
    }
    let (reference, count) = match codec::decode_reference_count(request) {
        Some(fields) => fields,
        None => return Ok(Some(ExceptionCode::IllegalDataValue)),
    };
    debug!("Reference: {}, count: {}", reference, count);

    let bank = bank.read().map_err(poisoned)?;
    if reference + count > bank.size() {
        return Ok(Some(ExceptionCode::IllegalDataAddress));
    }
    if codec::READ_RESPONSE_HEADER_LENGTH + 2 * count > MAX_MESSAGE_LENGTH {
        return Ok(Some(ExceptionCode::IllegalResponseLength));
    }

    let values = bank.get_range(reference, count)?;
    drop(bank);
    codec::encode_read_response(response, unit_id, function, &values)?;
    Ok(None)
}

/// Apply a write multiple registers request; `Some` is the exception to send instead
fn write_registers(
    request: &ModbusMessage,
    response: &mut ModbusMessage,
    unit_id: UnitId,
    bank: Option<&SharedRegisterBank>,
) -> ModbusResult<Option<ExceptionCode>> {
    let bank = match bank {
        Some(bank) => bank,
        None => return Ok(Some(ExceptionCode::IllegalDataAddress)),
    };
    if request.len() < codec::WRITE_REQUEST_HEADER_LENGTH {
        return Ok(Some(ExceptionCode::IllegalDataValue));
    }
    let (reference, count) = match codec::decode_reference_count(request) {
        Some(fields) => fields,
        None => return Ok(Some(ExceptionCode::IllegalDataValue)),
    };
    debug!("Reference: {}, count: {}", reference, count);

    let mut bank = bank.write().map_err(poisoned)?;
    if reference + count > bank.size() {
        return Ok(Some(ExceptionCode::IllegalDataAddress));
    }
    if request.len() != codec::WRITE_REQUEST_HEADER_LENGTH + 2 * count {
        return Ok(Some(ExceptionCode::IllegalDataValue));
    }
    let body = request.as_bytes();
    if body[6] as usize != 2 * count {
        return Ok(Some(ExceptionCode::IllegalDataValue));
    }

    let values: Vec<u16> = body[codec::WRITE_REQUEST_HEADER_LENGTH..]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    bank.set_range(reference, &values)?;
    drop(bank);

    codec::encode_write_response(response, unit_id, reference as u16, count as u16)?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_bank::{CoilBank, RegisterBank};
    use crate::transport::LocalTransport;

    fn slave_with_banks(unit_id: UnitId) -> (ModbusSlave<LocalTransport>, LocalTransport, SharedRegisterBank, SharedRegisterBank) {
        let (local, peer) = LocalTransport::pair();
        let mut slave = ModbusSlave::new(local, unit_id);
        let inputs = RegisterBank::shared(100);
        let outputs = RegisterBank::shared(10);
        slave.attach_input_registers(inputs.clone());
        slave.attach_output_registers(outputs.clone());
        (slave, peer, inputs, outputs)
    }

    /// Send `body` to the slave, run one cycle and return the response
    async fn exchange(slave: &mut ModbusSlave<LocalTransport>, peer: &mut LocalTransport, txid: u16, body: &[u8]) -> ModbusMessage {
        peer.send(&ModbusMessage::from_bytes(txid, body).unwrap()).await.unwrap();
        assert!(slave.process_one_request().await.unwrap());
        let mut response = ModbusMessage::new();
        peer.receive(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_read_input_registers() {
        let (mut slave, mut peer, inputs, _) = slave_with_banks(1);
        inputs.write().unwrap().set_range(10, &[5, 6, 7]).unwrap();

        let response = exchange(&mut slave, &mut peer, 31, &[0x01, 0x04, 0x00, 0x0A, 0x00, 0x03]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x04, 0x06, 0x00, 0x05, 0x00, 0x06, 0x00, 0x07]);
        assert_eq!(response.transaction_id(), 31);
        assert_eq!(slave.state(), SlaveState::Idle);
    }

    #[tokio::test]
    async fn test_holding_registers_come_from_output_bank() {
        let (mut slave, mut peer, inputs, outputs) = slave_with_banks(1);
        inputs.write().unwrap().set(0, 1).unwrap();
        outputs.write().unwrap().set(0, 2).unwrap();

        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x03, 0x02, 0x00, 0x02]);
    }

    #[tokio::test]
    async fn test_write_multiple_registers() {
        let (mut slave, mut peer, _, outputs) = slave_with_banks(0);

        let response = exchange(
            &mut slave,
            &mut peer,
            9,
            &[0x00, 0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x2A, 0x00, 0x2B],
        )
        .await;
        assert_eq!(response.as_bytes(), &[0x00, 0x10, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(response.transaction_id(), 9);

        let outputs = outputs.read().unwrap();
        assert_eq!(outputs.get(0).unwrap(), 42);
        assert_eq!(outputs.get(1).unwrap(), 43);
    }

    #[tokio::test]
    async fn test_out_of_bounds_read_is_illegal_data_address() {
        let (mut slave, mut peer, _, _) = slave_with_banks(1);

        // 98 + 3 > 100
        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x04, 0x00, 0x62, 0x00, 0x03]).await;
        assert_eq!(response.len(), 3);
        assert_eq!(response.as_bytes(), &[0x01, 0x84, 0x02]);
        assert_eq!(slave.stats().exceptions_sent, 1);
    }

    #[tokio::test]
    async fn test_oversized_read_is_illegal_response_length() {
        let (local, mut peer) = LocalTransport::pair();
        let mut slave = ModbusSlave::new(local, 1);
        slave.attach_input_registers(RegisterBank::shared(1000));

        // 3 + 2 * 127 = 257
        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x04, 0x00, 0x00, 0x00, 0x7F]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x84, 0x04]);

        // 3 + 2 * 126 fits
        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x04, 0x00, 0x00, 0x00, 0x7E]).await;
        assert_eq!(response.len(), 255);
    }

    #[tokio::test]
    async fn test_malformed_requests_are_illegal_data_value() {
        let (mut slave, mut peer, _, outputs) = slave_with_banks(1);

        // read request with a trailing byte
        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x83, 0x03]);

        // write body shorter than its count
        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x01]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x90, 0x03]);

        // byte count disagrees with count
        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x10, 0x00, 0x00, 0x00, 0x01, 0x04, 0x00, 0x01]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x90, 0x03]);

        // too short to carry a write header
        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x10, 0x00, 0x00]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x90, 0x03]);

        assert_eq!(outputs.read().unwrap().get(0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_bounds_checked_before_length() {
        let (mut slave, mut peer, _, _) = slave_with_banks(1);

        // 9 + 2 > 10, and the body is short as well
        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x10, 0x00, 0x09, 0x00, 0x02, 0x04]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x90, 0x02]);
    }

    #[tokio::test]
    async fn test_missing_bank_and_unknown_function() {
        let (local, mut peer) = LocalTransport::pair();
        let mut slave = ModbusSlave::new(local, 1);
        slave.attach_output_coils(CoilBank::shared(16));

        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x04, 0x00, 0x00, 0x00, 0x01]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x84, 0x02]);

        // coils are attached but not served
        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x01, 0x00, 0x00, 0x00, 0x01]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0x81, 0x01]);

        let response = exchange(&mut slave, &mut peer, 0, &[0x01, 0x2B, 0x0E]).await;
        assert_eq!(response.as_bytes(), &[0x01, 0xAB, 0x01]);
        assert!(slave.output_coils().is_some());
    }

    #[tokio::test]
    async fn test_other_units_get_no_reply() {
        let (mut slave, mut peer, _, _) = slave_with_banks(1);

        peer.send(&ModbusMessage::from_bytes(0, &[0x02, 0x04, 0x00, 0x00, 0x00, 0x01]).unwrap())
            .await
            .unwrap();
        assert!(slave.process_one_request().await.unwrap());
        assert_eq!(slave.stats().requests_ignored, 1);
        assert_eq!(slave.transport().get_stats().frames_sent, 0);

        // the next request is still served
        let response = exchange(&mut slave, &mut peer, 4, &[0x01, 0x04, 0x00, 0x00, 0x00, 0x01]).await;
        assert_eq!(response.transaction_id(), 4);
    }

    #[tokio::test]
    async fn test_serve_forever_ends_on_closed_transport() {
        let (mut slave, mut peer, _, _) = slave_with_banks(1);

        peer.send(&ModbusMessage::from_bytes(0, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]).unwrap())
            .await
            .unwrap();
        drop(peer);

        let err = slave.serve_forever().await;
        assert!(err.is_fatal());
        assert_eq!(slave.stats().requests_handled, 1);
        assert_eq!(slave.state(), SlaveState::Idle);
    }
}
