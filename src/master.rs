/// Modbus master role
///
/// A master owns one transport and one reusable request/response pair. Every call
/// is exactly one send followed by one receive; nothing is retried internally, so a
/// failed call leaves the retry policy to the caller.
///
/// The short forms address unit 0 with transaction id 0. The `*_with_unit` forms
/// take both explicitly.

use log::debug;

use crate::codec;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{ModbusFunction, ModbusMessage, UnitId};
use crate::transport::{ModbusTransport, TransportStats};

/// Master side of a Modbus link
pub struct ModbusMaster<T: ModbusTransport> {
    transport: T,
    request: ModbusMessage,
    response: ModbusMessage,
    logger: Option<CallbackLogger>,
}

impl<T: ModbusTransport> ModbusMaster<T> {
    /// Create a master over `transport`
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            request: ModbusMessage::new(),
            response: ModbusMessage::new(),
            logger: None,
        }
    }

    /// Create a master that reports every request and response to `logger`
    pub fn with_logger(transport: T, logger: CallbackLogger) -> Self {
        Self {
            logger: Some(logger),
            ..Self::new(transport)
        }
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Whether the transport still has an open channel
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Transport counters
    pub fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }

    /// Release the underlying transport
    pub async fn disconnect(&mut self) -> ModbusResult<()> {
        self.transport.disconnect().await
    }

    /// Read holding registers (0x03) from unit 0
    pub async fn read_holding_registers(
        &mut self,
        reference: u16,
        count: u16,
        results: &mut [u16],
    ) -> ModbusResult<()> {
        self.read_holding_registers_with_unit(0, reference, count, 0, results).await
    }

    /// Read holding registers (0x03)
    pub async fn read_holding_registers_with_unit(
        &mut self,
        unit_id: UnitId,
        reference: u16,
        count: u16,
        transaction_id: u16,
        results: &mut [u16],
    ) -> ModbusResult<()> {
        self.read_registers(
            ModbusFunction::ReadHoldingRegisters,
            unit_id,
            reference,
            count,
            transaction_id,
            results,
        )
        .await
    }

    /// Read input registers (0x04) from unit 0
    pub async fn read_input_registers(
        &mut self,
        reference: u16,
        count: u16,
        results: &mut [u16],
    ) -> ModbusResult<()> {
        self.read_input_registers_with_unit(0, reference, count, 0, results).await
    }

    /// Read input registers (0x04)
    pub async fn read_input_registers_with_unit(
        &mut self,
        unit_id: UnitId,
        reference: u16,
        count: u16,
        transaction_id: u16,
        results: &mut [u16],
    ) -> ModbusResult<()> {
        self.read_registers(
            ModbusFunction::ReadInputRegisters,
            unit_id,
            reference,
            count,
            transaction_id,
            results,
        )
        .await
    }

    /// Write multiple registers (0x10) to unit 0
    pub async fn write_multiple_registers(
        &mut self,
        reference: u16,
        count: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        self.write_multiple_registers_with_unit(0, reference, count, 0, values).await
    }

    /// Write the first `count` entries of `values` starting at `reference` (0x10)
    pub async fn write_multiple_registers_with_unit(
        &mut self,
        unit_id: UnitId,
        reference: u16,
        count: u16,
        transaction_id: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        codec::check_count(count, values.len(), "Values buffer")?;
        codec::encode_write_multiple_request(
            &mut self.request,
            unit_id,
            reference,
            &values[..count as usize],
            transaction_id,
        )?;

        self.transact().await?;

        codec::validate_write_response(&self.response, unit_id, transaction_id, reference, count)
            .map_err(|e| self.rejected(ModbusFunction::WriteMultipleRegisters, e))
    }

    async fn read_registers(
        &mut self,
        function: ModbusFunction,
        unit_id: UnitId,
        reference: u16,
        count: u16,
        transaction_id: u16,
        results: &mut [u16],
    ) -> ModbusResult<()> {
        codec::check_count(count, results.len(), "Results buffer")?;
        codec::encode_read_request(&mut self.request, function, unit_id, reference, count, transaction_id)?;

        self.transact().await?;

        codec::validate_read_response(
            &self.response,
            function,
            unit_id,
            transaction_id,
            count,
            &mut results[..count as usize],
        )
        .map_err(|e| self.rejected(function, e))
    }

    /// One send/receive cycle on the reusable message pair
    async fn transact(&mut self) -> ModbusResult<()> {
        if let Some(ref logger) = self.logger {
            logger.log_request(&self.request);
        }

        if let Err(e) = self.transport.send(&self.request).await {
            debug!("Request send failed: {}", e);
            return Err(e);
        }

        self.response.clear();
        if let Err(e) = self.transport.receive(&mut self.response).await {
            debug!("Response receive failed: {}", e);
            return Err(e);
        }

        if let Some(ref logger) = self.logger {
            logger.log_response(&self.response);
        }
        Ok(())
    }

    fn rejected(&self, function: ModbusFunction, error: ModbusError) -> ModbusError {
        debug!("{} response rejected: {}", function, error);
        error
    }
}
