//! # Modbus Transport Layer
//!
//! A transport moves one [`ModbusMessage`] at a time over one channel. Every
//! variant implements [`ModbusTransport`], so masters and slaves never see the
//! framing in use.
//!
//! ## Supported Transports
//!
//! ### Modbus TCP (`TcpTransport`)
//! - 6-byte header: transaction id, protocol id (always 0), body length
//! - Transaction id is echoed from the message, never generated here
//! - Any header violation closes the connection
//!
//! ### Modbus ASCII (`AsciiTransport`)
//! - `:` start marker, hex-encoded body, hex-encoded LRC, CR LF end marker
//! - Resynchronizes on arbitrary byte streams and keeps unread bytes for the next frame
//! - A damaged frame is dropped without closing the transport
//!
//! ### Modbus RTU (`RtuTransport`)
//! - Frame break timing derived from the serial settings
//! - Byte-level framing is not implemented; `send`/`receive` always fail
//!
//! ### In-process (`LocalTransport`)
//! - A pair of queues connecting a master and a slave inside one process
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use voltage_modbus_link::transport::{ModbusTransport, TcpTransport};
//! use voltage_modbus_link::protocol::ModbusMessage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = TcpTransport::connect("127.0.0.1:502".parse()?).await?;
//!
//!     let request = ModbusMessage::from_bytes(1, &[0x00, 0x03, 0x00, 0x00, 0x00, 0x02])?;
//!     transport.send(&request).await?;
//!
//!     let mut response = ModbusMessage::new();
//!     transport.receive(&mut response).await?;
//!     println!("Response: {:?}", response);
//!
//!     transport.disconnect().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{ModbusError, ModbusResult};
use crate::logging::log_packet;
use crate::protocol::{ModbusMessage, MAX_MESSAGE_LENGTH};

/// Modbus TCP header size
pub const MBAP_HEADER_SIZE: usize = 6;

/// Protocol identifier carried by every Modbus TCP header
pub const PROTOCOL_IDENTIFIER: u16 = 0x0000;

/// Largest body a TCP header can describe (only the low length byte is used)
pub const MAX_TCP_BODY_LENGTH: usize = 255;

/// ASCII start of frame marker
pub const START_FRAME_MARKER: u8 = b':';

/// ASCII end of frame marker
pub const END_FRAME_MARKER: [u8; 2] = [b'\r', b'\n'];

/// Longest ASCII frame: marker, two characters per body byte and LRC, CR LF
pub const MAX_ASCII_MESSAGE_LENGTH: usize = 2 * MAX_MESSAGE_LENGTH + 5;

/// Shortest ASCII frame that can hold one body byte
pub const MIN_ASCII_MESSAGE_LENGTH: usize = 7;

/// Silence between RTU frames, in character times
pub const FRAME_SEPARATOR_LENGTH: f64 = 3.5;

/// Largest RTU frame
pub const MAX_RTU_MESSAGE_LENGTH: usize = MAX_MESSAGE_LENGTH + 1;

/// Capacity of each `LocalTransport` queue
pub const LOCAL_QUEUE_CAPACITY: usize = 1000;

/// Byte stream a framed transport can run over
///
/// Implemented for every tokio stream, including `TcpStream`, `DuplexStream`
/// and the `tokio_test` mocks.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Transport layer abstraction for Modbus communication
///
/// `send` and `receive` each move exactly one message. `receive` only returns
/// `Ok` once a complete frame has been decoded into the message; on error the
/// message contents are unspecified.
///
/// ## Error Handling
///
/// Fatal errors (see [`ModbusError::is_fatal`]) mean the channel is gone. Frame
/// errors mean one frame was dropped and the transport can be used again.
#[async_trait]
pub trait ModbusTransport: Send {
    /// Frame and write one message
    async fn send(&mut self, message: &ModbusMessage) -> ModbusResult<()>;

    /// Wait for one complete frame and decode it into `message`
    async fn receive(&mut self, message: &mut ModbusMessage) -> ModbusResult<()>;

    /// Release the channel; later calls are no-ops
    async fn disconnect(&mut self) -> ModbusResult<()>;

    /// Check if the transport still owns its channel
    fn is_connected(&self) -> bool;

    /// Get communication statistics
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    fn record_error(&mut self, error: &ModbusError) {
        self.errors += 1;
        if matches!(error, ModbusError::Timeout { .. }) {
            self.timeouts += 1;
        }
    }
}

/// Run an I/O future, bounded by `limit` when one is configured
async fn with_deadline<F, T>(limit: Option<Duration>, operation: &str, fut: F) -> ModbusResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => match timeout(limit, fut).await {
            Ok(result) => result.map_err(ModbusError::from),
            Err(_) => Err(ModbusError::timeout(operation, limit.as_millis() as u64)),
        },
        None => fut.await.map_err(ModbusError::from),
    }
}

/// Modbus TCP transport implementation
///
/// Generic over the stream so the same framing runs over a socket or an
/// in-memory stream.
pub struct TcpTransport<S = TcpStream> {
    stream: Option<S>,
    peer: Option<SocketAddr>,
    timeout: Option<Duration>,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl TcpTransport<TcpStream> {
    /// Connect to a Modbus TCP device
    pub async fn connect(address: SocketAddr) -> ModbusResult<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| ModbusError::connection(format!("Failed to connect to {}: {}", address, e)))?;
        Ok(Self::from_tcp_stream(stream))
    }

    /// Connect with a deadline that also bounds every later read and write
    pub async fn connect_with_timeout(address: SocketAddr, limit: Duration) -> ModbusResult<Self> {
        let stream = match timeout(limit, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ModbusError::connection(format!("Failed to connect to {}: {}", address, e)))
            }
            Err(_) => return Err(ModbusError::timeout(format!("connect to {}", address), limit.as_millis() as u64)),
        };
        Ok(Self::from_tcp_stream(stream).with_timeout(limit))
    }

    /// Wrap a socket accepted by a listener
    pub fn from_tcp_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TcpTransport: set_nodelay failed: {}", e);
        }
        let mut transport = Self::from_stream(stream);
        transport.peer = peer;
        transport
    }
}

impl<S: AsyncStream> TcpTransport<S> {
    /// Wrap an already connected stream
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: Some(stream),
            peer: None,
            timeout: None,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Bound every read and write by `limit`
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Address of the remote end, when the stream is a socket
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    async fn close_channel(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn write_frame(&mut self, message: &ModbusMessage) -> ModbusResult<()> {
        let body = message.as_bytes();
        if body.len() > MAX_TCP_BODY_LENGTH {
            return Err(ModbusError::invalid_argument(format!(
                "TCP body of {} bytes exceeds {}",
                body.len(),
                MAX_TCP_BODY_LENGTH
            )));
        }

        let mut frame = Vec::with_capacity(MBAP_HEADER_SIZE + body.len());
        frame.extend_from_slice(&message.transaction_id().to_be_bytes());
        frame.extend_from_slice(&PROTOCOL_IDENTIFIER.to_be_bytes());
        frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
        frame.extend_from_slice(body);

        if self.packet_logging {
            log_packet("send", &frame, "TCP", message.unit_id());
        }

        let limit = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP transport is disconnected"))?;
        with_deadline(limit, "send frame", stream.write_all(&frame)).await?;
        with_deadline(limit, "flush frame", stream.flush()).await?;

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        Ok(())
    }

    async fn read_frame(&mut self, message: &mut ModbusMessage) -> ModbusResult<()> {
        let limit = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP transport is disconnected"))?;

        let mut header = [0u8; MBAP_HEADER_SIZE];
        with_deadline(limit, "read header", stream.read_exact(&mut header)).await?;

        let transaction_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let rejection = if protocol_id != PROTOCOL_IDENTIFIER {
            Some(format!("protocol id 0x{:04X}", protocol_id))
        } else if header[4] != 0 {
            Some(format!("length high byte 0x{:02X}", header[4]))
        } else if header[5] < 2 {
            Some(format!("body length {}", header[5]))
        } else {
            None
        };
        if let Some(reason) = rejection {
            warn!("TcpTransport: rejecting header {}: {}", hex::encode_upper(header), reason);
            self.close_channel().await;
            return Err(ModbusError::invalid_header(reason));
        }

        let length = header[5] as usize;
        message.set_length(length)?;
        let body = &mut message.buffer_mut()[..length];
        with_deadline(limit, "read body", stream.read_exact(body)).await?;
        message.set_transaction_id(transaction_id);

        self.stats.frames_received += 1;
        self.stats.bytes_received += (MBAP_HEADER_SIZE + length) as u64;
        if self.packet_logging {
            let mut frame = header.to_vec();
            frame.extend_from_slice(message.as_bytes());
            log_packet("receive", &frame, "TCP", message.unit_id());
        }
        Ok(())
    }

    async fn note_failure(&mut self, error: &ModbusError) {
        self.stats.record_error(error);
        if error.is_fatal() {
            self.close_channel().await;
        }
    }
}

#[async_trait]
impl<S: AsyncStream> ModbusTransport for TcpTransport<S> {
    async fn send(&mut self, message: &ModbusMessage) -> ModbusResult<()> {
        let result = self.write_frame(message).await;
        if let Err(ref e) = result {
            self.note_failure(e).await;
        }
        result
    }

    async fn receive(&mut self, message: &mut ModbusMessage) -> ModbusResult<()> {
        let result = self.read_frame(message).await;
        if let Err(ref e) = result {
            self.note_failure(e).await;
        }
        result
    }

    async fn disconnect(&mut self) -> ModbusResult<()> {
        self.close_channel().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Calculate the ASCII frame checksum
///
/// `((0xFF - sum mod 256) mod 256) + 1`, truncated to a byte. This equals the
/// two's complement of the byte sum.
pub fn lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (0xFFu8 - sum).wrapping_add(1)
}

/// Encode a message body as an ASCII frame
///
/// ```text
/// :  01 03 00 6B 00 03  8E  \r\n
/// ```
pub fn encode_ascii_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 * body.len() + 5);
    frame.push(START_FRAME_MARKER);
    frame.extend_from_slice(hex::encode_upper(body).as_bytes());
    frame.extend_from_slice(hex::encode_upper([lrc(body)]).as_bytes());
    frame.extend_from_slice(&END_FRAME_MARKER);
    frame
}

fn decode_nibble(c: u8) -> ModbusResult<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(ModbusError::frame(format!("Invalid ASCII hex character 0x{:02X}", c))),
    }
}

/// Decode one complete ASCII frame (start marker through CR LF) into `message`
///
/// Only upper case hex digits are accepted, so that a flipped case bit cannot
/// slip past the LRC. The transaction id of `message` is left alone.
pub fn decode_ascii_frame(frame: &[u8], message: &mut ModbusMessage) -> ModbusResult<()> {
    let length = frame.len();
    // ':' + pairs of hex digits + CR LF is always odd
    if length < MIN_ASCII_MESSAGE_LENGTH || length % 2 == 0 {
        return Err(ModbusError::frame(format!("Invalid ASCII frame length {}", length)));
    }
    if length > MAX_ASCII_MESSAGE_LENGTH {
        return Err(ModbusError::frame(format!("ASCII frame of {} bytes is too long", length)));
    }
    if frame[0] != START_FRAME_MARKER {
        return Err(ModbusError::frame("Invalid ASCII frame start character"));
    }
    if frame[length - 2..] != END_FRAME_MARKER {
        return Err(ModbusError::frame("Invalid ASCII frame end characters"));
    }

    let count = (length - 3) / 2;
    let mut decoded = [0u8; MAX_MESSAGE_LENGTH + 1];
    for (byte, pair) in decoded.iter_mut().zip(frame[1..length - 2].chunks_exact(2)) {
        *byte = (decode_nibble(pair[0])? << 4) | decode_nibble(pair[1])?;
    }

    let (body, received) = decoded[..count].split_at(count - 1);
    let expected = lrc(body);
    if received[0] != expected {
        return Err(ModbusError::lrc_mismatch(expected, received[0]));
    }
    message.set_bytes(body)
}

/// Modbus ASCII transport implementation
///
/// ASCII frames are delimited rather than length-prefixed, so the transport
/// scans the byte stream for the start marker and then for CR LF, each within
/// [`MAX_ASCII_MESSAGE_LENGTH`] bytes. Bytes read past the end of a frame stay
/// buffered for the next `receive`.
///
/// The wire carries no transaction id. A received message is stamped with the
/// id of the last message this transport sent, which is what a master expects
/// on a strict request/response line.
pub struct AsciiTransport<S> {
    stream: Option<S>,
    pending: BytesMut,
    timeout: Option<Duration>,
    last_transaction_id: u16,
    stats: TransportStats,
    packet_logging: bool,
}

impl<S: AsyncStream> AsciiTransport<S> {
    /// Create an ASCII transport over an open byte stream
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            pending: BytesMut::with_capacity(MAX_ASCII_MESSAGE_LENGTH),
            timeout: None,
            last_transaction_id: 0,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Bound every read and write by `limit`
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Bytes read from the stream but not yet consumed by a frame
    pub fn buffered(&self) -> &[u8] {
        &self.pending
    }

    /// Read at least one more byte into the pending buffer
    async fn fill_pending(&mut self) -> ModbusResult<()> {
        let limit = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("ASCII transport is disconnected"))?;
        self.pending.reserve(MAX_ASCII_MESSAGE_LENGTH);
        let read = with_deadline(limit, "read frame", stream.read_buf(&mut self.pending)).await?;
        if read == 0 {
            return Err(ModbusError::StreamClosed);
        }
        self.stats.bytes_received += read as u64;
        Ok(())
    }

    /// Skip to the next start marker, leaving it at the front of the buffer
    async fn find_start(&mut self) -> ModbusResult<()> {
        let mut scanned = 0;
        loop {
            let limit = self.pending.len().min(MAX_ASCII_MESSAGE_LENGTH - scanned);
            if let Some(at) = self.pending[..limit].iter().position(|&b| b == START_FRAME_MARKER) {
                if at > 0 {
                    debug!("AsciiTransport: discarded {} bytes before start marker", scanned + at);
                }
                self.pending.advance(at);
                return Ok(());
            }

            self.pending.advance(limit);
            scanned += limit;
            if scanned >= MAX_ASCII_MESSAGE_LENGTH {
                return Err(ModbusError::frame(format!(
                    "Start marker not found within {} bytes",
                    MAX_ASCII_MESSAGE_LENGTH
                )));
            }
            self.fill_pending().await?;
        }
    }

    /// Split one frame, start marker through CR LF, off the pending buffer
    async fn read_frame(&mut self) -> ModbusResult<BytesMut> {
        self.find_start().await?;
        let mut searched = 0;
        loop {
            let window = self.pending.len().min(MAX_ASCII_MESSAGE_LENGTH);
            let end = self.pending[searched..window]
                .windows(2)
                .position(|pair| pair == END_FRAME_MARKER)
                .map(|at| searched + at);

            if let Some(end) = end {
                // Everything up to CR LF is one frame; an inner ':' fails hex decoding
                return Ok(self.pending.split_to(end + END_FRAME_MARKER.len()));
            }

            if window >= MAX_ASCII_MESSAGE_LENGTH {
                // Drop the marker so the next receive rescans from the following byte
                self.pending.advance(1);
                return Err(ModbusError::frame(format!(
                    "End marker not found within {} bytes",
                    MAX_ASCII_MESSAGE_LENGTH
                )));
            }
            searched = window.saturating_sub(1);
            self.fill_pending().await?;
        }
    }

    async fn close_channel(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.pending.clear();
    }

    async fn note_failure(&mut self, error: &ModbusError) {
        self.stats.record_error(error);
        if error.is_fatal() {
            self.close_channel().await;
        }
    }
}

#[async_trait]
impl<S: AsyncStream> ModbusTransport for AsciiTransport<S> {
    async fn send(&mut self, message: &ModbusMessage) -> ModbusResult<()> {
        let frame = encode_ascii_frame(message.as_bytes());
        if self.packet_logging {
            log_packet("send", &frame, "ASCII", message.unit_id());
        }

        let limit = self.timeout;
        let result = match self.stream.as_mut() {
            Some(stream) => match with_deadline(limit, "send frame", stream.write_all(&frame)).await {
                Ok(()) => with_deadline(limit, "flush frame", stream.flush()).await,
                Err(e) => Err(e),
            },
            None => Err(ModbusError::connection("ASCII transport is disconnected")),
        };

        match result {
            Ok(()) => {
                self.last_transaction_id = message.transaction_id();
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.note_failure(&e).await;
                Err(e)
            }
        }
    }

    async fn receive(&mut self, message: &mut ModbusMessage) -> ModbusResult<()> {
        let result = match self.read_frame().await {
            Ok(frame) => {
                if self.packet_logging {
                    log_packet("receive", &frame, "ASCII", None);
                }
                decode_ascii_frame(&frame, message)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                message.set_transaction_id(self.last_transaction_id);
                self.stats.frames_received += 1;
                Ok(())
            }
            Err(e) => {
                debug!("AsciiTransport: receive failed: {}", e);
                self.note_failure(&e).await;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> ModbusResult<()> {
        self.close_channel().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Serial data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Serial stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

/// Serial line settings for RTU timing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl RtuConfig {
    /// Bits on the wire per character: start bit, data bits, parity bit, stop bits
    pub fn character_length(&self) -> f64 {
        let data = match self.data_bits {
            DataBits::Five => 5.0,
            DataBits::Six => 6.0,
            DataBits::Seven => 7.0,
            DataBits::Eight => 8.0,
        };
        let parity = match self.parity {
            Parity::None => 0.0,
            Parity::Odd | Parity::Even | Parity::Mark | Parity::Space => 1.0,
        };
        let stop = match self.stop_bits {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        };
        1.0 + data + parity + stop
    }

    /// Minimum silence between frames in whole milliseconds, rounded up
    pub fn frame_break_time_ms(&self) -> ModbusResult<u64> {
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("Baud rate must be greater than zero"));
        }
        let millis = FRAME_SEPARATOR_LENGTH * self.character_length() * 1000.0 / self.baud_rate as f64;
        Ok(millis.ceil() as u64)
    }
}

/// Modbus RTU transport placeholder
///
/// Carries the serial settings and the derived frame break time. Byte-level
/// RTU framing and its checksum are not implemented, so `send` and `receive`
/// always fail with [`ModbusError::Unsupported`].
// TODO: implement RTU framing with CRC-16 once a serial backend is chosen
pub struct RtuTransport {
    config: RtuConfig,
    frame_break: Duration,
    connected: bool,
    stats: TransportStats,
}

impl RtuTransport {
    /// Create an RTU transport from validated serial settings
    pub fn new(config: RtuConfig) -> ModbusResult<Self> {
        let frame_break = Duration::from_millis(config.frame_break_time_ms()?);
        debug!(
            "RtuTransport: {} baud, {} bits per character, frame break {:?}",
            config.baud_rate,
            config.character_length(),
            frame_break
        );
        Ok(Self {
            config,
            frame_break,
            connected: true,
            stats: TransportStats::default(),
        })
    }

    /// Serial settings this transport was opened with
    pub fn config(&self) -> &RtuConfig {
        &self.config
    }

    /// Silence that separates two frames
    pub fn frame_break(&self) -> Duration {
        self.frame_break
    }
}

#[async_trait]
impl ModbusTransport for RtuTransport {
    async fn send(&mut self, _message: &ModbusMessage) -> ModbusResult<()> {
        self.stats.errors += 1;
        Err(ModbusError::unsupported("RTU send is not implemented"))
    }

    async fn receive(&mut self, _message: &mut ModbusMessage) -> ModbusResult<()> {
        self.stats.errors += 1;
        Err(ModbusError::unsupported("RTU receive is not implemented"))
    }

    async fn disconnect(&mut self) -> ModbusResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// In-process transport over a pair of bounded queues
///
/// Messages are copied whole; no framing takes place.
pub struct LocalTransport {
    outgoing: Option<mpsc::Sender<ModbusMessage>>,
    incoming: mpsc::Receiver<ModbusMessage>,
    stats: TransportStats,
}

impl LocalTransport {
    /// Create two connected endpoints
    pub fn pair() -> (LocalTransport, LocalTransport) {
        let (a_tx, a_rx) = mpsc::channel(LOCAL_QUEUE_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(LOCAL_QUEUE_CAPACITY);
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(outgoing: mpsc::Sender<ModbusMessage>, incoming: mpsc::Receiver<ModbusMessage>) -> Self {
        Self {
            outgoing: Some(outgoing),
            incoming,
            stats: TransportStats::default(),
        }
    }
}

#[async_trait]
impl ModbusTransport for LocalTransport {
    async fn send(&mut self, message: &ModbusMessage) -> ModbusResult<()> {
        let result = match self.outgoing.as_ref() {
            Some(outgoing) => outgoing
                .send(message.clone())
                .await
                .map_err(|_| ModbusError::StreamClosed),
            None => Err(ModbusError::connection("Local transport is disconnected")),
        };
        match result {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += message.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.stats.record_error(&e);
                Err(e)
            }
        }
    }

    async fn receive(&mut self, message: &mut ModbusMessage) -> ModbusResult<()> {
        match self.incoming.recv().await {
            Some(received) => {
                *message = received;
                self.stats.frames_received += 1;
                self.stats.bytes_received += message.len() as u64;
                Ok(())
            }
            None => {
                let e = ModbusError::StreamClosed;
                self.stats.record_error(&e);
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> ModbusResult<()> {
        self.outgoing = None;
        self.incoming.close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.outgoing.is_some()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
