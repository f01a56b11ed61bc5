/// Modbus TCP server
///
/// Accepts connections on a TCP listener and runs one [`ModbusSlave`] task per
/// connection. Every session answers for the same unit id and works on the same
/// shared register banks, so a write made through one connection is visible to
/// all others.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use log::{debug, error, info, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::UnitId;
use crate::register_bank::{RegisterBank, SharedRegisterBank};
use crate::slave::{ModbusSlave, SlaveStats};
use crate::transport::{ModbusTransport, TcpTransport};
use crate::DEFAULT_TCP_PORT;

/// Register count of the banks a server creates for itself
pub const DEFAULT_BANK_SIZE: usize = 100;

/// Modbus server trait
#[async_trait]
pub trait ModbusServer: Send + Sync {
    /// Start the server
    async fn start(&mut self) -> ModbusResult<()>;

    /// Stop the server and wait for its sessions to end
    async fn stop(&mut self) -> ModbusResult<()>;

    /// Check if server is running
    fn is_running(&self) -> bool;

    /// Get server statistics
    fn get_stats(&self) -> ServerStats;
}

/// Server statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections_count: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_requests: u64,
    pub ignored_requests: u64,
    pub exception_responses: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub uptime_seconds: u64,
}

/// Modbus TCP server configuration
///
/// Loadable from YAML or JSON; missing fields take their defaults.
///
/// ```rust
/// use voltage_modbus_link::ModbusTcpServerConfig;
///
/// let config = ModbusTcpServerConfig::from_yaml_str("bind_address: 127.0.0.1:1502\nunit_id: 3\n").unwrap();
/// assert_eq!(config.unit_id, 3);
/// assert_eq!(config.max_connections, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusTcpServerConfig {
    pub bind_address: SocketAddr,
    /// Unit id every session answers to
    pub unit_id: UnitId,
    pub max_connections: usize,
    /// Idle time after which a session is closed, in milliseconds on the wire
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for ModbusTcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TCP_PORT)),
            unit_id: 0,
            max_connections: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ModbusTcpServerConfig {
    pub fn from_yaml_str(text: &str) -> ModbusResult<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json` file, or from YAML for any other extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.max_connections == 0 {
            return Err(ModbusError::configuration("max_connections must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(ModbusError::configuration("request_timeout must be positive"));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Banks handed to every session
#[derive(Clone)]
struct SessionBanks {
    input_registers: SharedRegisterBank,
    output_registers: SharedRegisterBank,
}

/// Modbus TCP server implementation
pub struct ModbusTcpServer {
    config: ModbusTcpServerConfig,
    banks: SessionBanks,
    stats: Arc<Mutex<ServerStats>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    is_running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    start_time: Option<Instant>,
    accept_task: Option<JoinHandle<()>>,
}

impl ModbusTcpServer {
    /// Create a server with its own banks of [`DEFAULT_BANK_SIZE`] registers
    pub fn new(config: ModbusTcpServerConfig) -> ModbusResult<Self> {
        Self::with_banks(
            config,
            RegisterBank::shared(DEFAULT_BANK_SIZE),
            RegisterBank::shared(DEFAULT_BANK_SIZE),
        )
    }

    /// Create a server whose sessions serve the given banks
    pub fn with_banks(
        config: ModbusTcpServerConfig,
        input_registers: SharedRegisterBank,
        output_registers: SharedRegisterBank,
    ) -> ModbusResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            banks: SessionBanks {
                input_registers,
                output_registers,
            },
            stats: Arc::new(Mutex::new(ServerStats::default())),
            shutdown_tx: None,
            is_running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            start_time: None,
            accept_task: None,
        })
    }

    /// Server configuration
    pub fn config(&self) -> &ModbusTcpServerConfig {
        &self.config
    }

    /// Input register bank shared by every session
    pub fn input_registers(&self) -> SharedRegisterBank {
        self.banks.input_registers.clone()
    }

    /// Holding register bank shared by every session
    pub fn output_registers(&self) -> SharedRegisterBank {
        self.banks.output_registers.clone()
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Run one slave session until the peer leaves, the link fails or the server stops
    async fn handle_client(
        stream: TcpStream,
        unit_id: UnitId,
        banks: SessionBanks,
        stats: Arc<Mutex<ServerStats>>,
        mut shutdown_rx: broadcast::Receiver<()>,
        request_timeout: Duration,
    ) {
        let transport = TcpTransport::from_tcp_stream(stream).with_timeout(request_timeout);
        let peer_addr = transport
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!("📡 New client connected: {}", peer_addr);

        let mut slave = ModbusSlave::new(transport, unit_id);
        slave.attach_input_registers(banks.input_registers);
        slave.attach_output_registers(banks.output_registers);

        let mut seen = SlaveStats::default();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received for client {}", peer_addr);
                    break;
                }
                result = slave.process_one_request() => {
                    let current = slave.stats().clone();
                    record_session(&stats, &seen, &current);
                    seen = current;

                    if let Err(e) = result {
                        match e {
                            ModbusError::StreamClosed => debug!("Client {} closed the connection", peer_addr),
                            ModbusError::Timeout { .. } => warn!("Client {} idle for {:?}", peer_addr, request_timeout),
                            e => warn!("Session with {} ended: {}", peer_addr, e),
                        }
                        break;
                    }
                }
            }
        }

        let mut transport = slave.into_transport();
        let transport_stats = transport.get_stats();
        let _ = transport.disconnect().await;
        if let Ok(mut stats) = stats.lock() {
            stats.bytes_received += transport_stats.bytes_received;
            stats.bytes_sent += transport_stats.bytes_sent;
            stats.active_connections = stats.active_connections.saturating_sub(1);
        }

        info!("🔌 Client {} disconnected", peer_addr);
    }
}

fn record_session(stats: &Mutex<ServerStats>, before: &SlaveStats, after: &SlaveStats) {
    if let Ok(mut stats) = stats.lock() {
        stats.total_requests += after.requests_handled - before.requests_handled;
        stats.ignored_requests += after.requests_ignored - before.requests_ignored;
        stats.exception_responses += after.exceptions_sent - before.exceptions_sent;
    }
}

#[async_trait]
impl ModbusServer for ModbusTcpServer {
    async fn start(&mut self) -> ModbusResult<()> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(ModbusError::configuration("Server is already running"));
        }

        info!("🚀 Starting Modbus TCP server on {}", self.config.bind_address);

        let listener = TcpListener::bind(self.config.bind_address).await.map_err(|e| {
            ModbusError::connection(format!("Failed to bind to {}: {}", self.config.bind_address, e))
        })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        self.local_addr = Some(local_addr);
        self.start_time = Some(Instant::now());
        self.is_running.store(true, Ordering::SeqCst);

        info!("✅ Modbus TCP server listening on {}", local_addr);
        info!("   - Unit id: {}", self.config.unit_id);
        info!("   - Max connections: {}", self.config.max_connections);
        info!("   - Request timeout: {:?}", self.config.request_timeout);

        let banks = self.banks.clone();
        let stats = self.stats.clone();
        let unit_id = self.config.unit_id;
        let max_connections = self.config.max_connections;
        let request_timeout = self.config.request_timeout;
        let is_running_flag = self.is_running.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        self.accept_task = Some(tokio::spawn(async move {
            let active = Arc::new(AtomicUsize::new(0));
            let mut sessions: Vec<JoinHandle<()>> = Vec::new();

            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                sessions.retain(|session| !session.is_finished());
                                if active.load(Ordering::SeqCst) >= max_connections {
                                    warn!("Rejecting {}: {} connections already open", addr, max_connections);
                                    if let Ok(mut stats) = stats.lock() {
                                        stats.rejected_connections += 1;
                                    }
                                    drop(stream);
                                    continue;
                                }
                                debug!("Accepted connection from {}", addr);

                                if let Ok(mut stats) = stats.lock() {
                                    stats.connections_count += 1;
                                    stats.active_connections += 1;
                                }
                                active.fetch_add(1, Ordering::SeqCst);

                                let banks = banks.clone();
                                let stats = stats.clone();
                                let active = active.clone();
                                let shutdown_rx = shutdown_tx.subscribe();
                                sessions.push(tokio::spawn(async move {
                                    Self::handle_client(stream, unit_id, banks, stats, shutdown_rx, request_timeout).await;
                                    active.fetch_sub(1, Ordering::SeqCst);
                                }));
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping server");
                        break;
                    }
                }
            }

            drop(listener);
            futures::future::join_all(sessions).await;
            is_running_flag.store(false, Ordering::SeqCst);
        }));

        Ok(())
    }

    async fn stop(&mut self) -> ModbusResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.accept_task.take() {
            task.await
                .map_err(|e| ModbusError::internal(format!("Accept task failed: {}", e)))?;
        }
        self.is_running.store(false, Ordering::SeqCst);

        info!("⏹️  Modbus TCP server stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn get_stats(&self) -> ServerStats {
        let mut stats = self
            .stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default();

        if let Some(start_time) = self.start_time {
            stats.uptime_seconds = start_time.elapsed().as_secs();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModbusTcpServerConfig::default();
        assert_eq!(config.bind_address.port(), 502);
        assert_eq!(config.unit_id, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml_and_json() {
        let yaml = "bind_address: 127.0.0.1:1502\nunit_id: 7\nrequest_timeout: 1500\n";
        let config = ModbusTcpServerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.bind_address.port(), 1502);
        assert_eq!(config.unit_id, 7);
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_connections, 100);

        let json = r#"{"bind_address": "127.0.0.1:1503", "max_connections": 2}"#;
        let config = ModbusTcpServerConfig::from_json_str(json).unwrap();
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_config() {
        assert!(ModbusTcpServerConfig::from_yaml_str("max_connections: 0\n")
            .unwrap_err()
            .to_string()
            .contains("max_connections"));
        assert!(matches!(
            ModbusTcpServerConfig::from_json_str("{\"unit_id\": 300}"),
            Err(ModbusError::Configuration { .. })
        ));
        assert!(ModbusTcpServerConfig::from_yaml_str("request_timeout: 0\n").is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let config = ModbusTcpServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let mut server = ModbusTcpServer::new(config).unwrap();
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());

        server.start().await.unwrap();
        assert!(server.is_running());
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert!(server.start().await.is_err());

        server.stop().await.unwrap();
        assert!(!server.is_running());
        assert_eq!(server.get_stats().connections_count, 0);
    }
}
