/// Voltage Modbus Link Slave Demo
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Serves two 100-register banks over Modbus TCP. Input registers are refreshed
/// with random values every second; holding registers keep whatever masters write.
///
/// Usage: `slave_demo [config.yaml|config.json]`

use std::time::Duration;
use anyhow::Context;
use log::{error, info};
use rand::Rng;
use tokio::signal;
use tokio::time::interval;

use voltage_modbus_link::logging::init_logging;
use voltage_modbus_link::{
    LogLevel, ModbusServer, ModbusTcpServer, ModbusTcpServerConfig, RegisterBank,
};

const BANK_SIZE: usize = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LogLevel::Info);

    println!("🚀 Voltage Modbus Link Slave Demo");
    println!("=================================");

    let config = match std::env::args().nth(1) {
        Some(path) => ModbusTcpServerConfig::from_file(&path)
            .with_context(|| format!("loading server configuration from {}", path))?,
        None => ModbusTcpServerConfig::default(),
    };

    let input_registers = RegisterBank::shared(BANK_SIZE);
    let holding_registers = RegisterBank::shared(BANK_SIZE);

    let mut server = ModbusTcpServer::with_banks(config, input_registers.clone(), holding_registers.clone())?;
    server.start().await.context("starting Modbus TCP server")?;

    if let Some(addr) = server.local_addr() {
        info!("📍 Listening on {} as unit {}", addr, server.config().unit_id);
    }
    info!("   - 0x03: holding registers 0-{}", BANK_SIZE - 1);
    info!("   - 0x04: input registers 0-{} (random, refreshed every second)", BANK_SIZE - 1);
    info!("   - 0x10: holding registers 0-{}", BANK_SIZE - 1);

    let simulated = input_registers.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let values: Vec<u16> = {
                let mut rng = rand::thread_rng();
                (0..BANK_SIZE).map(|_| rng.gen()).collect()
            };
            match simulated.write() {
                Ok(mut bank) => {
                    if let Err(e) = bank.set_range(0, &values) {
                        error!("❌ Failed to refresh input registers: {}", e);
                    }
                }
                Err(_) => {
                    error!("❌ Input register bank lock poisoned");
                    break;
                }
            }
        }
    });

    println!("\n📋 Server running, press Ctrl+C to stop");

    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Received interrupt signal, stopping server..."),
        Err(err) => error!("❌ Failed to listen for interrupt signal: {}", err),
    }

    server.stop().await?;

    let stats = server.get_stats();
    info!("📊 Final server statistics:");
    info!("   Total connections: {}", stats.connections_count);
    info!("   Rejected connections: {}", stats.rejected_connections);
    info!("   Requests answered: {}", stats.total_requests);
    info!("   Exception responses: {}", stats.exception_responses);
    info!("   Requests for other units: {}", stats.ignored_requests);
    info!("   Bytes received: {} bytes", stats.bytes_received);
    info!("   Bytes sent: {} bytes", stats.bytes_sent);
    info!("   Uptime: {} seconds", stats.uptime_seconds);

    if let Ok(bank) = holding_registers.read() {
        info!("   Holding registers 0-9: {:?}", bank.get_range(0, 10)?);
    }

    println!("\n✅ Server stopped");
    Ok(())
}
