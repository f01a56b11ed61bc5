/// Voltage Modbus Link Master Demo
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Connects to a Modbus TCP slave, writes a block of holding registers and then
/// polls holding and input registers.
///
/// Usage: `master_demo [address] [unit id]`, defaulting to `127.0.0.1:502` and unit 0.

use std::net::SocketAddr;
use std::time::Duration;
use anyhow::Context;
use log::warn;
use tokio::time::sleep;

use voltage_modbus_link::logging::init_logging;
use voltage_modbus_link::{CallbackLogger, LogLevel, ModbusMaster, ModbusTransport, TcpTransport};

const POLL_COUNT: u16 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LogLevel::Info);

    println!("🚀 Voltage Modbus Link Master Demo");
    println!("==================================");

    let address: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:502".to_string())
        .parse()
        .context("invalid server address")?;
    let unit_id: u8 = match std::env::args().nth(2) {
        Some(unit) => unit.parse().context("unit id must be 0-255")?,
        None => 0,
    };

    println!("Connecting to Modbus slave at {}...", address);
    let transport = TcpTransport::connect_with_timeout(address, Duration::from_secs(5))
        .await
        .with_context(|| format!("connecting to {}", address))?
        .with_timeout(Duration::from_secs(5));
    println!("✅ Connected successfully!");

    let mut master = ModbusMaster::with_logger(transport, CallbackLogger::console());
    let mut transaction_id: u16 = 1;

    let block: Vec<u16> = (0..POLL_COUNT).map(|i| 0x1000 + i).collect();
    match master
        .write_multiple_registers_with_unit(unit_id, 0, POLL_COUNT, transaction_id, &block)
        .await
    {
        Ok(()) => println!("✏️  Wrote holding registers 0-{}", POLL_COUNT - 1),
        Err(e) => println!("❌ Failed to write holding registers: {}", e),
    }

    for _ in 0..5 {
        let mut holding = [0u16; POLL_COUNT as usize];
        transaction_id = transaction_id.wrapping_add(1);
        match master
            .read_holding_registers_with_unit(unit_id, 0, POLL_COUNT, transaction_id, &mut holding)
            .await
        {
            Ok(()) => println!("📈 Holding registers: {:?}", holding),
            Err(e) if e.is_fatal() => return Err(e).context("reading holding registers"),
            Err(e) => warn!("Holding register read failed: {}", e),
        }

        let mut inputs = [0u16; POLL_COUNT as usize];
        transaction_id = transaction_id.wrapping_add(1);
        match master
            .read_input_registers_with_unit(unit_id, 0, POLL_COUNT, transaction_id, &mut inputs)
            .await
        {
            Ok(()) => println!("📊 Input registers: {:?}", inputs),
            Err(e) if e.is_fatal() => return Err(e).context("reading input registers"),
            Err(e) => warn!("Input register read failed: {}", e),
        }

        sleep(Duration::from_secs(1)).await;
    }

    let stats = master.transport().get_stats();
    println!("\n📊 Transport statistics:");
    println!("   Frames sent: {}", stats.frames_sent);
    println!("   Frames received: {}", stats.frames_received);
    println!("   Errors: {}", stats.errors);
    println!("   Timeouts: {}", stats.timeouts);

    master.disconnect().await?;
    println!("\n✅ Disconnected");
    Ok(())
}
