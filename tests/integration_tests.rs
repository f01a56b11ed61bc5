//! Integration Tests for Voltage Modbus Link
//!
//! Masters and slaves talking to each other over loopback TCP, the in-process
//! transport pair and ASCII framing on an in-memory stream.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use voltage_modbus_link::*;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept one connection and serve it with a slave until the link closes
async fn spawn_tcp_slave(
    unit_id: UnitId,
    inputs: SharedRegisterBank,
    outputs: SharedRegisterBank,
) -> (SocketAddr, JoinHandle<ModbusError>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut slave = ModbusSlave::new(TcpTransport::from_tcp_stream(stream), unit_id);
        slave.attach_input_registers(inputs);
        slave.attach_output_registers(outputs);
        slave.serve_forever().await
    });
    (addr, handle)
}

async fn connect(addr: SocketAddr) -> TcpTransport {
    TcpTransport::connect(addr).await.unwrap().with_timeout(TEST_TIMEOUT)
}

#[tokio::test]
async fn test_tcp_read_holding_registers_end_to_end() {
    let holding = RegisterBank::shared(100);
    holding.write().unwrap().set_range(10, &[5, 6, 7]).unwrap();
    let (addr, slave) = spawn_tcp_slave(0, RegisterBank::shared(100), holding).await;

    let mut master = ModbusMaster::new(connect(addr).await);
    let mut results = [0u16; 3];
    master.read_holding_registers(10, 3, &mut results).await.unwrap();
    assert_eq!(results, [5, 6, 7]);

    master.disconnect().await.unwrap();
    let err = timeout(TEST_TIMEOUT, slave).await.unwrap().unwrap();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_tcp_write_multiple_registers_end_to_end() {
    let holding = RegisterBank::shared(10);
    let (addr, _slave) = spawn_tcp_slave(0, RegisterBank::shared(10), holding.clone()).await;

    let mut master = ModbusMaster::new(connect(addr).await);
    master.write_multiple_registers(0, 2, &[42, 43]).await.unwrap();

    {
        let bank = holding.read().unwrap();
        assert_eq!(bank.get(0).unwrap(), 42);
        assert_eq!(bank.get(1).unwrap(), 43);
    }

    // read back through the same session with explicit unit and transaction ids
    let mut results = [0u16; 2];
    master
        .read_holding_registers_with_unit(0, 0, 2, 0xBEEF, &mut results)
        .await
        .unwrap();
    assert_eq!(results, [42, 43]);
}

#[tokio::test]
async fn test_tcp_write_request_round_trips_at_edges() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    let mut sender = connect(addr).await;
    let mut receiver = TcpTransport::from_tcp_stream(accept.await.unwrap()).with_timeout(TEST_TIMEOUT);

    let max = codec::MAX_WRITE_COUNT as u16;
    let cases: [(UnitId, u16, u16); 5] = [
        (0, 0, 1),
        (255, 0, max),
        (255, 65535 - max, max),
        (255, 65534, 1),
        (17, 1000, 37),
    ];

    let mut request = ModbusMessage::new();
    let mut received = ModbusMessage::new();
    for (txid, &(unit_id, reference, count)) in cases.iter().enumerate() {
        let values: Vec<u16> = (0..count).map(|i| i.wrapping_mul(0x0101) ^ reference).collect();
        codec::encode_write_multiple_request(&mut request, unit_id, reference, &values, txid as u16).unwrap();
        sender.send(&request).await.unwrap();
        receiver.receive(&mut received).await.unwrap();

        assert_eq!(received.transaction_id(), txid as u16);
        assert_eq!(received.unit_id(), Some(unit_id));
        assert_eq!(
            codec::decode_reference_count(&received),
            Some((reference as usize, count as usize))
        );
        let decoded: Vec<u16> = received.as_bytes()[codec::WRITE_REQUEST_HEADER_LENGTH..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(decoded, values);
    }
}

#[tokio::test]
async fn test_tcp_write_multiple_registers_at_top_of_address_space() {
    let holding = RegisterBank::shared(65535);
    let (addr, _slave) = spawn_tcp_slave(255, RegisterBank::shared(1), holding.clone()).await;
    let mut master = ModbusMaster::new(connect(addr).await);

    let count = codec::MAX_WRITE_COUNT as u16;
    let reference = 65535 - count;
    let values: Vec<u16> = (0..count).map(|i| 0xFFFF - i).collect();
    master
        .write_multiple_registers_with_unit(255, reference, count, 0xFFFF, &values)
        .await
        .unwrap();
    assert_eq!(
        holding.read().unwrap().get_range(reference as usize, count as usize).unwrap(),
        values
    );

    let mut results = vec![0u16; count as usize];
    master
        .read_holding_registers_with_unit(255, reference, count, 1, &mut results)
        .await
        .unwrap();
    assert_eq!(results, values);

    // one past the last register
    let err = master
        .write_multiple_registers_with_unit(255, reference + 1, count, 2, &values)
        .await
        .unwrap_err();
    assert_eq!(err.exception_code(), Some(0x02));
}

#[tokio::test]
async fn test_tcp_bounds_exception() {
    let (addr, _slave) = spawn_tcp_slave(1, RegisterBank::shared(100), RegisterBank::shared(100)).await;
    let mut transport = connect(addr).await;

    let request = ModbusMessage::from_bytes(21, &[0x01, 0x04, 0x00, 0x62, 0x00, 0x03]).unwrap();
    transport.send(&request).await.unwrap();
    let mut response = ModbusMessage::new();
    transport.receive(&mut response).await.unwrap();

    assert_eq!(response.transaction_id(), 21);
    assert_eq!(response.len(), 3);
    assert_eq!(response.as_bytes(), &[0x01, 0x84, ExceptionCode::IllegalDataAddress.to_u8()]);

    // the master reports the same answer as an exception and keeps the connection
    let mut master = ModbusMaster::new(transport);
    let mut results = [0u16; 3];
    let err = master
        .read_input_registers_with_unit(1, 98, 3, 22, &mut results)
        .await
        .unwrap_err();
    assert!(err.is_exception());
    assert_eq!(err.exception_code(), Some(0x02));
    assert!(master.is_connected());

    master.read_input_registers_with_unit(1, 97, 3, 23, &mut results).await.unwrap();
}

#[tokio::test]
async fn test_tcp_slave_ignores_other_units() {
    let inputs = RegisterBank::shared(10);
    inputs.write().unwrap().set(0, 0x0102).unwrap();
    let (addr, _slave) = spawn_tcp_slave(1, inputs, RegisterBank::shared(10)).await;
    let mut transport = connect(addr).await;

    let foreign = ModbusMessage::from_bytes(1, &[0x02, 0x04, 0x00, 0x00, 0x00, 0x01]).unwrap();
    let ours = ModbusMessage::from_bytes(2, &[0x01, 0x04, 0x00, 0x00, 0x00, 0x01]).unwrap();
    transport.send(&foreign).await.unwrap();
    transport.send(&ours).await.unwrap();

    // the first frame back answers the second request
    let mut response = ModbusMessage::new();
    transport.receive(&mut response).await.unwrap();
    assert_eq!(response.transaction_id(), 2);
    assert_eq!(response.as_bytes(), &[0x01, 0x04, 0x02, 0x01, 0x02]);
}

#[tokio::test]
async fn test_tcp_header_rejection_closes_master_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 12];
        stream.read_exact(&mut request).await.unwrap();
        // well-formed body, protocol id 1
        stream
            .write_all(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x05, 0x00, 0x03, 0x02, 0x00, 0x07])
            .await
            .unwrap();
        let mut rest = Vec::new();
        // ends once the master has closed its end, possibly with a reset
        let _ = stream.read_to_end(&mut rest).await;
        rest
    });

    let mut master = ModbusMaster::new(connect(addr).await);
    let mut results = [0u16; 1];
    let err = master.read_holding_registers(0, 1, &mut results).await.unwrap_err();
    assert!(matches!(err, ModbusError::InvalidHeader { .. }));
    assert!(!master.is_connected());
    assert_eq!(results, [0]);

    let rest = timeout(TEST_TIMEOUT, peer).await.unwrap().unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_local_transport_end_to_end() {
    let (master_side, slave_side) = LocalTransport::pair();
    let holding = RegisterBank::shared(10);

    let mut slave = ModbusSlave::new(slave_side, 0);
    slave.attach_output_registers(holding.clone());
    let slave = tokio::spawn(async move { slave.serve_forever().await });

    let mut master = ModbusMaster::new(master_side);
    master.write_multiple_registers(0, 2, &[42, 43]).await.unwrap();

    let mut results = [0u16; 2];
    master.read_holding_registers(0, 2, &mut results).await.unwrap();
    assert_eq!(results, [42, 43]);

    // no input registers attached
    let err = master.read_input_registers(0, 1, &mut results[..1]).await.unwrap_err();
    assert_eq!(err.exception_code(), Some(0x02));

    drop(master);
    let err = timeout(TEST_TIMEOUT, slave).await.unwrap().unwrap();
    assert_eq!(err, ModbusError::StreamClosed);
}

#[tokio::test]
async fn test_ascii_master_and_slave_over_duplex() {
    let (master_stream, slave_stream) = duplex(1024);
    let inputs = RegisterBank::shared(20);
    inputs.write().unwrap().set_range(4, &[0xAAAA, 0x5555]).unwrap();
    let holding = RegisterBank::shared(20);

    let mut slave = ModbusSlave::new(AsciiTransport::new(slave_stream), 0x11);
    slave.attach_input_registers(inputs);
    slave.attach_output_registers(holding.clone());
    let _slave = tokio::spawn(async move { slave.serve_forever().await });

    let mut master = ModbusMaster::new(AsciiTransport::new(master_stream).with_timeout(TEST_TIMEOUT));

    let mut results = [0u16; 2];
    master
        .read_input_registers_with_unit(0x11, 4, 2, 9, &mut results)
        .await
        .unwrap();
    assert_eq!(results, [0xAAAA, 0x5555]);

    master
        .write_multiple_registers_with_unit(0x11, 18, 2, 10, &[1, 2])
        .await
        .unwrap();
    assert_eq!(holding.read().unwrap().get_range(18, 2).unwrap(), vec![1, 2]);

    let err = master
        .write_multiple_registers_with_unit(0x11, 19, 2, 11, &[1, 2])
        .await
        .unwrap_err();
    assert_eq!(err.exception_code(), Some(0x02));
}

#[tokio::test]
async fn test_ascii_slave_sees_exact_frames() {
    let (mut raw, slave_stream) = duplex(1024);
    let mut slave = ModbusSlave::new(AsciiTransport::new(slave_stream), 1);
    slave.attach_output_registers(RegisterBank::shared(4));
    let _slave = tokio::spawn(async move { slave.serve_forever().await });

    // unknown function code, preceded by line noise
    raw.write_all(b"\r\n#junk").await.unwrap();
    raw.write_all(b":012BD4\r\n").await.unwrap();

    let mut reply = [0u8; 11];
    timeout(TEST_TIMEOUT, raw.read_exact(&mut reply)).await.unwrap().unwrap();
    assert_eq!(&reply, b":01AB0153\r\n");
}

#[tokio::test]
async fn test_tcp_server_serves_concurrent_masters() {
    let config = ModbusTcpServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        unit_id: 1,
        ..Default::default()
    };
    let mut server = ModbusTcpServer::new(config).unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut tasks = Vec::new();
    for client in 0..4u16 {
        tasks.push(tokio::spawn(async move {
            let mut master = ModbusMaster::new(connect(addr).await);
            let reference = client * 10;
            let values: Vec<u16> = (0..5).map(|i| client * 100 + i).collect();
            master
                .write_multiple_registers_with_unit(1, reference, 5, client, &values)
                .await
                .unwrap();

            let mut results = [0u16; 5];
            master
                .read_holding_registers_with_unit(1, reference, 5, client + 100, &mut results)
                .await
                .unwrap();
            assert_eq!(results.to_vec(), values);
            master.disconnect().await.unwrap();
        }));
    }
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    let holding = server.output_registers();
    assert_eq!(holding.read().unwrap().get(31).unwrap(), 301);

    server.stop().await.unwrap();
    let stats = server.get_stats();
    assert_eq!(stats.connections_count, 4);
    assert_eq!(stats.total_requests, 8);
    assert_eq!(stats.active_connections, 0);
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_tcp_server_rejects_connections_over_limit() {
    let config = ModbusTcpServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        max_connections: 1,
        ..Default::default()
    };
    let mut server = ModbusTcpServer::new(config).unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut first = ModbusMaster::new(connect(addr).await);
    let mut results = [0u16; 1];
    first.read_holding_registers(0, 1, &mut results).await.unwrap();

    let mut second = ModbusMaster::new(connect(addr).await);
    let err = second.read_holding_registers(0, 1, &mut results).await.unwrap_err();
    assert!(err.is_fatal());

    server.stop().await.unwrap();
    assert_eq!(server.get_stats().rejected_connections, 1);
}
