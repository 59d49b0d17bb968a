//! Fragmentation Tests - Large PDU Transfer Tests
//!
//! Multi-fragment requests and responses over loopback TCP:
//! - Requests exceeding the negotiated max_xmit_frag
//! - Responses exceeding max_recv_frag
//! - Small fragment sizes producing many fragments
//! - Fragmentation under concurrent load
//! - Timeouts mid-call and refused fragment sizes

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use futures::future::join_all;

use common::*;
use dcerpc::{
    DceRpcClient, DceRpcClientBuilder, DceRpcServer, DceRpcServerConfig, Interface,
    InterfaceBuilder, RpcError, SyntaxId, Uuid, MIN_FRAG,
};

const FRAG_TEST_UUID: Uuid = Uuid::from_u128(0xf1a2b3c4_d5e6_7890_abcd_ef1234567890);

fn frag_syntax() -> SyntaxId {
    SyntaxId::new(FRAG_TEST_UUID, 1, 0)
}

/// opnum 0 echoes, opnum 1 generates N pattern bytes, opnum 2 checksums,
/// opnum 3 waits the leading u32 of milliseconds and then checksums
fn create_large_echo_interface() -> Interface {
    InterfaceBuilder::from_syntax(frag_syntax())
        .operation(0, |_call, args| async move { Ok(args) })
        .operation(1, |_call, args| async move {
            if args.len() < 4 {
                return Err(RpcError::InvalidPduData("invalid input".to_string()));
            }
            let size = u32::from_le_bytes([args[0], args[1], args[2], args[3]]) as usize;
            let mut data = BytesMut::with_capacity(size);
            for i in 0..size {
                data.put_u8((i % 256) as u8);
            }
            Ok(data.freeze())
        })
        .operation(2, |_call, args| async move {
            let mut result = BytesMut::with_capacity(8);
            result.put_u64_le(compute_checksum(&args));
            Ok(result.freeze())
        })
        .operation(3, |_call, args| async move {
            if args.len() < 4 {
                return Err(RpcError::InvalidPduData("invalid input".to_string()));
            }
            let millis = u32::from_le_bytes([args[0], args[1], args[2], args[3]]);
            tokio::time::sleep(Duration::from_millis(millis as u64)).await;
            let mut result = BytesMut::with_capacity(8);
            result.put_u64_le(compute_checksum(&args));
            Ok(result.freeze())
        })
        .build()
}

async fn start_frag_test_server(max_frag: u16) -> (std::net::SocketAddr, tokio::task::JoinHandle<dcerpc::Result<()>>) {
    let config = DceRpcServerConfig {
        max_pdu_size: 2 * 1024 * 1024,
        max_connections: 100,
        max_xmit_frag: max_frag,
        max_recv_frag: max_frag,
    };
    let server = Arc::new(DceRpcServer::with_config(config));
    server.register_interface(create_large_echo_interface()).await;
    spawn_server(server).await
}

async fn connect_frag_client(addr: std::net::SocketAddr, max_frag: u16) -> dcerpc::Result<DceRpcClient> {
    DceRpcClientBuilder::from_syntax(frag_syntax())
        .max_frag(max_frag, max_frag)
        .max_pdu_size(2 * 1024 * 1024)
        .timeout(Duration::from_secs(30))
        .connect(addr)
        .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_request_fragmentation() {
    init_logging();

    const REQUEST_SIZE: usize = 100_000;

    let (addr, server) = start_frag_test_server(4096).await;
    let client = connect_frag_client(addr, 4096).await.unwrap();

    let mut payload = BytesMut::with_capacity(REQUEST_SIZE);
    for i in 0..REQUEST_SIZE {
        payload.put_u8((i % 256) as u8);
    }
    let payload = payload.freeze();
    let expected = compute_checksum(&payload);

    let reply = client.call(2, payload).await.unwrap();
    assert_eq!(reply.len(), 8);
    assert_eq!(u64::from_le_bytes(reply[..8].try_into().unwrap()), expected);

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_response_fragmentation() {
    init_logging();

    const RESPONSE_SIZE: usize = 150_000;

    let (addr, server) = start_frag_test_server(4096).await;
    let client = connect_frag_client(addr, 4096).await.unwrap();

    let mut request = BytesMut::with_capacity(4);
    request.put_u32_le(RESPONSE_SIZE as u32);

    let response = client.call(1, request.freeze()).await.unwrap();
    assert_eq!(response.len(), RESPONSE_SIZE);
    for (i, byte) in response.iter().enumerate() {
        assert_eq!(*byte, (i % 256) as u8, "pattern mismatch at byte {}", i);
    }

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bidirectional_large_transfer() {
    init_logging();

    const DATA_SIZE: usize = 75_000;

    let (addr, server) = start_frag_test_server(4096).await;
    let client = connect_frag_client(addr, 4096).await.unwrap();

    let payload = TestDataGenerator::new(12345).random_bytes(DATA_SIZE);
    let expected = compute_checksum(&payload);

    let start = Instant::now();
    let response = client.call(0, payload).await.unwrap();
    println!("75KB echo in {:?}", start.elapsed());

    assert_eq!(response.len(), DATA_SIZE);
    assert_eq!(compute_checksum(&response), expected);

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_small_fragment_size() {
    init_logging();

    const DATA_SIZE: usize = 10_000;
    const MAX_FRAG: u16 = 512;

    // the server's own sizes are small; the client offers the usual ones
    let (addr, server) = start_frag_test_server(MAX_FRAG).await;
    let client = connect_frag_client(addr, 4096).await.unwrap();
    assert_eq!(client.max_xmit_frag(), MAX_FRAG);

    let payload = TestDataGenerator::new(42).random_bytes(DATA_SIZE);
    let expected = compute_checksum(&payload);

    let response = client.call(0, payload).await.unwrap();
    assert_eq!(response.len(), DATA_SIZE);
    assert_eq!(compute_checksum(&response), expected);

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_negotiates_smaller_client_fragment() {
    init_logging();

    let (addr, server) = start_frag_test_server(4096).await;
    let client = connect_frag_client(addr, MIN_FRAG).await.unwrap();
    assert_eq!(client.max_xmit_frag(), MIN_FRAG);

    let payload = TestDataGenerator::new(7).random_bytes(20_000);
    let response = client.call(0, payload.clone()).await.unwrap();
    assert_eq!(response, payload);

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_during_fragmented_call_closes_connection() {
    init_logging();

    let (addr, server) = start_frag_test_server(4096).await;
    let client = DceRpcClientBuilder::from_syntax(frag_syntax())
        .max_frag(4096, 4096)
        .timeout(Duration::from_millis(200))
        .connect(addr)
        .await
        .unwrap();

    let mut request = BytesMut::with_capacity(30_000);
    request.put_u32_le(600);
    request.extend_from_slice(&TestDataGenerator::new(3).random_bytes(30_000 - 4));
    assert!(matches!(
        client.call(3, request.freeze()).await,
        Err(RpcError::Timeout)
    ));
    assert!(client.is_broken());

    // by now the stale reply sits on the socket
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(matches!(
        client.call(0, bytes::Bytes::from_static(b"again")).await,
        Err(RpcError::ConnectionClosed)
    ));

    // a fresh connection to the same server is unaffected
    let fresh = connect_frag_client(addr, 4096).await.unwrap();
    let payload = TestDataGenerator::new(4).random_bytes(10_000);
    assert_eq!(fresh.call(0, payload.clone()).await.unwrap(), payload);

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tiny_client_fragment_is_refused() {
    init_logging();

    let (addr, server) = start_frag_test_server(4096).await;
    match connect_frag_client(addr, 256).await {
        Err(RpcError::BindFailed(reason)) => assert!(reason.contains("bind_nak"), "{}", reason),
        Err(e) => panic!("expected BindFailed, got {}", e),
        Ok(_) => panic!("bind with a 256 byte receive fragment was accepted"),
    }

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_fragmentation_under_load() {
    init_logging();

    const NUM_CLIENTS: usize = 10;
    const REQUESTS_PER_CLIENT: usize = 5;
    const DATA_SIZE: usize = 50_000;

    let (addr, server) = start_frag_test_server(4096).await;

    let stats = Arc::new(ConcurrentStats::new());
    let mut handles = Vec::new();

    for client_id in 0..NUM_CLIENTS {
        let stats = Arc::clone(&stats);
        handles.push(tokio::spawn(async move {
            let client = match connect_frag_client(addr, 4096).await {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("client {} failed to connect: {}", client_id, e);
                    stats.record_failure();
                    return;
                }
            };

            let mut gen = TestDataGenerator::new(client_id as u64 * 12345 + 1);
            for _ in 0..REQUESTS_PER_CLIENT {
                let payload = gen.random_bytes(DATA_SIZE);
                let expected = compute_checksum(&payload);
                let start = Instant::now();
                match client.call(0, payload).await {
                    Ok(response)
                        if response.len() == DATA_SIZE && compute_checksum(&response) == expected =>
                    {
                        stats.record_success(start.elapsed())
                    }
                    Ok(_) => stats.record_failure(),
                    Err(e) => {
                        eprintln!("client {} call failed: {}", client_id, e);
                        stats.record_failure();
                    }
                }
            }
        }));
    }

    join_all(handles).await;
    server.abort();

    let total = (NUM_CLIENTS * REQUESTS_PER_CLIENT) as u64;
    println!(
        "{} / {} ok, avg {:?}, max {:?}",
        stats.success_count(),
        total,
        stats.avg_latency(),
        stats.max_latency()
    );
    assert_eq!(stats.success_count(), total);
    assert_eq!(stats.failure_count(), 0);
}
