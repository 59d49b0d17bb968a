//! Helpers shared by the integration test binaries

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use dcerpc::{DceRpcClient, DceRpcClientBuilder, DceRpcServer, SyntaxId};
use dcom::{DcomServer, DualStringArray};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a fmt subscriber once per test binary; `RUST_LOG` filters it
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Serve `server` on an ephemeral loopback port until the handle is aborted
pub async fn spawn_server(server: Arc<DceRpcServer>) -> (SocketAddr, JoinHandle<dcerpc::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        server
            .serve_until(listener, std::future::pending::<()>())
            .await
    });
    (addr, handle)
}

/// DCOM exporter plus the RPC server hosting it. The exporter's string
/// binding names the listening port.
pub struct DcomHarness {
    pub dcom: DcomServer,
    pub rpc: Arc<DceRpcServer>,
    pub addr: SocketAddr,
    listener: Option<TcpListener>,
}

impl DcomHarness {
    pub async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dcom = DcomServer::new(DualStringArray::with_tcp_binding(&format!(
            "127.0.0.1[{}]",
            addr.port()
        )));
        Self {
            dcom,
            rpc: Arc::new(DceRpcServer::new()),
            addr,
            listener: Some(listener),
        }
    }

    /// Register the exporter's interfaces plus `syntaxes` and start serving
    pub async fn start(&mut self, syntaxes: &[SyntaxId]) -> JoinHandle<dcerpc::Result<()>> {
        self.dcom.register(&self.rpc, syntaxes).await;
        let listener = self.listener.take().unwrap();
        let rpc = Arc::clone(&self.rpc);
        tokio::spawn(async move {
            rpc.serve_until(listener, std::future::pending::<()>())
                .await
        })
    }
}

pub async fn connect(addr: SocketAddr, syntax: SyntaxId) -> DceRpcClient {
    DceRpcClientBuilder::from_syntax(syntax)
        .timeout(Duration::from_secs(10))
        .connect(addr)
        .await
        .unwrap()
}

/// FNV-1a over the payload
pub fn compute_checksum(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Deterministic xorshift byte source
pub struct TestDataGenerator {
    state: u64,
}

impl TestDataGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn random_bytes(&mut self, len: usize) -> bytes::Bytes {
        let mut out = Vec::with_capacity(len + 8);
        while out.len() < len {
            out.extend_from_slice(&self.next_u64().to_le_bytes());
        }
        out.truncate(len);
        out.into()
    }
}

/// Success/failure counters and latencies across concurrent tasks
#[derive(Default)]
pub struct ConcurrentStats {
    success: AtomicU64,
    failure: AtomicU64,
    latencies: Mutex<Vec<Duration>>,
}

impl ConcurrentStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, latency: Duration) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.latencies.lock().push(latency);
    }

    pub fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    pub fn avg_latency(&self) -> Duration {
        let latencies = self.latencies.lock();
        if latencies.is_empty() {
            return Duration::ZERO;
        }
        latencies.iter().sum::<Duration>() / latencies.len() as u32
    }

    pub fn max_latency(&self) -> Duration {
        self.latencies.lock().iter().copied().max().unwrap_or_default()
    }
}
