//! DCE RPC Server
//!
//! Connection-oriented server hosting interfaces keyed by interface UUID.
//!
//! - Each connection runs in its own Tokio task
//! - A semaphore bounds concurrent connections
//! - Several presentation contexts per connection (bind and alter_context)
//! - Fragmented requests are reassembled, responses fragmented to the
//!   client's receive size
//! - Handler failures come back as fault PDUs

use crate::dcerpc::{
    fault, BindAckPdu, BindNakPdu, BindPdu, ContextResultEntry, FaultPdu, Pdu, ProviderReason,
    RequestPdu, ResponsePdu, SyntaxId, Uuid, DCE_RPC_VERSION_MINOR, DEFAULT_MAX_FRAG,
    MIN_FRAG,
};
use crate::dcerpc_transport::DceRpcTransport;
use crate::error::{Result, RpcError};
use crate::fragmentation::{FragmentAssembler, FragmentGenerator};
use bytes::Bytes;
use midl_ndr::NdrContext;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// What a handler learns about the call it serves
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub call_id: u32,
    pub context_id: u16,
    pub opnum: u16,
    /// Object UUID from the request header; the IPID for DCOM calls
    pub object: Option<Uuid>,
    /// Abstract syntax bound to `context_id`
    pub interface: SyntaxId,
    /// Byte order of the request's stub data
    pub ndr: NdrContext,
}

/// Boxed future returned by handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>;

/// Operation handler function type
pub type OperationHandler = Arc<dyn Fn(CallContext, Bytes) -> HandlerFuture + Send + Sync>;

/// Interface definition: per-opnum handlers, or one handler for every opnum
pub struct Interface {
    pub syntax: SyntaxId,
    operations: HashMap<u16, OperationHandler>,
    dispatch: Option<OperationHandler>,
}

impl Interface {
    pub fn new(uuid: Uuid, major_version: u16, minor_version: u16) -> Self {
        Self::from_syntax(SyntaxId::new(uuid, major_version, minor_version))
    }

    pub fn from_syntax(syntax: SyntaxId) -> Self {
        Self {
            syntax,
            operations: HashMap::new(),
            dispatch: None,
        }
    }

    /// Register an operation handler
    pub fn register_operation<F, Fut>(&mut self, opnum: u16, handler: F)
    where
        F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.operations
            .insert(opnum, Arc::new(move |call, args| Box::pin(handler(call, args))));
    }

    /// Route every opnum to one handler. Per-opnum handlers are ignored
    /// once this is set.
    pub fn set_dispatch<F, Fut>(&mut self, handler: F)
    where
        F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.dispatch = Some(Arc::new(move |call, args| Box::pin(handler(call, args))));
    }

    /// Handler serving `opnum`
    pub fn get_operation(&self, opnum: u16) -> Option<&OperationHandler> {
        self.dispatch
            .as_ref()
            .or_else(|| self.operations.get(&opnum))
    }
}

/// DCE RPC Server configuration
#[derive(Debug, Clone)]
pub struct DceRpcServerConfig {
    pub max_pdu_size: usize,
    pub max_connections: usize,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
}

impl Default for DceRpcServerConfig {
    fn default() -> Self {
        Self {
            max_pdu_size: 65535,
            max_connections: 10000,
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
        }
    }
}

/// Server statistics
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub requests_received: AtomicU64,
    pub requests_processed: AtomicU64,
    pub requests_failed: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of server statistics
#[derive(Debug, Clone)]
pub struct ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub requests_received: u64,
    pub requests_processed: u64,
    pub requests_failed: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

type InterfaceTable = Arc<RwLock<HashMap<Uuid, Interface>>>;

/// Fault status reported for a failed call
pub fn fault_status_for(err: &RpcError) -> u32 {
    match err {
        RpcError::Fault(status) => *status,
        RpcError::Ndr(midl_ndr::NdrError::AllocationLimitExceeded { .. }) => {
            fault::NCA_REMOTE_NO_MEMORY
        }
        RpcError::Ndr(_) => fault::RPC_S_FAULT_NDR,
        RpcError::OperationUnavailable(_) => fault::NCA_OP_RNG_ERROR,
        RpcError::InterfaceNotFound(_) => fault::NCA_UNK_IF,
        RpcError::ContextMismatch => fault::NCA_CONTEXT_MISMATCH,
        RpcError::PduTooLarge { .. } => fault::NCA_REMOTE_NO_MEMORY,
        _ => fault::NCA_PROTO_ERROR,
    }
}

/// DCE RPC Server
///
/// Interfaces are shared via `Arc<RwLock>`; the lock is released before a
/// handler runs.
pub struct DceRpcServer {
    interfaces: InterfaceTable,
    config: DceRpcServerConfig,
    assoc_group_counter: AtomicU32,
    stats: Arc<ServerStats>,
}

impl DceRpcServer {
    pub fn new() -> Self {
        Self::with_config(DceRpcServerConfig::default())
    }

    pub fn with_config(config: DceRpcServerConfig) -> Self {
        Self {
            interfaces: Arc::new(RwLock::new(HashMap::new())),
            config,
            assoc_group_counter: AtomicU32::new(1),
            stats: Arc::new(ServerStats::default()),
        }
    }

    pub fn config(&self) -> &DceRpcServerConfig {
        &self.config
    }

    /// Get server statistics
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Register an interface with the server
    pub async fn register_interface(&self, interface: Interface) {
        let mut interfaces = self.interfaces.write().await;
        info!(
            "Registering interface: {} version {}.{}",
            interface.syntax.uuid,
            interface.syntax.major_version(),
            interface.syntax.minor_version()
        );
        interfaces.insert(interface.syntax.uuid, interface);
    }

    /// Bind `addr` and serve forever
    pub async fn run(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_until(listener, std::future::pending()).await
    }

    /// Bind `addr` and serve until `shutdown` resolves
    pub async fn run_until<F: Future<Output = ()>>(
        &self,
        addr: SocketAddr,
        shutdown: F,
    ) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until `shutdown`
    /// resolves, then wait for open connections to finish.
    pub async fn serve_until<F: Future<Output = ()>>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<()> {
        info!(
            "DCE RPC server listening on {} (max_connections: {})",
            listener.local_addr()?,
            self.config.max_connections
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Server shutting down gracefully");
                    let _ = semaphore.acquire_many(self.config.max_connections as u32).await;
                    info!("All connections closed");
                    return Ok(());
                }

                result = listener.accept() => {
                    let (stream, peer_addr) = result?;

                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                            warn!("Connection limit reached, rejecting connection from {}", peer_addr);
                            drop(stream);
                            continue;
                        }
                    };

                    self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                    self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                    debug!("Accepted connection from {}", peer_addr);

                    let connection = self.connection();
                    let stats = Arc::clone(&self.stats);

                    tokio::spawn(async move {
                        let _permit = permit;
                        let result = connection.serve(stream).await;
                        stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                        match result {
                            Ok(()) | Err(RpcError::ConnectionClosed) => {
                                debug!("Connection closed from {}", peer_addr);
                            }
                            Err(e) => warn!("Connection error from {}: {}", peer_addr, e),
                        }
                    });
                }
            }
        }
    }

    /// Serve a single already established stream
    pub async fn serve_stream<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        match self.connection().serve(stream).await {
            Err(RpcError::ConnectionClosed) => Ok(()),
            other => other,
        }
    }

    fn connection(&self) -> Connection {
        Connection {
            interfaces: Arc::clone(&self.interfaces),
            config: self.config.clone(),
            assoc_group_id: self.assoc_group_counter.fetch_add(1, Ordering::SeqCst),
            stats: Arc::clone(&self.stats),
            contexts: HashMap::new(),
            max_xmit_frag: self.config.max_xmit_frag,
            assembler: None,
        }
    }
}

impl Default for DceRpcServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection state
struct Connection {
    interfaces: InterfaceTable,
    config: DceRpcServerConfig,
    assoc_group_id: u32,
    stats: Arc<ServerStats>,
    /// Negotiated presentation contexts: context id to abstract syntax
    contexts: HashMap<u16, SyntaxId>,
    /// Largest fragment we may send to this client
    max_xmit_frag: u16,
    assembler: Option<FragmentAssembler>,
}

impl Connection {
    async fn serve<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut read_transport =
            DceRpcTransport::new(reader).with_max_pdu_size(self.config.max_pdu_size);
        let mut write_transport = DceRpcTransport::new(writer);

        loop {
            let data = read_transport.read_pdu().await?;
            self.stats
                .bytes_received
                .fetch_add(data.len() as u64, Ordering::Relaxed);

            let replies = match Pdu::decode(&data)? {
                Pdu::Bind(bind) => vec![self.process_bind(&bind).await?],
                Pdu::AlterContext(alter) => vec![self.process_alter_context(&alter).await?],
                Pdu::Request(request) => self.process_request(request).await?,
                Pdu::Fault(f) => {
                    warn!(
                        "Received fault from client: 0x{:08x} ({})",
                        f.status,
                        fault::name(f.status)
                    );
                    Vec::new()
                }
                other => {
                    warn!(
                        "Received unexpected {:?} PDU, call_id={}",
                        other.header().packet_type,
                        other.call_id()
                    );
                    Vec::new()
                }
            };

            for encoded in replies {
                self.stats
                    .bytes_sent
                    .fetch_add(encoded.len() as u64, Ordering::Relaxed);
                write_transport.write_pdu(&encoded).await?;
            }
        }
    }

    /// Accept or reject each proposed context
    async fn negotiate(&mut self, bind: &BindPdu) -> Vec<ContextResultEntry> {
        let interfaces = self.interfaces.read().await;
        let ndr = SyntaxId::ndr20();

        bind.context_list
            .iter()
            .map(|element| {
                let abstract_syntax = element.abstract_syntax;
                let registered = interfaces
                    .get(&abstract_syntax.uuid)
                    .map(|iface| iface.syntax.major_version() == abstract_syntax.major_version())
                    .unwrap_or(false);
                if !registered {
                    debug!("Rejecting context {}: {} not registered", element.context_id, abstract_syntax);
                    return ContextResultEntry::rejected(ProviderReason::AbstractSyntaxNotSupported);
                }
                if !element.transfer_syntaxes.iter().any(|ts| *ts == ndr) {
                    debug!("Rejecting context {}: NDR20 not offered", element.context_id);
                    return ContextResultEntry::rejected(
                        ProviderReason::ProposedTransferSyntaxesNotSupported,
                    );
                }
                self.contexts.insert(element.context_id, abstract_syntax);
                ContextResultEntry::accepted()
            })
            .collect()
    }

    async fn process_bind(&mut self, bind: &BindPdu) -> Result<Bytes> {
        let call_id = bind.header.call_id;
        debug!(
            "Received bind: call_id={}, contexts={}",
            call_id,
            bind.context_list.len()
        );

        if bind.header.version_minor > 1 {
            let mut nak = BindNakPdu::new(
                call_id,
                crate::dcerpc::reject_reason::PROTOCOL_VERSION_NOT_SUPPORTED,
            );
            nak.versions = vec![(crate::dcerpc::DCE_RPC_VERSION, DCE_RPC_VERSION_MINOR)];
            return nak.encode();
        }

        if bind.max_recv_frag < MIN_FRAG {
            warn!(
                "Rejecting bind {}: max_recv_frag {} below {}",
                call_id, bind.max_recv_frag, MIN_FRAG
            );
            let nak = BindNakPdu::new(
                call_id,
                crate::dcerpc::reject_reason::LOCAL_LIMIT_EXCEEDED,
            );
            return nak.encode();
        }

        let mut results = self.negotiate(bind).await;
        if results.is_empty() {
            results.push(ContextResultEntry::rejected(ProviderReason::NotSpecified));
        }

        let mut ack = BindAckPdu::new(call_id, self.assoc_group_id, results);
        ack.max_xmit_frag = self.config.max_xmit_frag.min(bind.max_recv_frag);
        ack.max_recv_frag = self.config.max_recv_frag.min(bind.max_xmit_frag);
        ack.secondary_addr = String::from("135");
        self.max_xmit_frag = ack.max_xmit_frag;
        self.stats.requests_processed.fetch_add(1, Ordering::Relaxed);
        ack.encode()
    }

    async fn process_alter_context(&mut self, alter: &BindPdu) -> Result<Bytes> {
        debug!(
            "Received alter_context: call_id={}, contexts={}",
            alter.header.call_id,
            alter.context_list.len()
        );
        let results = self.negotiate(alter).await;
        let mut resp =
            BindAckPdu::alter_context_resp(alter.header.call_id, self.assoc_group_id, results);
        resp.max_xmit_frag = self.max_xmit_frag;
        resp.max_recv_frag = self.config.max_recv_frag;
        resp.encode()
    }

    /// Feed one request fragment; a complete call yields its reply PDUs
    async fn process_request(&mut self, request: RequestPdu) -> Result<Vec<Bytes>> {
        let call_id = request.header.call_id;
        let flags = request.header.packet_flags;

        let stub = if flags.is_first_frag() && flags.is_last_frag() {
            self.assembler = None;
            request.stub_data.clone()
        } else {
            if flags.is_first_frag() {
                self.assembler = Some(
                    FragmentAssembler::new(call_id).with_max_size(self.config.max_pdu_size * 256),
                );
            }
            let added = match self.assembler.as_mut() {
                Some(assembler) => assembler.add_fragment(
                    &request.header,
                    &request.stub_data,
                    request.context_id,
                    Some(request.opnum),
                    request.alloc_hint,
                ),
                None => Err(RpcError::FragmentOutOfOrder),
            };
            match added {
                Ok(Some(stub)) => {
                    self.assembler = None;
                    stub
                }
                Ok(None) => return Ok(Vec::new()),
                Err(e) => {
                    warn!("Dropping fragmented call {}: {}", call_id, e);
                    self.assembler = None;
                    self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                    let status = fault_status_for(&e);
                    return Ok(vec![FaultPdu::new(call_id, request.context_id, status).encode()?]);
                }
            }
        };

        self.stats.requests_received.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Received request: call_id={}, ctx={}, opnum={}, stub_len={}",
            call_id,
            request.context_id,
            request.opnum,
            stub.len()
        );

        match self.dispatch(&request, stub).await {
            Ok(result) => {
                self.stats.requests_processed.fetch_add(1, Ordering::Relaxed);
                let mut response = ResponsePdu::new(call_id, result);
                response.context_id = request.context_id;
                FragmentGenerator::fragment_response(&response, self.max_xmit_frag)?
                    .iter()
                    .map(ResponsePdu::encode)
                    .collect()
            }
            Err(e) => {
                let status = fault_status_for(&e);
                error!(
                    "Call {} opnum {} failed: {} (fault 0x{:08x} {})",
                    call_id,
                    request.opnum,
                    e,
                    status,
                    fault::name(status)
                );
                self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                Ok(vec![FaultPdu::new(call_id, request.context_id, status).encode()?])
            }
        }
    }

    async fn dispatch(&self, request: &RequestPdu, stub: Bytes) -> Result<Bytes> {
        let interface = *self
            .contexts
            .get(&request.context_id)
            .ok_or(RpcError::ContextMismatch)?;

        let handler = {
            let interfaces = self.interfaces.read().await;
            let iface = interfaces
                .get(&interface.uuid)
                .ok_or_else(|| RpcError::InterfaceNotFound(interface.to_string()))?;
            Arc::clone(
                iface
                    .get_operation(request.opnum)
                    .ok_or(RpcError::OperationUnavailable(request.opnum))?,
            )
        };

        let call = CallContext {
            call_id: request.header.call_id,
            context_id: request.context_id,
            opnum: request.opnum,
            object: request.object_uuid,
            interface,
            ndr: request.header.data_rep.ndr_context(),
        };
        handler(call, stub).await
    }
}

/// Builder for creating DCE RPC interfaces with a fluent API
pub struct InterfaceBuilder {
    interface: Interface,
}

impl InterfaceBuilder {
    pub fn new(uuid: &str, major_version: u16, minor_version: u16) -> Result<Self> {
        let uuid = Uuid::parse(uuid)?;
        Ok(Self {
            interface: Interface::new(uuid, major_version, minor_version),
        })
    }

    pub fn from_syntax(syntax: SyntaxId) -> Self {
        Self {
            interface: Interface::from_syntax(syntax),
        }
    }

    pub fn operation<F, Fut>(mut self, opnum: u16, handler: F) -> Self
    where
        F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.interface.register_operation(opnum, handler);
        self
    }

    pub fn dispatch<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.interface.set_dispatch(handler);
        self
    }

    pub fn build(self) -> Interface {
        self.interface
    }
}
