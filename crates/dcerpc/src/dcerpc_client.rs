//! DCE RPC Client
//!
//! One connection carries any number of presentation contexts. The primary
//! context (id 0) is negotiated by `bind`; more are added with
//! `bind_context`, which sends an alter_context on the same connection.
//! Calls are serialized: a call holds the connection from its first request
//! fragment until the last response fragment arrives. A call that times out
//! after its request went out leaves the connection unusable; every later
//! call fails with `ConnectionClosed`.

use crate::dcerpc::{
    fault, BindPdu, Pdu, RequestPdu, SyntaxId, Uuid, DEFAULT_MAX_FRAG,
};
use crate::dcerpc_transport::{DceRpcTransport, DEFAULT_MAX_PDU_SIZE};
use crate::error::{Result, RpcError};
use crate::fragmentation::{FragmentAssembler, FragmentGenerator};
use crate::operation::{self, Operation};
use bytes::Bytes;
use midl_ndr::NdrContext;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Channel {
    read: DceRpcTransport<BoxedReader>,
    write: DceRpcTransport<BoxedWriter>,
}

/// Values settled by bind and alter_context
#[derive(Debug)]
struct Negotiated {
    bound: bool,
    max_xmit_frag: u16,
    max_recv_frag: u16,
    assoc_group_id: u32,
    contexts: HashMap<u16, SyntaxId>,
    next_context_id: u16,
}

/// DCE RPC Client for making calls to a DCE RPC server
pub struct DceRpcClient {
    channel: Mutex<Channel>,
    state: parking_lot::Mutex<Negotiated>,
    call_id_counter: AtomicU32,
    interface: SyntaxId,
    timeout: Option<Duration>,
    /// Set once a reply can no longer be matched to its call
    broken: AtomicBool,
}

impl DceRpcClient {
    /// Connect to a DCE RPC server and bind to the specified interface
    pub async fn connect(addr: SocketAddr, interface: SyntaxId) -> Result<Self> {
        DceRpcClientBuilder::from_syntax(interface).connect(addr).await
    }

    /// Create an unbound client over an established stream
    pub fn from_stream<S>(stream: S, interface: SyntaxId) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_settings(
            stream,
            interface,
            None,
            DEFAULT_MAX_PDU_SIZE,
            DEFAULT_MAX_FRAG,
            DEFAULT_MAX_FRAG,
        )
    }

    fn with_settings<S>(
        stream: S,
        interface: SyntaxId,
        timeout: Option<Duration>,
        max_pdu_size: usize,
        max_xmit_frag: u16,
        max_recv_frag: u16,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);
        Self {
            channel: Mutex::new(Channel {
                read: DceRpcTransport::new(reader).with_max_pdu_size(max_pdu_size),
                write: DceRpcTransport::new(writer),
            }),
            state: parking_lot::Mutex::new(Negotiated {
                bound: false,
                max_xmit_frag,
                max_recv_frag,
                assoc_group_id: 0,
                contexts: HashMap::new(),
                next_context_id: 1,
            }),
            call_id_counter: AtomicU32::new(1),
            interface,
            timeout,
            broken: AtomicBool::new(false),
        }
    }

    fn next_call_id(&self) -> u32 {
        self.call_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Run one exchange under the configured timeout. `sent` is raised by
    /// `fut` once it starts writing; a timeout after that point breaks the
    /// connection.
    async fn with_timeout<T, F>(&self, sent: &AtomicBool, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.broken.load(Ordering::Acquire) {
            return Err(RpcError::ConnectionClosed);
        }
        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => {
                    if sent.load(Ordering::Acquire) {
                        warn!("Call timed out after {:?}; closing connection", timeout);
                        self.broken.store(true, Ordering::Release);
                    }
                    Err(RpcError::Timeout)
                }
            },
            None => fut.await,
        }
    }

    /// Perform the bind handshake for the primary context
    pub async fn bind(&self) -> Result<()> {
        let call_id = self.next_call_id();
        let mut bind = BindPdu::new(call_id, self.interface);
        {
            let state = self.state.lock();
            bind.max_xmit_frag = state.max_xmit_frag;
            bind.max_recv_frag = state.max_recv_frag;
        }

        debug!(
            "Sending bind request: call_id={}, interface={}",
            call_id, self.interface
        );

        let sent = AtomicBool::new(false);
        let pdu = self
            .with_timeout(&sent, async {
                let mut channel = self.channel.lock().await;
                sent.store(true, Ordering::Release);
                channel.write.write_pdu(&bind.encode()?).await?;
                channel.read.read_pdu_decoded().await
            })
            .await?;

        match pdu {
            Pdu::BindAck(ack) => {
                if ack.header.call_id != call_id {
                    return Err(RpcError::CallIdMismatch {
                        expected: call_id,
                        got: ack.header.call_id,
                    });
                }
                match ack.results.first() {
                    Some(result) if result.is_accepted() => {}
                    Some(result) => {
                        return Err(RpcError::BindFailed(format!(
                            "context rejected: {:?}",
                            result.reason
                        )))
                    }
                    None => return Err(RpcError::BindFailed("no bind result".to_string())),
                }

                let mut state = self.state.lock();
                // The server's receive size bounds what we send, and vice versa
                state.max_xmit_frag = ack.max_recv_frag;
                state.max_recv_frag = ack.max_xmit_frag;
                state.assoc_group_id = ack.assoc_group_id;
                state.contexts.insert(0, self.interface);
                state.bound = true;

                debug!(
                    "Bind successful: max_xmit={}, max_recv={}, assoc_group={}",
                    state.max_xmit_frag, state.max_recv_frag, state.assoc_group_id
                );
                Ok(())
            }
            Pdu::BindNak(nak) => Err(RpcError::BindFailed(format!(
                "bind_nak: reason {}",
                nak.reject_reason
            ))),
            Pdu::Fault(f) => Err(RpcError::Fault(f.status)),
            other => Err(RpcError::InvalidMessageType(other.header().packet_type as i32)),
        }
    }

    /// Negotiate an additional presentation context for `syntax` and return
    /// its id. A syntax already bound returns the existing id.
    pub async fn bind_context(&self, syntax: SyntaxId) -> Result<u16> {
        let context_id = {
            let mut state = self.state.lock();
            if !state.bound {
                return Err(RpcError::BindFailed("not bound".to_string()));
            }
            if let Some((&id, _)) = state.contexts.iter().find(|(_, s)| **s == syntax) {
                return Ok(id);
            }
            let id = state.next_context_id;
            state.next_context_id += 1;
            id
        };

        let call_id = self.next_call_id();
        let alter = BindPdu::alter_context(call_id, context_id, syntax);
        debug!(
            "Sending alter_context: call_id={}, context_id={}, interface={}",
            call_id, context_id, syntax
        );

        let sent = AtomicBool::new(false);
        let pdu = self
            .with_timeout(&sent, async {
                let mut channel = self.channel.lock().await;
                sent.store(true, Ordering::Release);
                channel.write.write_pdu(&alter.encode()?).await?;
                channel.read.read_pdu_decoded().await
            })
            .await?;

        match pdu {
            Pdu::AlterContextResp(resp) => {
                match resp.results.first() {
                    Some(result) if result.is_accepted() => {}
                    Some(result) => {
                        return Err(RpcError::BindFailed(format!(
                            "alter_context rejected {}: {:?}",
                            syntax, result.reason
                        )))
                    }
                    None => {
                        return Err(RpcError::BindFailed("no alter_context result".to_string()))
                    }
                }
                self.state.lock().contexts.insert(context_id, syntax);
                Ok(context_id)
            }
            Pdu::Fault(f) => Err(RpcError::Fault(f.status)),
            other => Err(RpcError::InvalidMessageType(other.header().packet_type as i32)),
        }
    }

    /// Call `opnum` on the primary context
    pub async fn call(&self, opnum: u16, stub_data: Bytes) -> Result<Bytes> {
        self.call_context(0, opnum, None, stub_data).await
    }

    /// Make an RPC call on a negotiated context.
    ///
    /// `object` travels as the request's object UUID. Requests larger than
    /// the negotiated fragment size are split; fragmented responses are
    /// reassembled.
    pub async fn call_context(
        &self,
        context_id: u16,
        opnum: u16,
        object: Option<Uuid>,
        stub_data: Bytes,
    ) -> Result<Bytes> {
        let (stub, _) = self.exchange(context_id, opnum, object, stub_data).await?;
        Ok(stub)
    }

    /// Marshal `op`'s request, perform the call and unmarshal the response
    /// into `op`
    pub async fn invoke<O: Operation>(
        &self,
        context_id: u16,
        object: Option<Uuid>,
        op: &mut O,
    ) -> Result<()> {
        let stub = operation::encode_request(op, NdrContext::new())?;
        trace!("Invoking {} ({} stub bytes)", O::NAME, stub.len());
        let (reply, ndr) = self.exchange(context_id, O::OPNUM, object, stub).await?;
        operation::decode_response(op, reply, ndr)
    }

    async fn exchange(
        &self,
        context_id: u16,
        opnum: u16,
        object: Option<Uuid>,
        stub_data: Bytes,
    ) -> Result<(Bytes, NdrContext)> {
        let max_xmit_frag = {
            let state = self.state.lock();
            if !state.bound {
                return Err(RpcError::BindFailed("not bound".to_string()));
            }
            if !state.contexts.contains_key(&context_id) {
                return Err(RpcError::ContextMismatch);
            }
            state.max_xmit_frag
        };

        let call_id = self.next_call_id();
        let mut request = RequestPdu::new(call_id, opnum, stub_data);
        request.context_id = context_id;
        request.object_uuid = object;

        let fragments = FragmentGenerator::fragment_request(&request, max_xmit_frag)?;
        debug!(
            "Sending request: call_id={}, ctx={}, opnum={}, stub_len={}, fragments={}",
            call_id,
            context_id,
            opnum,
            request.stub_data.len(),
            fragments.len()
        );

        let sent = AtomicBool::new(false);
        self.with_timeout(&sent, async {
            let mut channel = self.channel.lock().await;
            sent.store(true, Ordering::Release);
            for frag in &fragments {
                channel.write.write_pdu(&frag.encode()?).await?;
            }
            receive_response(&mut channel.read, call_id).await
        })
        .await
    }

    /// Call operation 0 (typically a null/ping operation)
    pub async fn null_call(&self) -> Result<()> {
        self.call(0, Bytes::new()).await?;
        Ok(())
    }

    /// Get the interface this client is bound to
    pub fn interface(&self) -> &SyntaxId {
        &self.interface
    }

    /// Check if the client is bound to the server
    pub fn is_bound(&self) -> bool {
        self.state.lock().bound
    }

    /// True once a timed-out call has left the connection unusable
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Largest fragment this client sends
    pub fn max_xmit_frag(&self) -> u16 {
        self.state.lock().max_xmit_frag
    }

    pub fn assoc_group_id(&self) -> u32 {
        self.state.lock().assoc_group_id
    }
}

/// Read response fragments for `call_id` until the last one arrives
async fn receive_response(
    read: &mut DceRpcTransport<BoxedReader>,
    call_id: u32,
) -> Result<(Bytes, NdrContext)> {
    let mut assembler: Option<FragmentAssembler> = None;

    loop {
        match read.read_pdu_decoded().await? {
            Pdu::Response(response) => {
                if response.header.call_id != call_id {
                    return Err(RpcError::CallIdMismatch {
                        expected: call_id,
                        got: response.header.call_id,
                    });
                }
                let ndr = response.header.data_rep.ndr_context();
                let flags = response.header.packet_flags;

                if flags.is_first_frag() && flags.is_last_frag() {
                    trace!("Call succeeded: {} bytes result", response.stub_data.len());
                    return Ok((response.stub_data, ndr));
                }

                let asm = assembler.get_or_insert_with(|| FragmentAssembler::new(call_id));
                if let Some(complete) = asm.add_fragment(
                    &response.header,
                    &response.stub_data,
                    response.context_id,
                    None,
                    response.alloc_hint,
                )? {
                    trace!("Reassembled response: {} bytes", complete.len());
                    return Ok((complete, ndr));
                }
            }
            Pdu::Fault(f) => {
                if f.header.call_id != call_id {
                    return Err(RpcError::CallIdMismatch {
                        expected: call_id,
                        got: f.header.call_id,
                    });
                }
                warn!(
                    "Call {} faulted: 0x{:08x} ({})",
                    call_id,
                    f.status,
                    fault::name(f.status)
                );
                return Err(RpcError::Fault(f.status));
            }
            other => {
                return Err(RpcError::InvalidMessageType(
                    other.header().packet_type as i32,
                ))
            }
        }
    }
}

/// Builder for DCE RPC clients
pub struct DceRpcClientBuilder {
    interface: SyntaxId,
    timeout: Option<Duration>,
    max_pdu_size: usize,
    max_xmit_frag: u16,
    max_recv_frag: u16,
}

impl DceRpcClientBuilder {
    /// Create a builder for the specified interface
    pub fn new(interface_uuid: Uuid, major_version: u16, minor_version: u16) -> Self {
        Self::from_syntax(SyntaxId::new(interface_uuid, major_version, minor_version))
    }

    /// Create a builder from a SyntaxId
    pub fn from_syntax(interface: SyntaxId) -> Self {
        Self {
            interface,
            timeout: None,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
        }
    }

    /// Bound connect, bind and every call by `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set maximum PDU size
    pub fn max_pdu_size(mut self, size: usize) -> Self {
        self.max_pdu_size = size;
        self
    }

    /// Fragment sizes proposed in the bind
    pub fn max_frag(mut self, xmit: u16, recv: u16) -> Self {
        self.max_xmit_frag = xmit;
        self.max_recv_frag = recv;
        self
    }

    /// Connect to the server and perform bind
    pub async fn connect(self, addr: SocketAddr) -> Result<DceRpcClient> {
        let stream = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| RpcError::Timeout)??,
            None => TcpStream::connect(addr).await?,
        };
        stream.set_nodelay(true)?;
        self.connect_stream(stream).await
    }

    /// Bind over an established stream
    pub async fn connect_stream<S>(self, stream: S) -> Result<DceRpcClient>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let client = DceRpcClient::with_settings(
            stream,
            self.interface,
            self.timeout,
            self.max_pdu_size,
            self.max_xmit_frag,
            self.max_recv_frag,
        );
        client.bind().await?;
        Ok(client)
    }
}
