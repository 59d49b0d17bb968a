//! InitShutdown (MS-RSP 3.1.4)
//!
//! Remote system shutdown. A plain RPC interface: no ORPC headers, the
//! methods return a Win32 error code.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dcerpc::operation::{decode_request, encode_response};
use dcerpc::{DceRpcClient, Interface, InterfaceBuilder, Operation, RpcError, SyntaxId, Uuid};
use dcom::{check_win32, Result};
use midl_ndr::{NdrContext, NdrDecode, NdrEncode, NdrReader, NdrWString, NdrWriter};

use crate::client::InterfaceClient;

pub const SYNTAX_UUID: Uuid = Uuid::from_u128(0x894de0c0_0d55_11d3_a322_00c04fa321a1);
pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;

pub fn syntax() -> SyntaxId {
    SyntaxId::new(SYNTAX_UUID, MAJOR_VERSION, MINOR_VERSION)
}

pub mod opnum {
    pub const BASE_INITIATE_SHUTDOWN: u16 = 0;
    pub const BASE_ABORT_SHUTDOWN: u16 = 1;
    pub const BASE_INITIATE_SHUTDOWN_EX: u16 = 2;
}

/// Win32 codes the interface reports
pub mod win32 {
    pub const ERROR_SUCCESS: u32 = 0;
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_SHUTDOWN_IN_PROGRESS: u32 = 1115;
    pub const ERROR_NO_SHUTDOWN_IN_PROGRESS: u32 = 1116;
}

/// REG_UNICODE_STRING: counted UTF-16 without a terminator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegUnicodeString {
    /// Bytes in use
    pub length: u16,
    /// Bytes allocated
    pub maximum_length: u16,
    pub buffer: Option<Vec<u16>>,
}

impl RegUnicodeString {
    pub fn new(s: &str) -> Self {
        let units: Vec<u16> = s.encode_utf16().collect();
        let length = (units.len() * 2).min(u16::MAX as usize & !1) as u16;
        Self {
            length,
            maximum_length: length,
            buffer: Some(units),
        }
    }

    /// The `length` bytes in use, decoded lossily
    pub fn value(&self) -> String {
        match &self.buffer {
            Some(units) => {
                let used = (self.length as usize / 2).min(units.len());
                String::from_utf16_lossy(&units[..used])
            }
            None => String::new(),
        }
    }
}

impl NdrEncode for RegUnicodeString {
    fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.align(4);
        w.write_u16(self.length);
        w.write_u16(self.maximum_length);
        w.write_pointer(self.buffer.is_some())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        match &self.buffer {
            Some(units) => w.write_conformant_varying(
                units,
                self.maximum_length as usize / 2,
                self.length as usize / 2,
            ),
            None => Ok(()),
        }
    }
}

impl NdrDecode for RegUnicodeString {
    fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
        r.align(4)?;
        let length = r.read_u16()?;
        let maximum_length = r.read_u16()?;
        let buffer = r.read_pointer()?.then(Vec::new);
        Ok(Self {
            length,
            maximum_length,
            buffer,
        })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        if let Some(buffer) = self.buffer.as_mut() {
            let (units, _) = r.read_conformant_varying::<u16>("Buffer")?;
            *buffer = units;
        }
        Ok(())
    }
}

fn write_server_name(w: &mut NdrWriter, name: &Option<String>) -> midl_ndr::Result<()> {
    let name = name.as_deref().map(NdrWString::new);
    w.write_unique(name.as_ref())
}

fn read_server_name(r: &mut NdrReader) -> midl_ndr::Result<Option<String>> {
    Ok(r.read_unique::<NdrWString>()?.map(NdrWString::into_string))
}

/// Response of every InitShutdown method
#[derive(Clone, Debug, Default)]
pub struct ShutdownResponse {
    pub return_value: u32,
}

// BaseInitiateShutdown

#[derive(Clone, Debug, Default)]
pub struct BaseInitiateShutdownRequest {
    pub server_name: Option<String>,
    /// Shown to interactive users during the countdown
    pub message: Option<RegUnicodeString>,
    /// Seconds before the shutdown starts
    pub timeout: u32,
    pub force_apps_closed: u8,
    pub reboot_after_shutdown: u8,
}

impl BaseInitiateShutdownRequest {
    fn to_op(self, op: &mut BaseInitiateShutdownOperation) {
        op.server_name = self.server_name;
        op.message = self.message;
        op.timeout = self.timeout;
        op.force_apps_closed = self.force_apps_closed;
        op.reboot_after_shutdown = self.reboot_after_shutdown;
    }

    fn from_op(op: &mut BaseInitiateShutdownOperation) -> Self {
        Self {
            server_name: op.server_name.take(),
            message: op.message.take(),
            timeout: op.timeout,
            force_apps_closed: op.force_apps_closed,
            reboot_after_shutdown: op.reboot_after_shutdown,
        }
    }
}

pub type BaseInitiateShutdownResponse = ShutdownResponse;

#[derive(Debug, Default)]
struct BaseInitiateShutdownOperation {
    server_name: Option<String>,
    message: Option<RegUnicodeString>,
    timeout: u32,
    force_apps_closed: u8,
    reboot_after_shutdown: u8,
    return_value: u32,
}

impl Operation for BaseInitiateShutdownOperation {
    const OPNUM: u16 = opnum::BASE_INITIATE_SHUTDOWN;
    const NAME: &'static str = "/InitShutdown/v1/BaseInitiateShutdown";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        write_server_name(w, &self.server_name)?;
        w.write_unique(self.message.as_ref())?;
        w.write_u32(self.timeout);
        w.write_u8(self.force_apps_closed);
        w.write_u8(self.reboot_after_shutdown);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.server_name = read_server_name(r)?;
        self.message = r.read_unique()?;
        self.timeout = r.read_u32()?;
        self.force_apps_closed = r.read_u8()?;
        self.reboot_after_shutdown = r.read_u8()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_u32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.return_value = r.read_u32()?;
        Ok(())
    }
}

// BaseAbortShutdown

#[derive(Clone, Debug, Default)]
pub struct BaseAbortShutdownRequest {
    pub server_name: Option<String>,
}

pub type BaseAbortShutdownResponse = ShutdownResponse;

#[derive(Debug, Default)]
struct BaseAbortShutdownOperation {
    server_name: Option<String>,
    return_value: u32,
}

impl BaseAbortShutdownRequest {
    fn to_op(self, op: &mut BaseAbortShutdownOperation) {
        op.server_name = self.server_name;
    }

    fn from_op(op: &mut BaseAbortShutdownOperation) -> Self {
        Self {
            server_name: op.server_name.take(),
        }
    }
}

impl Operation for BaseAbortShutdownOperation {
    const OPNUM: u16 = opnum::BASE_ABORT_SHUTDOWN;
    const NAME: &'static str = "/InitShutdown/v1/BaseAbortShutdown";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        write_server_name(w, &self.server_name)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.server_name = read_server_name(r)?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_u32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.return_value = r.read_u32()?;
        Ok(())
    }
}

// BaseInitiateShutdownEx

#[derive(Clone, Debug, Default)]
pub struct BaseInitiateShutdownExRequest {
    pub server_name: Option<String>,
    pub message: Option<RegUnicodeString>,
    pub timeout: u32,
    pub force_apps_closed: u8,
    pub reboot_after_shutdown: u8,
    /// SHTDN_REASON_* code recorded in the event log
    pub reason: u32,
}

impl BaseInitiateShutdownExRequest {
    fn to_op(self, op: &mut BaseInitiateShutdownExOperation) {
        op.server_name = self.server_name;
        op.message = self.message;
        op.timeout = self.timeout;
        op.force_apps_closed = self.force_apps_closed;
        op.reboot_after_shutdown = self.reboot_after_shutdown;
        op.reason = self.reason;
    }

    fn from_op(op: &mut BaseInitiateShutdownExOperation) -> Self {
        Self {
            server_name: op.server_name.take(),
            message: op.message.take(),
            timeout: op.timeout,
            force_apps_closed: op.force_apps_closed,
            reboot_after_shutdown: op.reboot_after_shutdown,
            reason: op.reason,
        }
    }
}

pub type BaseInitiateShutdownExResponse = ShutdownResponse;

#[derive(Debug, Default)]
struct BaseInitiateShutdownExOperation {
    server_name: Option<String>,
    message: Option<RegUnicodeString>,
    timeout: u32,
    force_apps_closed: u8,
    reboot_after_shutdown: u8,
    reason: u32,
    return_value: u32,
}

impl Operation for BaseInitiateShutdownExOperation {
    const OPNUM: u16 = opnum::BASE_INITIATE_SHUTDOWN_EX;
    const NAME: &'static str = "/InitShutdown/v1/BaseInitiateShutdownEx";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        write_server_name(w, &self.server_name)?;
        w.write_unique(self.message.as_ref())?;
        w.write_u32(self.timeout);
        w.write_u8(self.force_apps_closed);
        w.write_u8(self.reboot_after_shutdown);
        w.write_u32(self.reason);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.server_name = read_server_name(r)?;
        self.message = r.read_unique()?;
        self.timeout = r.read_u32()?;
        self.force_apps_closed = r.read_u8()?;
        self.reboot_after_shutdown = r.read_u8()?;
        self.reason = r.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_u32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.return_value = r.read_u32()?;
        Ok(())
    }
}

// Client

#[async_trait]
pub trait InitShutdownClient: Send + Sync {
    async fn base_initiate_shutdown(
        &self,
        req: BaseInitiateShutdownRequest,
    ) -> Result<BaseInitiateShutdownResponse>;

    async fn base_abort_shutdown(
        &self,
        req: BaseAbortShutdownRequest,
    ) -> Result<BaseAbortShutdownResponse>;

    async fn base_initiate_shutdown_ex(
        &self,
        req: BaseInitiateShutdownExRequest,
    ) -> Result<BaseInitiateShutdownExResponse>;

    fn conn(&self) -> &InterfaceClient;
}

#[derive(Clone, Debug)]
pub struct DefaultInitShutdownClient {
    cc: InterfaceClient,
}

impl DefaultInitShutdownClient {
    pub async fn new(conn: Arc<DceRpcClient>) -> Result<Self> {
        Ok(Self {
            cc: InterfaceClient::bind(conn, syntax()).await?,
        })
    }
}

#[async_trait]
impl InitShutdownClient for DefaultInitShutdownClient {
    async fn base_initiate_shutdown(
        &self,
        req: BaseInitiateShutdownRequest,
    ) -> Result<BaseInitiateShutdownResponse> {
        let mut op = BaseInitiateShutdownOperation::default();
        req.to_op(&mut op);
        self.cc.invoke(&mut op).await?;
        check_win32(BaseInitiateShutdownOperation::NAME, op.return_value)?;
        Ok(ShutdownResponse {
            return_value: op.return_value,
        })
    }

    async fn base_abort_shutdown(
        &self,
        req: BaseAbortShutdownRequest,
    ) -> Result<BaseAbortShutdownResponse> {
        let mut op = BaseAbortShutdownOperation::default();
        req.to_op(&mut op);
        self.cc.invoke(&mut op).await?;
        check_win32(BaseAbortShutdownOperation::NAME, op.return_value)?;
        Ok(ShutdownResponse {
            return_value: op.return_value,
        })
    }

    async fn base_initiate_shutdown_ex(
        &self,
        req: BaseInitiateShutdownExRequest,
    ) -> Result<BaseInitiateShutdownExResponse> {
        let mut op = BaseInitiateShutdownExOperation::default();
        req.to_op(&mut op);
        self.cc.invoke(&mut op).await?;
        check_win32(BaseInitiateShutdownExOperation::NAME, op.return_value)?;
        Ok(ShutdownResponse {
            return_value: op.return_value,
        })
    }

    fn conn(&self) -> &InterfaceClient {
        &self.cc
    }
}

// Server

#[async_trait]
pub trait InitShutdownServer: Send + Sync {
    async fn base_initiate_shutdown(
        &self,
        req: BaseInitiateShutdownRequest,
    ) -> Result<BaseInitiateShutdownResponse>;

    async fn base_abort_shutdown(
        &self,
        req: BaseAbortShutdownRequest,
    ) -> Result<BaseAbortShutdownResponse>;

    async fn base_initiate_shutdown_ex(
        &self,
        req: BaseInitiateShutdownExRequest,
    ) -> Result<BaseInitiateShutdownExResponse>;
}

pub async fn init_shutdown_dispatch<S: InitShutdownServer + ?Sized>(
    server: &S,
    opnum: u16,
    stub: Bytes,
    ndr: NdrContext,
) -> dcerpc::Result<Bytes> {
    match opnum {
        opnum::BASE_INITIATE_SHUTDOWN => {
            let mut op: BaseInitiateShutdownOperation = decode_request(stub, ndr)?;
            let req = BaseInitiateShutdownRequest::from_op(&mut op);
            op.return_value = server.base_initiate_shutdown(req).await?.return_value;
            encode_response(&op, NdrContext::new())
        }
        opnum::BASE_ABORT_SHUTDOWN => {
            let mut op: BaseAbortShutdownOperation = decode_request(stub, ndr)?;
            let req = BaseAbortShutdownRequest::from_op(&mut op);
            op.return_value = server.base_abort_shutdown(req).await?.return_value;
            encode_response(&op, NdrContext::new())
        }
        opnum::BASE_INITIATE_SHUTDOWN_EX => {
            let mut op: BaseInitiateShutdownExOperation = decode_request(stub, ndr)?;
            let req = BaseInitiateShutdownExRequest::from_op(&mut op);
            op.return_value = server.base_initiate_shutdown_ex(req).await?.return_value;
            encode_response(&op, NdrContext::new())
        }
        _ => Err(RpcError::OperationUnavailable(opnum)),
    }
}

/// Interface to register on a `DceRpcServer`
pub fn new_init_shutdown_interface<S: InitShutdownServer + ?Sized + 'static>(
    server: Arc<S>,
) -> Interface {
    InterfaceBuilder::from_syntax(syntax())
        .dispatch(move |call, stub| {
            let server = Arc::clone(&server);
            async move { init_shutdown_dispatch(server.as_ref(), call.opnum, stub, call.ndr).await }
        })
        .build()
}
