//! ICatalogSession (MS-COMA 3.1.4.5)
//!
//! Negotiates the catalog version of a COM+ administration session and
//! reports server capabilities. Extends IDispatch.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dcerpc::operation::{decode_request, encode_response};
use dcerpc::{DceRpcClient, Operation, RpcError, SyntaxId, Uuid};
use dcom::idispatch::{self, DefaultDispatchClient, DispatchClient, DispatchServer};
use dcom::{check_hresult, iid, Iid, InterfaceStub, Ipid, ObjectClient, OrpcThat, OrpcThis, Result};
use midl_ndr::{NdrContext, NdrReader, NdrWriter};

pub const SYNTAX_UUID: Uuid = Uuid::from_u128(0x182c40fa_32e4_11d0_818b_00a0c9231c29);
pub const MAJOR_VERSION: u16 = 0;
pub const MINOR_VERSION: u16 = 0;

pub const IID: Iid = Iid::from_u128(0x182c40fa_32e4_11d0_818b_00a0c9231c29);

pub fn syntax() -> SyntaxId {
    SyntaxId::new(SYNTAX_UUID, MAJOR_VERSION, MINOR_VERSION)
}

pub mod opnum {
    pub const INITIALIZE_SESSION: u16 = 7;
    pub const GET_SERVER_INFORMATION: u16 = 8;
}

/// Catalog versions (MS-COMA 1.7)
pub mod catalog_version {
    pub const V3_00: f32 = 3.00;
    pub const V4_00: f32 = 4.00;
    pub const V5_00: f32 = 5.00;
}

// InitializeSession

#[derive(Clone, Debug, Default)]
pub struct InitializeSessionRequest {
    pub this: Option<OrpcThis>,
    /// Lowest catalog version the client supports
    pub ver_lower: f32,
    /// Highest catalog version the client supports
    pub ver_upper: f32,
    pub reserved: i32,
}

impl InitializeSessionRequest {
    fn to_op(self, op: &mut InitializeSessionOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.ver_lower = self.ver_lower;
        op.ver_upper = self.ver_upper;
        op.reserved = self.reserved;
    }

    fn from_op(op: &mut InitializeSessionOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            ver_lower: op.ver_lower,
            ver_upper: op.ver_upper,
            reserved: op.reserved,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct InitializeSessionResponse {
    pub that: Option<OrpcThat>,
    /// Negotiated catalog version
    pub ver_session: f32,
    pub return_value: i32,
}

impl InitializeSessionResponse {
    fn to_op(self, op: &mut InitializeSessionOperation) {
        op.that = self.that.unwrap_or_default();
        op.ver_session = self.ver_session;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut InitializeSessionOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            ver_session: op.ver_session,
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct InitializeSessionOperation {
    this: OrpcThis,
    that: OrpcThat,
    ver_lower: f32,
    ver_upper: f32,
    reserved: i32,
    ver_session: f32,
    return_value: i32,
}

impl Operation for InitializeSessionOperation {
    const OPNUM: u16 = opnum::INITIALIZE_SESSION;
    const NAME: &'static str = "/ICatalogSession/v0/InitializeSession";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        w.write_f32(self.ver_lower);
        w.write_f32(self.ver_upper);
        w.write_i32(self.reserved);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.ver_lower = r.read_f32()?;
        self.ver_upper = r.read_f32()?;
        self.reserved = r.read_i32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_f32(self.ver_session);
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.ver_session = r.read_f32()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// GetServerInformation

#[derive(Clone, Debug, Default)]
pub struct GetServerInformationRequest {
    pub this: Option<OrpcThis>,
}

impl GetServerInformationRequest {
    fn to_op(self, op: &mut GetServerInformationOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
    }

    fn from_op(op: &mut GetServerInformationOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GetServerInformationResponse {
    pub that: Option<OrpcThat>,
    pub reserved1: i32,
    pub reserved2: i32,
    pub reserved3: i32,
    /// 1: no partitions, 2: multiple partitions, 3: limited
    pub multiple_partition_support: i32,
    pub reserved4: i32,
    pub reserved5: i32,
    pub return_value: i32,
}

impl GetServerInformationResponse {
    fn to_op(self, op: &mut GetServerInformationOperation) {
        op.that = self.that.unwrap_or_default();
        op.reserved = [
            self.reserved1,
            self.reserved2,
            self.reserved3,
            self.multiple_partition_support,
            self.reserved4,
            self.reserved5,
        ];
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut GetServerInformationOperation) -> Self {
        let [reserved1, reserved2, reserved3, multiple_partition_support, reserved4, reserved5] =
            op.reserved;
        Self {
            that: Some(std::mem::take(&mut op.that)),
            reserved1,
            reserved2,
            reserved3,
            multiple_partition_support,
            reserved4,
            reserved5,
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct GetServerInformationOperation {
    this: OrpcThis,
    that: OrpcThat,
    /// Out-parameters in wire order
    reserved: [i32; 6],
    return_value: i32,
}

impl Operation for GetServerInformationOperation {
    const OPNUM: u16 = opnum::GET_SERVER_INFORMATION;
    const NAME: &'static str = "/ICatalogSession/v0/GetServerInformation";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        for value in self.reserved {
            w.write_i32(value);
        }
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        for value in self.reserved.iter_mut() {
            *value = r.read_i32()?;
        }
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// Client

#[async_trait]
pub trait CatalogSessionClient: Send + Sync {
    fn dispatch(&self) -> &dyn DispatchClient;

    async fn initialize_session(
        &self,
        req: InitializeSessionRequest,
    ) -> Result<InitializeSessionResponse>;

    async fn get_server_information(
        &self,
        req: GetServerInformationRequest,
    ) -> Result<GetServerInformationResponse>;

    fn conn(&self) -> &ObjectClient;

    async fn alter_context(&self, syntax: SyntaxId) -> Result<ObjectClient> {
        self.conn().alter_context(syntax).await
    }

    fn ipid(&self, ipid: Ipid) -> Self
    where
        Self: Sized;
}

#[derive(Clone, Debug)]
pub struct DefaultCatalogSessionClient {
    base: DefaultDispatchClient,
    obj: ObjectClient,
}

impl DefaultCatalogSessionClient {
    pub async fn new(conn: Arc<DceRpcClient>) -> Result<Self> {
        Ok(Self::from_object(ObjectClient::bind(conn, syntax()).await?))
    }

    pub fn from_object(obj: ObjectClient) -> Self {
        Self {
            base: DefaultDispatchClient::from_object(obj.clone()),
            obj,
        }
    }
}

#[async_trait]
impl CatalogSessionClient for DefaultCatalogSessionClient {
    fn dispatch(&self) -> &dyn DispatchClient {
        &self.base
    }

    async fn initialize_session(
        &self,
        req: InitializeSessionRequest,
    ) -> Result<InitializeSessionResponse> {
        let mut op = InitializeSessionOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = InitializeSessionResponse::from_op(&mut op);
        check_hresult(InitializeSessionOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn get_server_information(
        &self,
        req: GetServerInformationRequest,
    ) -> Result<GetServerInformationResponse> {
        let mut op = GetServerInformationOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = GetServerInformationResponse::from_op(&mut op);
        check_hresult(GetServerInformationOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    fn conn(&self) -> &ObjectClient {
        &self.obj
    }

    fn ipid(&self, ipid: Ipid) -> Self {
        Self::from_object(self.obj.with_ipid(ipid))
    }
}

// Server

#[async_trait]
pub trait CatalogSessionServer: DispatchServer {
    async fn initialize_session(
        &self,
        req: InitializeSessionRequest,
    ) -> Result<InitializeSessionResponse>;

    async fn get_server_information(
        &self,
        req: GetServerInformationRequest,
    ) -> Result<GetServerInformationResponse>;
}

pub async fn catalog_session_dispatch<S: CatalogSessionServer + ?Sized>(
    server: &S,
    opnum: u16,
    stub: Bytes,
    ndr: NdrContext,
) -> dcerpc::Result<Bytes> {
    if opnum <= idispatch::opnum::LAST {
        return idispatch::dispatch_dispatch(server, opnum, stub, ndr).await;
    }
    match opnum {
        opnum::INITIALIZE_SESSION => {
            let mut op: InitializeSessionOperation = decode_request(stub, ndr)?;
            let req = InitializeSessionRequest::from_op(&mut op);
            server.initialize_session(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::GET_SERVER_INFORMATION => {
            let mut op: GetServerInformationOperation = decode_request(stub, ndr)?;
            let req = GetServerInformationRequest::from_op(&mut op);
            server.get_server_information(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        _ => Err(RpcError::OperationUnavailable(opnum)),
    }
}

pub fn new_catalog_session_stub<S: CatalogSessionServer + ?Sized + 'static>(
    server: Arc<S>,
) -> InterfaceStub {
    InterfaceStub::new(IID, move |call, stub| {
        let server = Arc::clone(&server);
        async move { catalog_session_dispatch(server.as_ref(), call.opnum, stub, call.ndr).await }
    })
    .extends(iid::IDISPATCH)
}
