//! IIisServiceControl (MS-IISS)
//!
//! Stops, starts, reboots and queries the IIS services of a host. The
//! interface extends IDispatch, so opnums 3..=6 reach the IDispatch
//! dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dcerpc::operation::{decode_request, encode_response};
use dcerpc::{DceRpcClient, Operation, RpcError, SyntaxId, Uuid};
use dcom::idispatch::{self, DefaultDispatchClient, DispatchClient, DispatchServer};
use dcom::{check_hresult, iid, Iid, InterfaceStub, Ipid, ObjectClient, OrpcThat, OrpcThis, Result};
use midl_ndr::{NdrContext, NdrError, NdrReader, NdrWriter, MAX_NDR_BYTE_ARRAY_LEN};

pub const SYNTAX_UUID: Uuid = Uuid::from_u128(0xe8fb8620_588f_11d2_9d61_00c04f79c5fe);
pub const MAJOR_VERSION: u16 = 0;
pub const MINOR_VERSION: u16 = 0;

/// Interface ID, same value as the syntax UUID
pub const IID: Iid = Iid::from_u128(0xe8fb8620_588f_11d2_9d61_00c04f79c5fe);

pub fn syntax() -> SyntaxId {
    SyntaxId::new(SYNTAX_UUID, MAJOR_VERSION, MINOR_VERSION)
}

pub mod opnum {
    pub const STOP: u16 = 7;
    pub const START: u16 = 8;
    pub const REBOOT: u16 = 9;
    pub const STATUS: u16 = 10;
    pub const KILL: u16 = 11;
}

/// Response of the methods that return nothing but the HRESULT
#[derive(Clone, Debug, Default)]
pub struct EmptyResponse {
    pub that: Option<OrpcThat>,
    pub return_value: i32,
}

// Stop

#[derive(Clone, Debug, Default)]
pub struct StopRequest {
    pub this: Option<OrpcThis>,
    pub timeout_msecs: u32,
    /// Non-zero terminates the services if they do not stop in time
    pub force: u32,
}

impl StopRequest {
    fn to_op(self, op: &mut StopOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.timeout_msecs = self.timeout_msecs;
        op.force = self.force;
    }

    fn from_op(op: &mut StopOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            timeout_msecs: op.timeout_msecs,
            force: op.force,
        }
    }
}

pub type StopResponse = EmptyResponse;

#[derive(Debug, Default)]
struct StopOperation {
    this: OrpcThis,
    that: OrpcThat,
    timeout_msecs: u32,
    force: u32,
    return_value: i32,
}

impl Operation for StopOperation {
    const OPNUM: u16 = opnum::STOP;
    const NAME: &'static str = "/IIisServiceControl/v0/Stop";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        w.write_u32(self.timeout_msecs);
        w.write_u32(self.force);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.timeout_msecs = r.read_u32()?;
        self.force = r.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// Start

#[derive(Clone, Debug, Default)]
pub struct StartRequest {
    pub this: Option<OrpcThis>,
    pub timeout_msecs: u32,
}

impl StartRequest {
    fn to_op(self, op: &mut StartOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.timeout_msecs = self.timeout_msecs;
    }

    fn from_op(op: &mut StartOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            timeout_msecs: op.timeout_msecs,
        }
    }
}

pub type StartResponse = EmptyResponse;

#[derive(Debug, Default)]
struct StartOperation {
    this: OrpcThis,
    that: OrpcThat,
    timeout_msecs: u32,
    return_value: i32,
}

impl Operation for StartOperation {
    const OPNUM: u16 = opnum::START;
    const NAME: &'static str = "/IIisServiceControl/v0/Start";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        w.write_u32(self.timeout_msecs);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.timeout_msecs = r.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// Reboot

#[derive(Clone, Debug, Default)]
pub struct RebootRequest {
    pub this: Option<OrpcThis>,
    pub timeout_msecs: u32,
    pub force_apps_closed: u32,
}

impl RebootRequest {
    fn to_op(self, op: &mut RebootOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.timeout_msecs = self.timeout_msecs;
        op.force_apps_closed = self.force_apps_closed;
    }

    fn from_op(op: &mut RebootOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            timeout_msecs: op.timeout_msecs,
            force_apps_closed: op.force_apps_closed,
        }
    }
}

pub type RebootResponse = EmptyResponse;

#[derive(Debug, Default)]
struct RebootOperation {
    this: OrpcThis,
    that: OrpcThat,
    timeout_msecs: u32,
    force_apps_closed: u32,
    return_value: i32,
}

impl Operation for RebootOperation {
    const OPNUM: u16 = opnum::REBOOT;
    const NAME: &'static str = "/IIisServiceControl/v0/Reboot";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        w.write_u32(self.timeout_msecs);
        w.write_u32(self.force_apps_closed);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.timeout_msecs = r.read_u32()?;
        self.force_apps_closed = r.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// Status

#[derive(Clone, Debug, Default)]
pub struct StatusRequest {
    pub this: Option<OrpcThis>,
    /// Size of the buffer the caller accepts
    pub buffer_size: u32,
}

impl StatusRequest {
    fn to_op(self, op: &mut StatusOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.buffer_size = self.buffer_size;
    }

    fn from_op(op: &mut StatusOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            buffer_size: op.buffer_size,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StatusResponse {
    pub that: Option<OrpcThat>,
    /// Sizes `buffer` on the wire; the request's value wins when set
    pub buffer_size: u32,
    /// Service status records, zero-padded to `buffer_size`
    pub buffer: Vec<u8>,
    pub required_buffer_size: u32,
    pub service_count: u32,
    pub return_value: i32,
}

impl StatusResponse {
    fn to_op(self, op: &mut StatusOperation) {
        if op.buffer_size == 0 {
            op.buffer_size = self.buffer_size;
        }
        op.that = self.that.unwrap_or_default();
        op.buffer = self.buffer;
        op.required_buffer_size = self.required_buffer_size;
        op.service_count = self.service_count;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut StatusOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            buffer_size: op.buffer_size,
            buffer: std::mem::take(&mut op.buffer),
            required_buffer_size: op.required_buffer_size,
            service_count: op.service_count,
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct StatusOperation {
    this: OrpcThis,
    that: OrpcThat,
    buffer_size: u32,
    buffer: Vec<u8>,
    required_buffer_size: u32,
    service_count: u32,
    return_value: i32,
}

impl Operation for StatusOperation {
    const OPNUM: u16 = opnum::STATUS;
    const NAME: &'static str = "/IIisServiceControl/v0/Status";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        w.write_u32(self.buffer_size);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.buffer_size = r.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_byte_array(&self.buffer, self.buffer_size as usize)?;
        w.write_u32(self.required_buffer_size);
        w.write_u32(self.service_count);
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.buffer = r.read_byte_array("pbBuffer")?;
        self.required_buffer_size = r.read_u32()?;
        self.service_count = r.read_u32()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// Kill

#[derive(Clone, Debug, Default)]
pub struct KillRequest {
    pub this: Option<OrpcThis>,
}

impl KillRequest {
    fn to_op(self, op: &mut KillOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
    }

    fn from_op(op: &mut KillOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
        }
    }
}

pub type KillResponse = EmptyResponse;

#[derive(Debug, Default)]
struct KillOperation {
    this: OrpcThis,
    that: OrpcThat,
    return_value: i32,
}

impl Operation for KillOperation {
    const OPNUM: u16 = opnum::KILL;
    const NAME: &'static str = "/IIisServiceControl/v0/Kill";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

/// Operations whose response is ORPCTHAT and the HRESULT
trait EmptyResult {
    fn set_result(&mut self, that: OrpcThat, return_value: i32);
    fn take_result(&mut self) -> EmptyResponse;
}

macro_rules! empty_result {
    ($($op:ty),*) => {
        $(
            impl EmptyResult for $op {
                fn set_result(&mut self, that: OrpcThat, return_value: i32) {
                    self.that = that;
                    self.return_value = return_value;
                }

                fn take_result(&mut self) -> EmptyResponse {
                    EmptyResponse {
                        that: Some(std::mem::take(&mut self.that)),
                        return_value: self.return_value,
                    }
                }
            }
        )*
    };
}

empty_result!(StopOperation, StartOperation, RebootOperation, KillOperation);

impl EmptyResponse {
    fn to_op<O: EmptyResult>(self, op: &mut O) {
        op.set_result(self.that.unwrap_or_default(), self.return_value);
    }

    fn from_op<O: EmptyResult>(op: &mut O) -> Self {
        op.take_result()
    }
}

// Client

#[async_trait]
pub trait IisServiceControlClient: Send + Sync {
    /// IDispatch methods, on the same context
    fn dispatch(&self) -> &dyn DispatchClient;

    async fn stop(&self, req: StopRequest) -> Result<StopResponse>;

    async fn start(&self, req: StartRequest) -> Result<StartResponse>;

    async fn reboot(&self, req: RebootRequest) -> Result<RebootResponse>;

    async fn status(&self, req: StatusRequest) -> Result<StatusResponse>;

    async fn kill(&self, req: KillRequest) -> Result<KillResponse>;

    fn conn(&self) -> &ObjectClient;

    async fn alter_context(&self, syntax: SyntaxId) -> Result<ObjectClient> {
        self.conn().alter_context(syntax).await
    }

    fn ipid(&self, ipid: Ipid) -> Self
    where
        Self: Sized;
}

#[derive(Clone, Debug)]
pub struct DefaultIisServiceControlClient {
    base: DefaultDispatchClient,
    obj: ObjectClient,
}

impl DefaultIisServiceControlClient {
    /// Bind IIisServiceControl on `conn`
    pub async fn new(conn: Arc<DceRpcClient>) -> Result<Self> {
        Ok(Self::from_object(ObjectClient::bind(conn, syntax()).await?))
    }

    pub fn from_object(obj: ObjectClient) -> Self {
        Self {
            base: DefaultDispatchClient::from_object(obj.clone()),
            obj,
        }
    }

    async fn call_empty<O>(&self, mut op: O) -> Result<EmptyResponse>
    where
        O: Operation + EmptyResult + Send,
    {
        self.obj.invoke(&mut op).await?;
        let resp = EmptyResponse::from_op(&mut op);
        check_hresult(O::NAME, resp.return_value)?;
        Ok(resp)
    }
}

#[async_trait]
impl IisServiceControlClient for DefaultIisServiceControlClient {
    fn dispatch(&self) -> &dyn DispatchClient {
        &self.base
    }

    async fn stop(&self, req: StopRequest) -> Result<StopResponse> {
        let mut op = StopOperation::default();
        req.to_op(&mut op);
        self.call_empty(op).await
    }

    async fn start(&self, req: StartRequest) -> Result<StartResponse> {
        let mut op = StartOperation::default();
        req.to_op(&mut op);
        self.call_empty(op).await
    }

    async fn reboot(&self, req: RebootRequest) -> Result<RebootResponse> {
        let mut op = RebootOperation::default();
        req.to_op(&mut op);
        self.call_empty(op).await
    }

    async fn status(&self, req: StatusRequest) -> Result<StatusResponse> {
        let mut op = StatusOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = StatusResponse::from_op(&mut op);
        check_hresult(StatusOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn kill(&self, req: KillRequest) -> Result<KillResponse> {
        let mut op = KillOperation::default();
        req.to_op(&mut op);
        self.call_empty(op).await
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
pub trait IisServiceControlServer: DispatchServer {
    async fn stop(&self, req: StopRequest) -> Result<StopResponse>;

    async fn start(&self, req: StartRequest) -> Result<StartResponse>;

    async fn reboot(&self, req: RebootRequest) -> Result<RebootResponse>;

    async fn status(&self, req: StatusRequest) -> Result<StatusResponse>;

    async fn kill(&self, req: KillRequest) -> Result<KillResponse>;
}

pub async fn iis_service_control_dispatch<S: IisServiceControlServer + ?Sized>(
    server: &S,
    opnum: u16,
    stub: Bytes,
    ndr: NdrContext,
) -> dcerpc::Result<Bytes> {
    if opnum <= idispatch::opnum::LAST {
        return idispatch::dispatch_dispatch(server, opnum, stub, ndr).await;
    }
    match opnum {
        opnum::STOP => {
            let mut op: StopOperation = decode_request(stub, ndr)?;
            let req = StopRequest::from_op(&mut op);
            server.stop(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::START => {
            let mut op: StartOperation = decode_request(stub, ndr)?;
            let req = StartRequest::from_op(&mut op);
            server.start(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::REBOOT => {
            let mut op: RebootOperation = decode_request(stub, ndr)?;
            let req = RebootRequest::from_op(&mut op);
            server.reboot(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::STATUS => {
            let mut op: StatusOperation = decode_request(stub, ndr)?;
            // the reply carries a buffer of exactly this size
            if op.buffer_size as usize > MAX_NDR_BYTE_ARRAY_LEN {
                return Err(RpcError::Ndr(NdrError::AllocationLimitExceeded {
                    requested: op.buffer_size as usize,
                    limit: MAX_NDR_BYTE_ARRAY_LEN,
                }));
            }
            let req = StatusRequest::from_op(&mut op);
            server.status(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::KILL => {
            let mut op: KillOperation = decode_request(stub, ndr)?;
            let req = KillRequest::from_op(&mut op);
            server.kill(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        _ => Err(RpcError::OperationUnavailable(opnum)),
    }
}

pub fn new_iis_service_control_stub<S: IisServiceControlServer + ?Sized + 'static>(
    server: Arc<S>,
) -> InterfaceStub {
    InterfaceStub::new(IID, move |call, stub| {
        let server = Arc::clone(&server);
        async move {
            iis_service_control_dispatch(server.as_ref(), call.opnum, stub, call.ndr).await
        }
    })
    .extends(iid::IDISPATCH)
}
