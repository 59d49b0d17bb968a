//! IWbemLevel1Login (MS-WMI 3.1.4.1)
//!
//! Entry point of a WMI session: NTLMLogin returns the IWbemServices
//! pointer of a namespace. Derives from IUnknown directly.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dcerpc::operation::{decode_request, encode_response};
use dcerpc::{DceRpcClient, Operation, RpcError, SyntaxId, Uuid};
use dcom::iunknown;
use dcom::{
    check_hresult, Iid, InterfaceStub, Ipid, MInterfacePointer, ObjectClient, OrpcThat, OrpcThis,
    Result,
};
use midl_ndr::{NdrContext, NdrReader, NdrWString, NdrWriter};

pub const SYNTAX_UUID: Uuid = Uuid::from_u128(0xf309ad18_d86a_11d0_a075_00c04fb68820);
pub const MAJOR_VERSION: u16 = 0;
pub const MINOR_VERSION: u16 = 0;

pub const IID: Iid = Iid::from_u128(0xf309ad18_d86a_11d0_a075_00c04fb68820);

/// IWbemServices, the interface NTLMLogin hands out
pub const IID_IWBEM_SERVICES: Iid = Iid::from_u128(0x9556dc99_828c_11cf_a37e_00aa003240c7);

pub fn syntax() -> SyntaxId {
    SyntaxId::new(SYNTAX_UUID, MAJOR_VERSION, MINOR_VERSION)
}

pub mod opnum {
    pub const ESTABLISH_POSITION: u16 = 3;
    pub const REQUEST_CHALLENGE: u16 = 4;
    pub const WBEM_LOGIN: u16 = 5;
    pub const NTLM_LOGIN: u16 = 6;
}

/// Size of the fixed challenge and response blocks
pub const CHALLENGE_SIZE: usize = 16;

fn write_opt_wstring(w: &mut NdrWriter, value: &Option<String>) -> midl_ndr::Result<()> {
    let value = value.as_deref().map(NdrWString::new);
    w.write_unique(value.as_ref())
}

fn read_opt_wstring(r: &mut NdrReader) -> midl_ndr::Result<Option<String>> {
    Ok(r.read_unique::<NdrWString>()?.map(NdrWString::into_string))
}

/// `[size_is(16), length_is(16)] unsigned char*` pointee
fn write_challenge(w: &mut NdrWriter, data: &[u8; CHALLENGE_SIZE]) -> midl_ndr::Result<()> {
    w.write_size(CHALLENGE_SIZE)?;
    w.write_variance(CHALLENGE_SIZE)?;
    w.write_byte_elements(data, CHALLENGE_SIZE);
    Ok(())
}

fn read_challenge(r: &mut NdrReader) -> midl_ndr::Result<[u8; CHALLENGE_SIZE]> {
    let max_count = r.read_size()?;
    let actual = r.read_variance(max_count)?;
    let data = r.read_byte_elements(actual, "challenge")?;
    let mut out = [0u8; CHALLENGE_SIZE];
    let n = data.len().min(CHALLENGE_SIZE);
    out[..n].copy_from_slice(&data[..n]);
    Ok(out)
}

// EstablishPosition

#[derive(Clone, Debug, Default)]
pub struct EstablishPositionRequest {
    pub this: Option<OrpcThis>,
    pub reserved1: Option<String>,
    pub reserved2: u32,
}

impl EstablishPositionRequest {
    fn to_op(self, op: &mut EstablishPositionOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.reserved1 = self.reserved1;
        op.reserved2 = self.reserved2;
    }

    fn from_op(op: &mut EstablishPositionOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            reserved1: op.reserved1.take(),
            reserved2: op.reserved2,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EstablishPositionResponse {
    pub that: Option<OrpcThat>,
    pub locale_version: u32,
    pub return_value: i32,
}

impl EstablishPositionResponse {
    fn to_op(self, op: &mut EstablishPositionOperation) {
        op.that = self.that.unwrap_or_default();
        op.locale_version = self.locale_version;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut EstablishPositionOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            locale_version: op.locale_version,
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct EstablishPositionOperation {
    this: OrpcThis,
    that: OrpcThat,
    reserved1: Option<String>,
    reserved2: u32,
    locale_version: u32,
    return_value: i32,
}

impl Operation for EstablishPositionOperation {
    const OPNUM: u16 = opnum::ESTABLISH_POSITION;
    const NAME: &'static str = "/IWbemLevel1Login/v0/EstablishPosition";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        write_opt_wstring(w, &self.reserved1)?;
        w.write_u32(self.reserved2);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.reserved1 = read_opt_wstring(r)?;
        self.reserved2 = r.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_u32(self.locale_version);
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.locale_version = r.read_u32()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// RequestChallenge

#[derive(Clone, Debug, Default)]
pub struct RequestChallengeRequest {
    pub this: Option<OrpcThis>,
    pub reserved1: Option<String>,
    pub reserved2: Option<String>,
}

impl RequestChallengeRequest {
    fn to_op(self, op: &mut RequestChallengeOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.reserved1 = self.reserved1;
        op.reserved2 = self.reserved2;
    }

    fn from_op(op: &mut RequestChallengeOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            reserved1: op.reserved1.take(),
            reserved2: op.reserved2.take(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RequestChallengeResponse {
    pub that: Option<OrpcThat>,
    pub reserved3: [u8; CHALLENGE_SIZE],
    pub return_value: i32,
}

impl RequestChallengeResponse {
    fn to_op(self, op: &mut RequestChallengeOperation) {
        op.that = self.that.unwrap_or_default();
        op.reserved3 = self.reserved3;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut RequestChallengeOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            reserved3: op.reserved3,
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct RequestChallengeOperation {
    this: OrpcThis,
    that: OrpcThat,
    reserved1: Option<String>,
    reserved2: Option<String>,
    reserved3: [u8; CHALLENGE_SIZE],
    return_value: i32,
}

impl Operation for RequestChallengeOperation {
    const OPNUM: u16 = opnum::REQUEST_CHALLENGE;
    const NAME: &'static str = "/IWbemLevel1Login/v0/RequestChallenge";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        write_opt_wstring(w, &self.reserved1)?;
        write_opt_wstring(w, &self.reserved2)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.reserved1 = read_opt_wstring(r)?;
        self.reserved2 = read_opt_wstring(r)?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        write_challenge(w, &self.reserved3)?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.reserved3 = read_challenge(r)?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// WBEMLogin

#[derive(Clone, Debug, Default)]
pub struct WbemLoginRequest {
    pub this: Option<OrpcThis>,
    pub reserved1: Option<String>,
    pub reserved2: Option<[u8; CHALLENGE_SIZE]>,
    pub reserved3: i32,
    /// IWbemContext
    pub reserved4: Option<MInterfacePointer>,
}

impl WbemLoginRequest {
    fn to_op(self, op: &mut WbemLoginOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.reserved1 = self.reserved1;
        op.reserved2 = self.reserved2;
        op.reserved3 = self.reserved3;
        op.reserved4 = self.reserved4;
    }

    fn from_op(op: &mut WbemLoginOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            reserved1: op.reserved1.take(),
            reserved2: op.reserved2.take(),
            reserved3: op.reserved3,
            reserved4: op.reserved4.take(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WbemLoginResponse {
    pub that: Option<OrpcThat>,
    /// IWbemServices
    pub reserved5: Option<MInterfacePointer>,
    pub return_value: i32,
}

impl WbemLoginResponse {
    fn to_op(self, op: &mut WbemLoginOperation) {
        op.that = self.that.unwrap_or_default();
        op.reserved5 = self.reserved5;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut WbemLoginOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            reserved5: op.reserved5.take(),
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct WbemLoginOperation {
    this: OrpcThis,
    that: OrpcThat,
    reserved1: Option<String>,
    reserved2: Option<[u8; CHALLENGE_SIZE]>,
    reserved3: i32,
    reserved4: Option<MInterfacePointer>,
    reserved5: Option<MInterfacePointer>,
    return_value: i32,
}

impl Operation for WbemLoginOperation {
    const OPNUM: u16 = opnum::WBEM_LOGIN;
    const NAME: &'static str = "/IWbemLevel1Login/v0/WBEMLogin";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        write_opt_wstring(w, &self.reserved1)?;
        w.write_pointer(self.reserved2.is_some())?;
        if let Some(challenge) = &self.reserved2 {
            write_challenge(w, challenge)?;
        }
        w.write_i32(self.reserved3);
        w.write_unique(self.reserved4.as_ref())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.reserved1 = read_opt_wstring(r)?;
        self.reserved2 = if r.read_pointer()? {
            Some(read_challenge(r)?)
        } else {
            None
        };
        self.reserved3 = r.read_i32()?;
        self.reserved4 = r.read_unique()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_unique(self.reserved5.as_ref())?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.reserved5 = r.read_unique()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// NTLMLogin

#[derive(Clone, Debug, Default)]
pub struct NtlmLoginRequest {
    pub this: Option<OrpcThis>,
    /// Namespace path, e.g. `//./root/cimv2`
    pub network_resource: Option<String>,
    pub preferred_locale: Option<String>,
    pub flags: i32,
    /// IWbemContext
    pub context: Option<MInterfacePointer>,
}

impl NtlmLoginRequest {
    fn to_op(self, op: &mut NtlmLoginOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.network_resource = self.network_resource;
        op.preferred_locale = self.preferred_locale;
        op.flags = self.flags;
        op.context = self.context;
    }

    fn from_op(op: &mut NtlmLoginOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            network_resource: op.network_resource.take(),
            preferred_locale: op.preferred_locale.take(),
            flags: op.flags,
            context: op.context.take(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NtlmLoginResponse {
    pub that: Option<OrpcThat>,
    /// IWbemServices of the namespace
    pub namespace: Option<MInterfacePointer>,
    pub return_value: i32,
}

impl NtlmLoginResponse {
    fn to_op(self, op: &mut NtlmLoginOperation) {
        op.that = self.that.unwrap_or_default();
        op.namespace = self.namespace;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut NtlmLoginOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            namespace: op.namespace.take(),
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct NtlmLoginOperation {
    this: OrpcThis,
    that: OrpcThat,
    network_resource: Option<String>,
    preferred_locale: Option<String>,
    flags: i32,
    context: Option<MInterfacePointer>,
    namespace: Option<MInterfacePointer>,
    return_value: i32,
}

impl Operation for NtlmLoginOperation {
    const OPNUM: u16 = opnum::NTLM_LOGIN;
    const NAME: &'static str = "/IWbemLevel1Login/v0/NTLMLogin";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        write_opt_wstring(w, &self.network_resource)?;
        write_opt_wstring(w, &self.preferred_locale)?;
        w.write_i32(self.flags);
        w.write_unique(self.context.as_ref())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.network_resource = read_opt_wstring(r)?;
        self.preferred_locale = read_opt_wstring(r)?;
        self.flags = r.read_i32()?;
        self.context = r.read_unique()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_unique(self.namespace.as_ref())?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.namespace = r.read_unique()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// Client

#[async_trait]
pub trait Level1LoginClient: Send + Sync {
    async fn establish_position(
        &self,
        req: EstablishPositionRequest,
    ) -> Result<EstablishPositionResponse>;

    async fn request_challenge(
        &self,
        req: RequestChallengeRequest,
    ) -> Result<RequestChallengeResponse>;

    async fn wbem_login(&self, req: WbemLoginRequest) -> Result<WbemLoginResponse>;

    async fn ntlm_login(&self, req: NtlmLoginRequest) -> Result<NtlmLoginResponse>;

    fn conn(&self) -> &ObjectClient;

    async fn alter_context(&self, syntax: SyntaxId) -> Result<ObjectClient> {
        self.conn().alter_context(syntax).await
    }

    fn ipid(&self, ipid: Ipid) -> Self
    where
        Self: Sized;
}

#[derive(Clone, Debug)]
pub struct DefaultLevel1LoginClient {
    obj: ObjectClient,
}

impl DefaultLevel1LoginClient {
    pub async fn new(conn: Arc<DceRpcClient>) -> Result<Self> {
        Ok(Self::from_object(ObjectClient::bind(conn, syntax()).await?))
    }

    pub fn from_object(obj: ObjectClient) -> Self {
        Self { obj }
    }
}

#[async_trait]
impl Level1LoginClient for DefaultLevel1LoginClient {
    async fn establish_position(
        &self,
        req: EstablishPositionRequest,
    ) -> Result<EstablishPositionResponse> {
        let mut op = EstablishPositionOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = EstablishPositionResponse::from_op(&mut op);
        check_hresult(EstablishPositionOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn request_challenge(
        &self,
        req: RequestChallengeRequest,
    ) -> Result<RequestChallengeResponse> {
        let mut op = RequestChallengeOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = RequestChallengeResponse::from_op(&mut op);
        check_hresult(RequestChallengeOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn wbem_login(&self, req: WbemLoginRequest) -> Result<WbemLoginResponse> {
        let mut op = WbemLoginOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = WbemLoginResponse::from_op(&mut op);
        check_hresult(WbemLoginOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn ntlm_login(&self, req: NtlmLoginRequest) -> Result<NtlmLoginResponse> {
        let mut op = NtlmLoginOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = NtlmLoginResponse::from_op(&mut op);
        check_hresult(NtlmLoginOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    fn conn(&self) -> &ObjectClient {
        &self.obj
    }

    fn ipid(&self, ipid: Ipid) -> Self {
        Self {
            obj: self.obj.with_ipid(ipid),
        }
    }
}

// Server

#[async_trait]
pub trait Level1LoginServer: Send + Sync {
    async fn establish_position(
        &self,
        req: EstablishPositionRequest,
    ) -> Result<EstablishPositionResponse>;

    async fn request_challenge(
        &self,
        req: RequestChallengeRequest,
    ) -> Result<RequestChallengeResponse>;

    async fn wbem_login(&self, req: WbemLoginRequest) -> Result<WbemLoginResponse>;

    async fn ntlm_login(&self, req: NtlmLoginRequest) -> Result<NtlmLoginResponse>;
}

pub async fn level1_login_dispatch<S: Level1LoginServer + ?Sized>(
    server: &S,
    opnum: u16,
    stub: Bytes,
    ndr: NdrContext,
) -> dcerpc::Result<Bytes> {
    if opnum <= iunknown::LAST_OPNUM {
        return iunknown::unknown_dispatch(opnum);
    }
    match opnum {
        opnum::ESTABLISH_POSITION => {
            let mut op: EstablishPositionOperation = decode_request(stub, ndr)?;
            let req = EstablishPositionRequest::from_op(&mut op);
            server.establish_position(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::REQUEST_CHALLENGE => {
            let mut op: RequestChallengeOperation = decode_request(stub, ndr)?;
            let req = RequestChallengeRequest::from_op(&mut op);
            server.request_challenge(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::WBEM_LOGIN => {
            let mut op: WbemLoginOperation = decode_request(stub, ndr)?;
            let req = WbemLoginRequest::from_op(&mut op);
            server.wbem_login(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::NTLM_LOGIN => {
            let mut op: NtlmLoginOperation = decode_request(stub, ndr)?;
            let req = NtlmLoginRequest::from_op(&mut op);
            server.ntlm_login(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        _ => Err(RpcError::OperationUnavailable(opnum)),
    }
}

pub fn new_level1_login_stub<S: Level1LoginServer + ?Sized + 'static>(
    server: Arc<S>,
) -> InterfaceStub {
    InterfaceStub::new(IID, move |call, stub| {
        let server = Arc::clone(&server);
        async move { level1_login_dispatch(server.as_ref(), call.opnum, stub, call.ndr).await }
    })
}
