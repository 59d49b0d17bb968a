//! IDispatch (MS-OAUT 3.1.4)
//!
//! Type information and name lookup. `Invoke` carries VARIANT and
//! DISPPARAMS marshaling, which is not bound here; its opnum answers
//! op_rng_error.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dcerpc::operation::{decode_request, encode_response};
use dcerpc::{DceRpcClient, Operation, RpcError, SyntaxId, Uuid};
use midl_ndr::{NdrContext, NdrReader, NdrWString, NdrWriter, UniquePtr};

use crate::client::ObjectClient;
use crate::iunknown;
use crate::server::InterfaceStub;
use crate::types::{check_hresult, iid, Iid, Ipid, MInterfacePointer, OrpcThat, OrpcThis, Result};

pub const SYNTAX_UUID: Uuid = Uuid::from_u128(0x00020400_0000_0000_c000_000000000046);
pub const MAJOR_VERSION: u16 = 0;
pub const MINOR_VERSION: u16 = 0;

pub fn syntax() -> SyntaxId {
    SyntaxId::new(SYNTAX_UUID, MAJOR_VERSION, MINOR_VERSION)
}

pub mod opnum {
    pub const GET_TYPE_INFO_COUNT: u16 = 3;
    pub const GET_TYPE_INFO: u16 = 4;
    pub const GET_IDS_OF_NAMES: u16 = 5;
    pub const INVOKE: u16 = 6;
    /// Last opnum IDispatch occupies; derived interfaces start after it
    pub const LAST: u16 = INVOKE;
}

// GetTypeInfoCount

#[derive(Clone, Debug, Default)]
pub struct GetTypeInfoCountRequest {
    pub this: Option<OrpcThis>,
}

impl GetTypeInfoCountRequest {
    fn to_op(self, op: &mut GetTypeInfoCountOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
    }

    fn from_op(op: &mut GetTypeInfoCountOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GetTypeInfoCountResponse {
    pub that: Option<OrpcThat>,
    /// 1 when the object provides type information, else 0
    pub count: u32,
    pub return_value: i32,
}

impl GetTypeInfoCountResponse {
    fn to_op(self, op: &mut GetTypeInfoCountOperation) {
        op.that = self.that.unwrap_or_default();
        op.count = self.count;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut GetTypeInfoCountOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            count: op.count,
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct GetTypeInfoCountOperation {
    this: OrpcThis,
    that: OrpcThat,
    count: u32,
    return_value: i32,
}

impl Operation for GetTypeInfoCountOperation {
    const OPNUM: u16 = opnum::GET_TYPE_INFO_COUNT;
    const NAME: &'static str = "/IDispatch/v0/GetTypeInfoCount";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_u32(self.count);
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.count = r.read_u32()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// GetTypeInfo

#[derive(Clone, Debug, Default)]
pub struct GetTypeInfoRequest {
    pub this: Option<OrpcThis>,
    pub type_info_index: u32,
    pub lcid: u32,
}

impl GetTypeInfoRequest {
    fn to_op(self, op: &mut GetTypeInfoOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.type_info_index = self.type_info_index;
        op.lcid = self.lcid;
    }

    fn from_op(op: &mut GetTypeInfoOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            type_info_index: op.type_info_index,
            lcid: op.lcid,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GetTypeInfoResponse {
    pub that: Option<OrpcThat>,
    /// Marshaled ITypeInfo
    pub type_info: Option<MInterfacePointer>,
    pub return_value: i32,
}

impl GetTypeInfoResponse {
    fn to_op(self, op: &mut GetTypeInfoOperation) {
        op.that = self.that.unwrap_or_default();
        op.type_info = self.type_info;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut GetTypeInfoOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            type_info: op.type_info.take(),
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct GetTypeInfoOperation {
    this: OrpcThis,
    that: OrpcThat,
    type_info_index: u32,
    lcid: u32,
    type_info: Option<MInterfacePointer>,
    return_value: i32,
}

impl Operation for GetTypeInfoOperation {
    const OPNUM: u16 = opnum::GET_TYPE_INFO;
    const NAME: &'static str = "/IDispatch/v0/GetTypeInfo";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        w.write_u32(self.type_info_index);
        w.write_u32(self.lcid);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.type_info_index = r.read_u32()?;
        self.lcid = r.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_unique(self.type_info.as_ref())?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.type_info = r.read_unique()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// GetIDsOfNames

#[derive(Clone, Debug, Default)]
pub struct GetIdsOfNamesRequest {
    pub this: Option<OrpcThis>,
    /// Reserved, IID_NULL
    pub riid: Iid,
    pub names: Vec<String>,
    pub lcid: u32,
}

impl GetIdsOfNamesRequest {
    fn to_op(self, op: &mut GetIdsOfNamesOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.riid = self.riid;
        op.names_count = self.names.len() as u32;
        op.names = self.names;
        op.lcid = self.lcid;
    }

    fn from_op(op: &mut GetIdsOfNamesOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            riid: op.riid,
            names: std::mem::take(&mut op.names),
            lcid: op.lcid,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GetIdsOfNamesResponse {
    pub that: Option<OrpcThat>,
    /// Sizes `dispatch_ids` on the wire; taken from the request when zero
    pub names_count: u32,
    pub dispatch_ids: Vec<i32>,
    pub return_value: i32,
}

impl GetIdsOfNamesResponse {
    fn to_op(self, op: &mut GetIdsOfNamesOperation) {
        if op.names_count == 0 {
            op.names_count = self.names_count;
        }
        op.that = self.that.unwrap_or_default();
        op.dispatch_ids = self.dispatch_ids;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut GetIdsOfNamesOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            names_count: op.names_count,
            dispatch_ids: std::mem::take(&mut op.dispatch_ids),
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct GetIdsOfNamesOperation {
    this: OrpcThis,
    that: OrpcThat,
    riid: Iid,
    names_count: u32,
    names: Vec<String>,
    lcid: u32,
    dispatch_ids: Vec<i32>,
    return_value: i32,
}

impl Operation for GetIdsOfNamesOperation {
    const OPNUM: u16 = opnum::GET_IDS_OF_NAMES;
    const NAME: &'static str = "/IDispatch/v0/GetIDsOfNames";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.this)?;
        w.write_data(&self.riid)?;
        let count = if self.names_count == 0 {
            self.names.len()
        } else {
            self.names_count as usize
        };
        // empty names travel as null pointers
        let names: Vec<UniquePtr<NdrWString>> = self
            .names
            .iter()
            .map(|name| {
                if name.is_empty() {
                    UniquePtr::null()
                } else {
                    UniquePtr::new(NdrWString::new(name.as_str()))
                }
            })
            .collect();
        w.write_array(&names, count)?;
        w.write_u32(count as u32);
        w.write_u32(self.lcid);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.this = r.read_data()?;
        self.riid = r.read_data()?;
        let names: Vec<UniquePtr<NdrWString>> = r.read_array("rgszNames")?;
        self.names = names
            .into_iter()
            .map(|name| name.into_option().map(NdrWString::into_string).unwrap_or_default())
            .collect();
        self.names_count = r.read_u32()?;
        self.lcid = r.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.that)?;
        w.write_array(&self.dispatch_ids, self.names_count as usize)?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.that = r.read_data()?;
        self.dispatch_ids = r.read_array("rgDispId")?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// Client

#[async_trait]
pub trait DispatchClient: Send + Sync {
    async fn get_type_info_count(
        &self,
        req: GetTypeInfoCountRequest,
    ) -> Result<GetTypeInfoCountResponse>;

    async fn get_type_info(&self, req: GetTypeInfoRequest) -> Result<GetTypeInfoResponse>;

    async fn get_ids_of_names(&self, req: GetIdsOfNamesRequest) -> Result<GetIdsOfNamesResponse>;

    fn conn(&self) -> &ObjectClient;

    async fn alter_context(&self, syntax: SyntaxId) -> Result<ObjectClient> {
        self.conn().alter_context(syntax).await
    }

    fn ipid(&self, ipid: Ipid) -> Self
    where
        Self: Sized;
}

#[derive(Clone, Debug)]
pub struct DefaultDispatchClient {
    obj: ObjectClient,
}

impl DefaultDispatchClient {
    /// Bind IDispatch on `conn`
    pub async fn new(conn: Arc<DceRpcClient>) -> Result<Self> {
        Ok(Self::from_object(ObjectClient::bind(conn, syntax()).await?))
    }

    /// IDispatch calls over a derived interface's context
    pub fn from_object(obj: ObjectClient) -> Self {
        Self { obj }
    }
}

#[async_trait]
impl DispatchClient for DefaultDispatchClient {
    async fn get_type_info_count(
        &self,
        req: GetTypeInfoCountRequest,
    ) -> Result<GetTypeInfoCountResponse> {
        let mut op = GetTypeInfoCountOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = GetTypeInfoCountResponse::from_op(&mut op);
        check_hresult(GetTypeInfoCountOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn get_type_info(&self, req: GetTypeInfoRequest) -> Result<GetTypeInfoResponse> {
        let mut op = GetTypeInfoOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = GetTypeInfoResponse::from_op(&mut op);
        check_hresult(GetTypeInfoOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn get_ids_of_names(&self, req: GetIdsOfNamesRequest) -> Result<GetIdsOfNamesResponse> {
        let mut op = GetIdsOfNamesOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = GetIdsOfNamesResponse::from_op(&mut op);
        check_hresult(GetIdsOfNamesOperation::NAME, resp.return_value)?;
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
pub trait DispatchServer: Send + Sync {
    async fn get_type_info_count(
        &self,
        req: GetTypeInfoCountRequest,
    ) -> Result<GetTypeInfoCountResponse>;

    async fn get_type_info(&self, req: GetTypeInfoRequest) -> Result<GetTypeInfoResponse>;

    async fn get_ids_of_names(&self, req: GetIdsOfNamesRequest) -> Result<GetIdsOfNamesResponse>;
}

pub async fn dispatch_dispatch<S: DispatchServer + ?Sized>(
    server: &S,
    opnum: u16,
    stub: Bytes,
    ndr: NdrContext,
) -> dcerpc::Result<Bytes> {
    if opnum <= iunknown::LAST_OPNUM {
        return iunknown::unknown_dispatch(opnum);
    }
    match opnum {
        opnum::GET_TYPE_INFO_COUNT => {
            let mut op: GetTypeInfoCountOperation = decode_request(stub, ndr)?;
            let req = GetTypeInfoCountRequest::from_op(&mut op);
            let resp = server.get_type_info_count(req).await?;
            resp.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::GET_TYPE_INFO => {
            let mut op: GetTypeInfoOperation = decode_request(stub, ndr)?;
            let req = GetTypeInfoRequest::from_op(&mut op);
            let resp = server.get_type_info(req).await?;
            resp.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::GET_IDS_OF_NAMES => {
            let mut op: GetIdsOfNamesOperation = decode_request(stub, ndr)?;
            let req = GetIdsOfNamesRequest::from_op(&mut op);
            let resp = server.get_ids_of_names(req).await?;
            resp.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        _ => Err(RpcError::OperationUnavailable(opnum)),
    }
}

pub fn new_dispatch_stub<S: DispatchServer + ?Sized + 'static>(server: Arc<S>) -> InterfaceStub {
    InterfaceStub::new(iid::IDISPATCH, move |call, stub| {
        let server = Arc::clone(&server);
        async move { dispatch_dispatch(server.as_ref(), call.opnum, stub, call.ndr).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hresult;
    use dcerpc::operation::{decode_response, encode_request};
    use dcerpc::{fault_status_for, fault};

    struct Names;

    #[async_trait]
    impl DispatchServer for Names {
        async fn get_type_info_count(
            &self,
            _req: GetTypeInfoCountRequest,
        ) -> Result<GetTypeInfoCountResponse> {
            Ok(GetTypeInfoCountResponse {
                count: 0,
                ..Default::default()
            })
        }

        async fn get_type_info(&self, _req: GetTypeInfoRequest) -> Result<GetTypeInfoResponse> {
            Ok(GetTypeInfoResponse {
                return_value: hresult::E_NOTIMPL as i32,
                ..Default::default()
            })
        }

        async fn get_ids_of_names(
            &self,
            req: GetIdsOfNamesRequest,
        ) -> Result<GetIdsOfNamesResponse> {
            Ok(GetIdsOfNamesResponse {
                dispatch_ids: req.names.iter().map(|n| n.len() as i32).collect(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_get_ids_of_names_through_dispatcher() {
        let ctx = NdrContext::new();
        let mut client = GetIdsOfNamesOperation::default();
        GetIdsOfNamesRequest {
            names: vec!["Stop".into(), String::new(), "Status".into()],
            lcid: 0x409,
            ..Default::default()
        }
        .to_op(&mut client);
        let stub = encode_request(&client, ctx).unwrap();

        let reply = dispatch_dispatch(&Names, opnum::GET_IDS_OF_NAMES, stub, ctx)
            .await
            .unwrap();
        decode_response(&mut client, reply, ctx).unwrap();
        let resp = GetIdsOfNamesResponse::from_op(&mut client);
        assert_eq!(resp.dispatch_ids, vec![4, 0, 6]);
        assert_eq!(resp.return_value, 0);
    }

    #[tokio::test]
    async fn test_empty_name_is_null_pointer() {
        let mut op = GetIdsOfNamesOperation::default();
        GetIdsOfNamesRequest {
            this: Some(OrpcThis::default()),
            names: vec![String::new()],
            ..Default::default()
        }
        .to_op(&mut op);
        let stub = encode_request(&op, NdrContext::new()).unwrap();
        // this (32) + riid (16) + max_count + null pointer + count + lcid
        assert_eq!(stub.len(), 32 + 16 + 16);
        assert_eq!(&stub[52..56], &[0, 0, 0, 0]);
        assert_eq!(&stub[56..60], &1u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_invoke_and_iunknown_opnums_are_unavailable() {
        for opnum in [0, 1, 2, opnum::INVOKE, 9] {
            let err = dispatch_dispatch(&Names, opnum, Bytes::new(), NdrContext::new())
                .await
                .unwrap_err();
            assert_eq!(fault_status_for(&err), fault::NCA_OP_RNG_ERROR);
        }
    }

    #[tokio::test]
    async fn test_type_info_pointer_and_failure_code() {
        let ctx = NdrContext::new();
        let mut client = GetTypeInfoOperation::default();
        GetTypeInfoRequest::default().to_op(&mut client);
        let stub = encode_request(&client, ctx).unwrap();
        let reply = dispatch_dispatch(&Names, opnum::GET_TYPE_INFO, stub, ctx)
            .await
            .unwrap();
        decode_response(&mut client, reply, ctx).unwrap();
        let resp = GetTypeInfoResponse::from_op(&mut client);
        assert!(resp.type_info.is_none());
        let err = check_hresult(GetTypeInfoOperation::NAME, resp.return_value).unwrap_err();
        assert_eq!(err.hresult(), Some(hresult::E_NOTIMPL));
    }
}
