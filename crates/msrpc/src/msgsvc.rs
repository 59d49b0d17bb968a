//! msgsvc (MS-MSRP)
//!
//! Messenger service name table: add, enumerate, query and delete the
//! NetBIOS names a host receives messages for. Plain RPC; every method
//! returns a NET_API_STATUS.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dcerpc::operation::{decode_request, encode_response};
use dcerpc::{DceRpcClient, Interface, InterfaceBuilder, Operation, RpcError, SyntaxId, Uuid};
use dcom::{check_win32, Result};
use midl_ndr::{
    NdrContext, NdrDecode, NdrEncode, NdrError, NdrReader, NdrUnion, NdrWString, NdrWriter,
};
use tracing::debug;

use crate::client::InterfaceClient;

pub const SYNTAX_UUID: Uuid = Uuid::from_u128(0x17fdd703_1827_4e34_79d4_24a55c53bb37);
pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;

pub fn syntax() -> SyntaxId {
    SyntaxId::new(SYNTAX_UUID, MAJOR_VERSION, MINOR_VERSION)
}

pub mod opnum {
    pub const NETR_MESSAGE_NAME_ADD: u16 = 0;
    pub const NETR_MESSAGE_NAME_ENUM: u16 = 1;
    pub const NETR_MESSAGE_NAME_GET_INFO: u16 = 2;
    pub const NETR_MESSAGE_NAME_DEL: u16 = 3;
}

/// NET_API_STATUS values
pub mod status {
    pub const NERR_SUCCESS: u32 = 0;
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_INVALID_LEVEL: u32 = 124;
    pub const ERROR_MORE_DATA: u32 = 234;
    pub const NERR_DUPLICATE_NAME: u32 = 2144;
    pub const NERR_NAME_NOT_FOUND: u32 = 2273;
}

fn write_opt_wstring(w: &mut NdrWriter, value: &Option<String>) -> midl_ndr::Result<()> {
    let value = value.as_deref().map(NdrWString::new);
    w.write_unique(value.as_ref())
}

fn read_opt_wstring(r: &mut NdrReader) -> midl_ndr::Result<Option<String>> {
    Ok(r.read_unique::<NdrWString>()?.map(NdrWString::into_string))
}

/// Deferred part of an embedded string pointer
fn write_string_pointee(w: &mut NdrWriter, value: &Option<String>) -> midl_ndr::Result<()> {
    match value {
        Some(s) => w.write_wstring(s),
        None => Ok(()),
    }
}

fn read_string_pointee(r: &mut NdrReader, value: &mut Option<String>) -> midl_ndr::Result<()> {
    if let Some(s) = value.as_mut() {
        *s = r.read_wstring()?;
    }
    Ok(())
}

/// MSG_INFO_0
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MsgInfo0 {
    pub name: Option<String>,
}

impl NdrEncode for MsgInfo0 {
    fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.align(4);
        w.write_pointer(self.name.is_some())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        write_string_pointee(w, &self.name)
    }
}

impl NdrDecode for MsgInfo0 {
    fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
        r.align(4)?;
        Ok(Self {
            name: r.read_pointer()?.then(String::new),
        })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        read_string_pointee(r, &mut self.name)
    }
}

/// MSG_INFO_1. `forward_flag` is zero and `forward` null on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MsgInfo1 {
    pub name: Option<String>,
    pub forward_flag: u32,
    pub forward: Option<String>,
}

impl NdrEncode for MsgInfo1 {
    fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.align(4);
        w.write_pointer(self.name.is_some())?;
        w.write_u32(self.forward_flag);
        w.write_pointer(self.forward.is_some())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        write_string_pointee(w, &self.name)?;
        write_string_pointee(w, &self.forward)
    }
}

impl NdrDecode for MsgInfo1 {
    fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
        r.align(4)?;
        let name = r.read_pointer()?.then(String::new);
        let forward_flag = r.read_u32()?;
        let forward = r.read_pointer()?.then(String::new);
        Ok(Self {
            name,
            forward_flag,
            forward,
        })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        read_string_pointee(r, &mut self.name)?;
        read_string_pointee(r, &mut self.forward)
    }
}

/// MSG_INFO_0_CONTAINER / MSG_INFO_1_CONTAINER
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MsgInfoContainer<T> {
    /// Entries in `buffer`; taken from its length when zero
    pub entries_read: u32,
    pub buffer: Option<Vec<T>>,
}

pub type MsgInfo0Container = MsgInfoContainer<MsgInfo0>;
pub type MsgInfo1Container = MsgInfoContainer<MsgInfo1>;

impl<T> MsgInfoContainer<T> {
    pub fn new(entries: Vec<T>) -> Self {
        Self {
            entries_read: entries.len() as u32,
            buffer: Some(entries),
        }
    }

    fn count(&self) -> u32 {
        match &self.buffer {
            Some(buffer) if self.entries_read == 0 => buffer.len() as u32,
            _ => self.entries_read,
        }
    }

    pub fn entries(&self) -> &[T] {
        self.buffer.as_deref().unwrap_or_default()
    }
}

impl<T: NdrEncode + Default> NdrEncode for MsgInfoContainer<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        let count = self.count();
        w.align(4);
        w.write_u32(count);
        w.write_pointer(self.buffer.is_some() || count > 0)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        let count = self.count();
        if self.buffer.is_some() || count > 0 {
            w.write_array(self.entries(), count as usize)?;
        }
        Ok(())
    }
}

impl<T: NdrDecode> NdrDecode for MsgInfoContainer<T> {
    fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
        r.align(4)?;
        let entries_read = r.read_u32()?;
        let buffer = r.read_pointer()?.then(Vec::new);
        Ok(Self {
            entries_read,
            buffer,
        })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        if let Some(buffer) = self.buffer.as_mut() {
            *buffer = r.read_array("Buffer")?;
        }
        Ok(())
    }
}

/// Union of MSG_ENUM_STRUCT, switched by level
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MsgEnumInfo {
    Level0(Option<MsgInfo0Container>),
    Level1(Option<MsgInfo1Container>),
}

impl Default for MsgEnumInfo {
    fn default() -> Self {
        MsgEnumInfo::Level0(None)
    }
}

impl NdrUnion for MsgEnumInfo {
    fn switch_value(&self) -> u32 {
        match self {
            MsgEnumInfo::Level0(_) => 0,
            MsgEnumInfo::Level1(_) => 1,
        }
    }

    fn encode_arm(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        match self {
            MsgEnumInfo::Level0(c) => w.write_pointer(c.is_some()),
            MsgEnumInfo::Level1(c) => w.write_pointer(c.is_some()),
        }
    }

    fn encode_arm_deferred(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        match self {
            MsgEnumInfo::Level0(Some(c)) => w.write_data(c),
            MsgEnumInfo::Level1(Some(c)) => w.write_data(c),
            _ => Ok(()),
        }
    }

    fn decode_arm(switch: u32, r: &mut NdrReader) -> midl_ndr::Result<Self> {
        match switch {
            0 => Ok(MsgEnumInfo::Level0(r.read_pointer()?.then(Default::default))),
            1 => Ok(MsgEnumInfo::Level1(r.read_pointer()?.then(Default::default))),
            other => Err(NdrError::InvalidDiscriminant(other)),
        }
    }

    fn decode_arm_deferred(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        match self {
            MsgEnumInfo::Level0(Some(c)) => *c = r.read_data()?,
            MsgEnumInfo::Level1(Some(c)) => *c = r.read_data()?,
            _ => {}
        }
        Ok(())
    }
}

/// MSG_ENUM_STRUCT
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MsgEnumStruct {
    pub level: u32,
    pub info: MsgEnumInfo,
}

impl MsgEnumStruct {
    /// Request shape asking for entries at `level`
    pub fn for_level(level: u32) -> Self {
        let info = match level {
            1 => MsgEnumInfo::Level1(Some(MsgInfoContainer::default())),
            _ => MsgEnumInfo::Level0(Some(MsgInfoContainer::default())),
        };
        Self { level, info }
    }
}

impl NdrEncode for MsgEnumStruct {
    fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.align(4);
        w.write_u32(self.level);
        w.write_union_switched(self.level, &self.info)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_union_deferred(&self.info)
    }
}

impl NdrDecode for MsgEnumStruct {
    fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
        r.align(4)?;
        let level = r.read_u32()?;
        let info = r.read_union_switched(level)?;
        Ok(Self { level, info })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        r.read_union_deferred(&mut self.info)
    }
}

/// MSG_INFO, switched by the requested level
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MsgInfo {
    Level0(Option<MsgInfo0>),
    Level1(Option<MsgInfo1>),
}

impl Default for MsgInfo {
    fn default() -> Self {
        MsgInfo::Level0(None)
    }
}

impl NdrUnion for MsgInfo {
    fn switch_value(&self) -> u32 {
        match self {
            MsgInfo::Level0(_) => 0,
            MsgInfo::Level1(_) => 1,
        }
    }

    fn encode_arm(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        match self {
            MsgInfo::Level0(v) => w.write_pointer(v.is_some()),
            MsgInfo::Level1(v) => w.write_pointer(v.is_some()),
        }
    }

    fn encode_arm_deferred(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        match self {
            MsgInfo::Level0(Some(v)) => w.write_data(v),
            MsgInfo::Level1(Some(v)) => w.write_data(v),
            _ => Ok(()),
        }
    }

    fn decode_arm(switch: u32, r: &mut NdrReader) -> midl_ndr::Result<Self> {
        match switch {
            0 => Ok(MsgInfo::Level0(r.read_pointer()?.then(Default::default))),
            1 => Ok(MsgInfo::Level1(r.read_pointer()?.then(Default::default))),
            other => Err(NdrError::InvalidDiscriminant(other)),
        }
    }

    fn decode_arm_deferred(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        match self {
            MsgInfo::Level0(Some(v)) => *v = r.read_data()?,
            MsgInfo::Level1(Some(v)) => *v = r.read_data()?,
            _ => {}
        }
        Ok(())
    }
}

/// Response of the methods that return only the status
#[derive(Clone, Debug, Default)]
pub struct StatusResponse {
    pub return_value: u32,
}

// NetrMessageNameAdd

#[derive(Clone, Debug, Default)]
pub struct NetrMessageNameAddRequest {
    pub server_name: Option<String>,
    pub msg_name: String,
}

impl NetrMessageNameAddRequest {
    fn to_op(self, op: &mut NetrMessageNameAddOperation) {
        op.server_name = self.server_name;
        op.msg_name = self.msg_name;
    }

    fn from_op(op: &mut NetrMessageNameAddOperation) -> Self {
        Self {
            server_name: op.server_name.take(),
            msg_name: std::mem::take(&mut op.msg_name),
        }
    }
}

pub type NetrMessageNameAddResponse = StatusResponse;

#[derive(Debug, Default)]
struct NetrMessageNameAddOperation {
    server_name: Option<String>,
    msg_name: String,
    return_value: u32,
}

impl Operation for NetrMessageNameAddOperation {
    const OPNUM: u16 = opnum::NETR_MESSAGE_NAME_ADD;
    const NAME: &'static str = "/msgsvc/v1/NetrMessageNameAdd";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        write_opt_wstring(w, &self.server_name)?;
        w.write_wstring(&self.msg_name)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.server_name = read_opt_wstring(r)?;
        self.msg_name = r.read_wstring()?;
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

// NetrMessageNameEnum

#[derive(Clone, Debug, Default)]
pub struct NetrMessageNameEnumRequest {
    pub server_name: Option<String>,
    /// Selects the level; its container is normally empty
    pub info: MsgEnumStruct,
    /// Preferred maximum length of returned data, or u32::MAX
    pub pref_max_len: u32,
    /// Continuation from a previous call
    pub resume_handle: Option<u32>,
}

impl NetrMessageNameEnumRequest {
    fn to_op(self, op: &mut NetrMessageNameEnumOperation) {
        op.server_name = self.server_name;
        op.info = self.info;
        op.pref_max_len = self.pref_max_len;
        op.resume_handle = self.resume_handle;
    }

    fn from_op(op: &mut NetrMessageNameEnumOperation) -> Self {
        Self {
            server_name: op.server_name.take(),
            info: std::mem::take(&mut op.info),
            pref_max_len: op.pref_max_len,
            resume_handle: op.resume_handle,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NetrMessageNameEnumResponse {
    pub info: MsgEnumStruct,
    pub total_entries: u32,
    pub resume_handle: Option<u32>,
    pub return_value: u32,
}

impl NetrMessageNameEnumResponse {
    fn to_op(self, op: &mut NetrMessageNameEnumOperation) {
        op.info = self.info;
        op.total_entries = self.total_entries;
        op.resume_handle = self.resume_handle;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut NetrMessageNameEnumOperation) -> Self {
        Self {
            info: std::mem::take(&mut op.info),
            total_entries: op.total_entries,
            resume_handle: op.resume_handle,
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct NetrMessageNameEnumOperation {
    server_name: Option<String>,
    info: MsgEnumStruct,
    pref_max_len: u32,
    resume_handle: Option<u32>,
    total_entries: u32,
    return_value: u32,
}

impl Operation for NetrMessageNameEnumOperation {
    const OPNUM: u16 = opnum::NETR_MESSAGE_NAME_ENUM;
    const NAME: &'static str = "/msgsvc/v1/NetrMessageNameEnum";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        write_opt_wstring(w, &self.server_name)?;
        w.write_data(&self.info)?;
        w.write_u32(self.pref_max_len);
        w.write_unique(self.resume_handle.as_ref())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.server_name = read_opt_wstring(r)?;
        self.info = r.read_data()?;
        self.pref_max_len = r.read_u32()?;
        self.resume_handle = r.read_unique()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_data(&self.info)?;
        w.write_u32(self.total_entries);
        w.write_unique(self.resume_handle.as_ref())?;
        w.write_u32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.info = r.read_data()?;
        self.total_entries = r.read_u32()?;
        self.resume_handle = r.read_unique()?;
        self.return_value = r.read_u32()?;
        Ok(())
    }
}

// NetrMessageNameGetInfo

#[derive(Clone, Debug, Default)]
pub struct NetrMessageNameGetInfoRequest {
    pub server_name: Option<String>,
    pub msg_name: String,
    pub level: u32,
}

impl NetrMessageNameGetInfoRequest {
    fn to_op(self, op: &mut NetrMessageNameGetInfoOperation) {
        op.server_name = self.server_name;
        op.msg_name = self.msg_name;
        op.level = self.level;
    }

    fn from_op(op: &mut NetrMessageNameGetInfoOperation) -> Self {
        Self {
            server_name: op.server_name.take(),
            msg_name: std::mem::take(&mut op.msg_name),
            level: op.level,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NetrMessageNameGetInfoResponse {
    /// Level the union is keyed by. Always the request's level; a server
    /// cannot change it.
    pub level: u32,
    pub info: MsgInfo,
    pub return_value: u32,
}

impl NetrMessageNameGetInfoResponse {
    fn to_op(self, op: &mut NetrMessageNameGetInfoOperation) {
        if self.level != op.level {
            debug!(
                "NetrMessageNameGetInfo reply at level {} keyed by request level {}",
                self.level, op.level
            );
        }
        op.info = self.info;
        op.return_value = self.return_value;
    }

    fn from_op(op: &mut NetrMessageNameGetInfoOperation) -> Self {
        Self {
            level: op.level,
            info: std::mem::take(&mut op.info),
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
struct NetrMessageNameGetInfoOperation {
    server_name: Option<String>,
    msg_name: String,
    level: u32,
    info: MsgInfo,
    return_value: u32,
}

impl NetrMessageNameGetInfoOperation {
    /// Union value to marshal: an arm that disagrees with the level
    /// travels as a null pointer of the level's arm
    fn keyed_info(&self) -> MsgInfo {
        match (self.level, &self.info) {
            (1, MsgInfo::Level1(v)) => MsgInfo::Level1(v.clone()),
            (1, _) => MsgInfo::Level1(None),
            (_, MsgInfo::Level0(v)) => MsgInfo::Level0(v.clone()),
            _ => MsgInfo::Level0(None),
        }
    }
}

impl Operation for NetrMessageNameGetInfoOperation {
    const OPNUM: u16 = opnum::NETR_MESSAGE_NAME_GET_INFO;
    const NAME: &'static str = "/msgsvc/v1/NetrMessageNameGetInfo";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        write_opt_wstring(w, &self.server_name)?;
        w.write_wstring(&self.msg_name)?;
        w.write_u32(self.level);
        Ok(())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.server_name = read_opt_wstring(r)?;
        self.msg_name = r.read_wstring()?;
        self.level = r.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        let info = self.keyed_info();
        w.write_union(&info)?;
        w.write_union_deferred(&info)?;
        w.write_u32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        let mut info: MsgInfo = r.read_union()?;
        r.read_union_deferred(&mut info)?;
        self.info = info;
        self.return_value = r.read_u32()?;
        Ok(())
    }
}

// NetrMessageNameDel

#[derive(Clone, Debug, Default)]
pub struct NetrMessageNameDelRequest {
    pub server_name: Option<String>,
    pub msg_name: String,
}

impl NetrMessageNameDelRequest {
    fn to_op(self, op: &mut NetrMessageNameDelOperation) {
        op.server_name = self.server_name;
        op.msg_name = self.msg_name;
    }

    fn from_op(op: &mut NetrMessageNameDelOperation) -> Self {
        Self {
            server_name: op.server_name.take(),
            msg_name: std::mem::take(&mut op.msg_name),
        }
    }
}

pub type NetrMessageNameDelResponse = StatusResponse;

#[derive(Debug, Default)]
struct NetrMessageNameDelOperation {
    server_name: Option<String>,
    msg_name: String,
    return_value: u32,
}

impl Operation for NetrMessageNameDelOperation {
    const OPNUM: u16 = opnum::NETR_MESSAGE_NAME_DEL;
    const NAME: &'static str = "/msgsvc/v1/NetrMessageNameDel";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        write_opt_wstring(w, &self.server_name)?;
        w.write_wstring(&self.msg_name)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.server_name = read_opt_wstring(r)?;
        self.msg_name = r.read_wstring()?;
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
pub trait MsgsvcClient: Send + Sync {
    async fn netr_message_name_add(
        &self,
        req: NetrMessageNameAddRequest,
    ) -> Result<NetrMessageNameAddResponse>;

    async fn netr_message_name_enum(
        &self,
        req: NetrMessageNameEnumRequest,
    ) -> Result<NetrMessageNameEnumResponse>;

    async fn netr_message_name_get_info(
        &self,
        req: NetrMessageNameGetInfoRequest,
    ) -> Result<NetrMessageNameGetInfoResponse>;

    async fn netr_message_name_del(
        &self,
        req: NetrMessageNameDelRequest,
    ) -> Result<NetrMessageNameDelResponse>;

    fn conn(&self) -> &InterfaceClient;
}

#[derive(Clone, Debug)]
pub struct DefaultMsgsvcClient {
    cc: InterfaceClient,
}

impl DefaultMsgsvcClient {
    pub async fn new(conn: Arc<DceRpcClient>) -> Result<Self> {
        Ok(Self {
            cc: InterfaceClient::bind(conn, syntax()).await?,
        })
    }
}

#[async_trait]
impl MsgsvcClient for DefaultMsgsvcClient {
    async fn netr_message_name_add(
        &self,
        req: NetrMessageNameAddRequest,
    ) -> Result<NetrMessageNameAddResponse> {
        let mut op = NetrMessageNameAddOperation::default();
        req.to_op(&mut op);
        self.cc.invoke(&mut op).await?;
        check_win32(NetrMessageNameAddOperation::NAME, op.return_value)?;
        Ok(StatusResponse {
            return_value: op.return_value,
        })
    }

    async fn netr_message_name_enum(
        &self,
        req: NetrMessageNameEnumRequest,
    ) -> Result<NetrMessageNameEnumResponse> {
        let mut op = NetrMessageNameEnumOperation::default();
        req.to_op(&mut op);
        self.cc.invoke(&mut op).await?;
        let resp = NetrMessageNameEnumResponse::from_op(&mut op);
        check_win32(NetrMessageNameEnumOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn netr_message_name_get_info(
        &self,
        req: NetrMessageNameGetInfoRequest,
    ) -> Result<NetrMessageNameGetInfoResponse> {
        let mut op = NetrMessageNameGetInfoOperation::default();
        req.to_op(&mut op);
        self.cc.invoke(&mut op).await?;
        let resp = NetrMessageNameGetInfoResponse::from_op(&mut op);
        check_win32(NetrMessageNameGetInfoOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn netr_message_name_del(
        &self,
        req: NetrMessageNameDelRequest,
    ) -> Result<NetrMessageNameDelResponse> {
        let mut op = NetrMessageNameDelOperation::default();
        req.to_op(&mut op);
        self.cc.invoke(&mut op).await?;
        check_win32(NetrMessageNameDelOperation::NAME, op.return_value)?;
        Ok(StatusResponse {
            return_value: op.return_value,
        })
    }

    fn conn(&self) -> &InterfaceClient {
        &self.cc
    }
}

// Server

#[async_trait]
pub trait MsgsvcServer: Send + Sync {
    async fn netr_message_name_add(
        &self,
        req: NetrMessageNameAddRequest,
    ) -> Result<NetrMessageNameAddResponse>;

    async fn netr_message_name_enum(
        &self,
        req: NetrMessageNameEnumRequest,
    ) -> Result<NetrMessageNameEnumResponse>;

    async fn netr_message_name_get_info(
        &self,
        req: NetrMessageNameGetInfoRequest,
    ) -> Result<NetrMessageNameGetInfoResponse>;

    async fn netr_message_name_del(
        &self,
        req: NetrMessageNameDelRequest,
    ) -> Result<NetrMessageNameDelResponse>;
}

pub async fn msgsvc_dispatch<S: MsgsvcServer + ?Sized>(
    server: &S,
    opnum: u16,
    stub: Bytes,
    ndr: NdrContext,
) -> dcerpc::Result<Bytes> {
    match opnum {
        opnum::NETR_MESSAGE_NAME_ADD => {
            let mut op: NetrMessageNameAddOperation = decode_request(stub, ndr)?;
            let req = NetrMessageNameAddRequest::from_op(&mut op);
            op.return_value = server.netr_message_name_add(req).await?.return_value;
            encode_response(&op, NdrContext::new())
        }
        opnum::NETR_MESSAGE_NAME_ENUM => {
            let mut op: NetrMessageNameEnumOperation = decode_request(stub, ndr)?;
            let req = NetrMessageNameEnumRequest::from_op(&mut op);
            server.netr_message_name_enum(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::NETR_MESSAGE_NAME_GET_INFO => {
            let mut op: NetrMessageNameGetInfoOperation = decode_request(stub, ndr)?;
            let req = NetrMessageNameGetInfoRequest::from_op(&mut op);
            server.netr_message_name_get_info(req).await?.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::NETR_MESSAGE_NAME_DEL => {
            let mut op: NetrMessageNameDelOperation = decode_request(stub, ndr)?;
            let req = NetrMessageNameDelRequest::from_op(&mut op);
            op.return_value = server.netr_message_name_del(req).await?.return_value;
            encode_response(&op, NdrContext::new())
        }
        _ => Err(RpcError::OperationUnavailable(opnum)),
    }
}

pub fn new_msgsvc_interface<S: MsgsvcServer + ?Sized + 'static>(server: Arc<S>) -> Interface {
    InterfaceBuilder::from_syntax(syntax())
        .dispatch(move |call, stub| {
            let server = Arc::clone(&server);
            async move { msgsvc_dispatch(server.as_ref(), call.opnum, stub, call.ndr).await }
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcerpc::operation::{decode_response, encode_request};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Names {
        names: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MsgsvcServer for Names {
        async fn netr_message_name_add(
            &self,
            req: NetrMessageNameAddRequest,
        ) -> Result<NetrMessageNameAddResponse> {
            let mut names = self.names.lock();
            if names.iter().any(|n| n.eq_ignore_ascii_case(&req.msg_name)) {
                return Ok(StatusResponse {
                    return_value: status::NERR_DUPLICATE_NAME,
                });
            }
            names.push(req.msg_name.to_uppercase());
            Ok(StatusResponse::default())
        }

        async fn netr_message_name_enum(
            &self,
            req: NetrMessageNameEnumRequest,
        ) -> Result<NetrMessageNameEnumResponse> {
            let names = self.names.lock();
            let start = req.resume_handle.unwrap_or(0) as usize;
            let rest = names.iter().skip(start).cloned().map(Some);
            let info = match req.info.level {
                0 => MsgEnumInfo::Level0(Some(MsgInfoContainer::new(
                    rest.map(|name| MsgInfo0 { name }).collect(),
                ))),
                1 => MsgEnumInfo::Level1(Some(MsgInfoContainer::new(
                    rest.map(|name| MsgInfo1 {
                        name,
                        ..Default::default()
                    })
                    .collect(),
                ))),
                _ => {
                    return Ok(NetrMessageNameEnumResponse {
                        return_value: status::ERROR_INVALID_LEVEL,
                        ..Default::default()
                    })
                }
            };
            Ok(NetrMessageNameEnumResponse {
                info: MsgEnumStruct {
                    level: req.info.level,
                    info,
                },
                total_entries: names.len() as u32,
                resume_handle: req.resume_handle.map(|_| names.len() as u32),
                return_value: status::NERR_SUCCESS,
            })
        }

        async fn netr_message_name_get_info(
            &self,
            req: NetrMessageNameGetInfoRequest,
        ) -> Result<NetrMessageNameGetInfoResponse> {
            let names = self.names.lock();
            let Some(name) = names.iter().find(|n| n.eq_ignore_ascii_case(&req.msg_name)) else {
                return Ok(NetrMessageNameGetInfoResponse {
                    return_value: status::NERR_NAME_NOT_FOUND,
                    ..Default::default()
                });
            };
            let info = match req.level {
                0 => MsgInfo::Level0(Some(MsgInfo0 {
                    name: Some(name.clone()),
                })),
                1 => MsgInfo::Level1(Some(MsgInfo1 {
                    name: Some(name.clone()),
                    ..Default::default()
                })),
                _ => {
                    return Ok(NetrMessageNameGetInfoResponse {
                        return_value: status::ERROR_INVALID_LEVEL,
                        ..Default::default()
                    })
                }
            };
            Ok(NetrMessageNameGetInfoResponse {
                info,
                ..Default::default()
            })
        }

        async fn netr_message_name_del(
            &self,
            req: NetrMessageNameDelRequest,
        ) -> Result<NetrMessageNameDelResponse> {
            let mut names = self.names.lock();
            let before = names.len();
            names.retain(|n| !n.eq_ignore_ascii_case(&req.msg_name));
            let return_value = if names.len() == before {
                status::NERR_NAME_NOT_FOUND
            } else {
                status::NERR_SUCCESS
            };
            Ok(StatusResponse { return_value })
        }
    }

    async fn add(server: &Names, name: &str) -> u32 {
        let ctx = NdrContext::new();
        let mut op = NetrMessageNameAddOperation::default();
        NetrMessageNameAddRequest {
            server_name: None,
            msg_name: name.into(),
        }
        .to_op(&mut op);
        let stub = encode_request(&op, ctx).unwrap();
        let reply = msgsvc_dispatch(server, opnum::NETR_MESSAGE_NAME_ADD, stub, ctx)
            .await
            .unwrap();
        decode_response(&mut op, reply, ctx).unwrap();
        op.return_value
    }

    #[tokio::test]
    async fn test_add_rejects_duplicates() {
        let server = Names::default();
        assert_eq!(add(&server, "alice").await, status::NERR_SUCCESS);
        assert_eq!(add(&server, "ALICE").await, status::NERR_DUPLICATE_NAME);
    }

    #[tokio::test]
    async fn test_enum_level1_with_resume_handle() {
        let server = Names::default();
        for name in ["alice", "bob", "carol"] {
            add(&server, name).await;
        }

        let ctx = NdrContext::new();
        let mut op = NetrMessageNameEnumOperation::default();
        NetrMessageNameEnumRequest {
            info: MsgEnumStruct::for_level(1),
            pref_max_len: u32::MAX,
            resume_handle: Some(1),
            ..Default::default()
        }
        .to_op(&mut op);
        let stub = encode_request(&op, ctx).unwrap();
        let reply = msgsvc_dispatch(&server, opnum::NETR_MESSAGE_NAME_ENUM, stub, ctx)
            .await
            .unwrap();
        decode_response(&mut op, reply, ctx).unwrap();
        let resp = NetrMessageNameEnumResponse::from_op(&mut op);

        assert_eq!(resp.return_value, status::NERR_SUCCESS);
        assert_eq!(resp.total_entries, 3);
        assert_eq!(resp.resume_handle, Some(3));
        assert_eq!(resp.info.level, 1);
        let MsgEnumInfo::Level1(Some(container)) = resp.info.info else {
            panic!("expected a level 1 container");
        };
        assert_eq!(container.entries_read, 2);
        let names: Vec<_> = container
            .entries()
            .iter()
            .map(|e| e.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["BOB", "CAROL"]);
        assert!(container.entries().iter().all(|e| e.forward.is_none()));
    }

    #[test]
    fn test_enum_request_layout() {
        let mut w = NdrWriter::new();
        w.write_data(&MsgEnumStruct::for_level(0)).unwrap();
        let raw = w.finish();
        // level, switch, container referent, entries_read, null buffer
        assert_eq!(raw.len(), 20);
        assert_eq!(&raw[0..4], &0u32.to_le_bytes());
        assert_eq!(&raw[4..8], &0u32.to_le_bytes());
        assert_ne!(&raw[8..12], &[0, 0, 0, 0]);
        assert_eq!(&raw[12..20], &[0; 8]);
    }

    #[test]
    fn test_enum_struct_switch_comes_from_level() {
        let mut w = NdrWriter::new();
        w.write_data(&MsgEnumStruct::for_level(1)).unwrap();
        let raw = w.finish();
        assert_eq!(&raw[0..4], &1u32.to_le_bytes());
        assert_eq!(&raw[4..8], &1u32.to_le_bytes());

        // level 1 with the level 0 arm is refused, not sent with switch 0
        let mut w = NdrWriter::new();
        let err = w
            .write_data(&MsgEnumStruct {
                level: 1,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(
            err,
            NdrError::SwitchMismatch {
                expected: 1,
                actual: 0
            }
        ));

        // a frame whose switch disagrees with its level is refused on decode
        let mut w = NdrWriter::new();
        w.write_u32(1);
        w.write_u32(0);
        w.write_u32(0);
        let mut r = NdrReader::new(w.finish());
        assert!(matches!(
            r.read_data::<MsgEnumStruct>(),
            Err(NdrError::SwitchMismatch {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_get_info_union_follows_level() {
        let server = Names::default();
        add(&server, "alice").await;
        let ctx = NdrContext::new();

        for level in [0, 1] {
            let mut op = NetrMessageNameGetInfoOperation::default();
            NetrMessageNameGetInfoRequest {
                msg_name: "Alice".into(),
                level,
                ..Default::default()
            }
            .to_op(&mut op);
            let stub = encode_request(&op, ctx).unwrap();
            let reply = msgsvc_dispatch(&server, opnum::NETR_MESSAGE_NAME_GET_INFO, stub, ctx)
                .await
                .unwrap();
            assert_eq!(&reply[0..4], &level.to_le_bytes());
            decode_response(&mut op, reply, ctx).unwrap();
            let resp = NetrMessageNameGetInfoResponse::from_op(&mut op);
            match resp.info {
                MsgInfo::Level0(Some(info)) => assert_eq!(info.name.as_deref(), Some("ALICE")),
                MsgInfo::Level1(Some(info)) => {
                    assert_eq!(info.name.as_deref(), Some("ALICE"));
                    assert_eq!(info.forward_flag, 0);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_get_info_reply_is_keyed_by_request_level_zero() {
        let mut op = NetrMessageNameGetInfoOperation {
            level: 0,
            ..Default::default()
        };
        NetrMessageNameGetInfoResponse {
            level: 1,
            info: MsgInfo::Level1(Some(MsgInfo1::default())),
            return_value: status::NERR_SUCCESS,
        }
        .to_op(&mut op);
        assert_eq!(op.level, 0);

        let mut w = NdrWriter::new();
        op.marshal_response(&mut w).unwrap();
        let raw = w.finish();
        // switch 0, null level 0 pointer, status
        assert_eq!(&raw[..], &[0u8; 12][..]);
    }

    #[tokio::test]
    async fn test_get_info_failure_keeps_level_arm() {
        let server = Names::default();
        let ctx = NdrContext::new();
        let mut op = NetrMessageNameGetInfoOperation::default();
        NetrMessageNameGetInfoRequest {
            msg_name: "nobody".into(),
            level: 1,
            ..Default::default()
        }
        .to_op(&mut op);
        let stub = encode_request(&op, ctx).unwrap();
        let reply = msgsvc_dispatch(&server, opnum::NETR_MESSAGE_NAME_GET_INFO, stub, ctx)
            .await
            .unwrap();
        // switch 1, null pointer, status
        let mut expected = Vec::new();
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&[0; 4]);
        expected.extend_from_slice(&status::NERR_NAME_NOT_FOUND.to_le_bytes());
        assert_eq!(&reply[..], &expected[..]);
        decode_response(&mut op, reply, ctx).unwrap();
        let err = check_win32(
            NetrMessageNameGetInfoOperation::NAME,
            NetrMessageNameGetInfoResponse::from_op(&mut op).return_value,
        )
        .unwrap_err();
        assert!(err.to_string().contains("NetrMessageNameGetInfo"));
    }

    #[tokio::test]
    async fn test_delete() {
        let server = Names::default();
        add(&server, "alice").await;
        let ctx = NdrContext::new();
        for expected in [status::NERR_SUCCESS, status::NERR_NAME_NOT_FOUND] {
            let mut op = NetrMessageNameDelOperation::default();
            NetrMessageNameDelRequest {
                server_name: Some("HOST".into()),
                msg_name: "alice".into(),
            }
            .to_op(&mut op);
            let stub = encode_request(&op, ctx).unwrap();
            let reply = msgsvc_dispatch(&server, opnum::NETR_MESSAGE_NAME_DEL, stub, ctx)
                .await
                .unwrap();
            assert_eq!(&reply[..], &expected.to_le_bytes());
        }
    }
}
