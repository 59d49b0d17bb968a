//! IRemUnknown and IRemUnknown2 wire protocol (MS-DCOM 3.1.1.5.6)

use dcerpc::{Operation, SyntaxId, Uuid};
use midl_ndr::{NdrDecode, NdrEncode, NdrReader, NdrWriter, Result, UniquePtr};

use crate::types::{Iid, Ipid, MInterfacePointer, OrpcThat, OrpcThis, StdObjRef};

pub const SYNTAX_UUID: Uuid = Uuid::from_u128(0x00000131_0000_0000_c000_000000000046);
pub const MAJOR_VERSION: u16 = 0;
pub const MINOR_VERSION: u16 = 0;

pub fn syntax() -> SyntaxId {
    SyntaxId::new(SYNTAX_UUID, MAJOR_VERSION, MINOR_VERSION)
}

/// IRemUnknown2 extends IRemUnknown with RemQueryInterface2
pub mod v2 {
    use dcerpc::{SyntaxId, Uuid};

    pub const SYNTAX_UUID: Uuid = Uuid::from_u128(0x00000143_0000_0000_c000_000000000046);
    pub const MAJOR_VERSION: u16 = 0;
    pub const MINOR_VERSION: u16 = 0;

    pub fn syntax() -> SyntaxId {
        SyntaxId::new(SYNTAX_UUID, MAJOR_VERSION, MINOR_VERSION)
    }
}

pub mod opnum {
    pub const REM_QUERY_INTERFACE: u16 = 3;
    pub const REM_ADD_REF: u16 = 4;
    pub const REM_RELEASE: u16 = 5;
    pub const REM_QUERY_INTERFACE2: u16 = 6;
}

/// REMQIRESULT
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemQiResult {
    pub hresult: i32,
    pub std: StdObjRef,
}

impl NdrEncode for RemQiResult {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.align(8);
        w.write_i32(self.hresult);
        self.std.ndr_encode(w)
    }
}

impl NdrDecode for RemQiResult {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        r.align(8)?;
        Ok(Self {
            hresult: r.read_i32()?,
            std: StdObjRef::ndr_decode(r)?,
        })
    }
}

/// REMINTERFACEREF
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemInterfaceRef {
    pub ipid: Ipid,
    pub public_refs: u32,
    pub private_refs: u32,
}

impl RemInterfaceRef {
    pub fn new(ipid: Ipid, public_refs: u32) -> Self {
        Self {
            ipid,
            public_refs,
            private_refs: 0,
        }
    }
}

impl NdrEncode for RemInterfaceRef {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        self.ipid.ndr_encode(w)?;
        w.write_u32(self.public_refs);
        w.write_u32(self.private_refs);
        Ok(())
    }
}

impl NdrDecode for RemInterfaceRef {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        Ok(Self {
            ipid: Ipid::ndr_decode(r)?,
            public_refs: r.read_u32()?,
            private_refs: r.read_u32()?,
        })
    }
}

fn count_u16(explicit: u16, len: usize) -> u16 {
    if explicit == 0 {
        len as u16
    } else {
        explicit
    }
}

// RemQueryInterface

#[derive(Clone, Debug, Default)]
pub struct RemQueryInterfaceRequest {
    pub this: Option<OrpcThis>,
    /// IPID of the interface whose object is queried
    pub ripid: Ipid,
    /// Public references requested for each returned interface
    pub refs: u32,
    pub iids: Vec<Iid>,
}

impl RemQueryInterfaceRequest {
    pub(super) fn to_op(self, op: &mut RemQueryInterfaceOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.ripid = self.ripid;
        op.refs = self.refs;
        op.iids_count = self.iids.len() as u16;
        op.iids = self.iids;
    }

    pub(super) fn from_op(op: &mut RemQueryInterfaceOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            ripid: op.ripid,
            refs: op.refs,
            iids: std::mem::take(&mut op.iids),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RemQueryInterfaceResponse {
    pub that: Option<OrpcThat>,
    /// Sizes `qi_results` on the wire; taken from the request when zero
    pub iids_count: u16,
    pub qi_results: Vec<RemQiResult>,
    pub return_value: i32,
}

impl RemQueryInterfaceResponse {
    pub(super) fn to_op(self, op: &mut RemQueryInterfaceOperation) {
        if op.iids_count == 0 {
            op.iids_count = self.iids_count;
        }
        op.that = self.that.unwrap_or_default();
        op.qi_results = self.qi_results;
        op.return_value = self.return_value;
    }

    pub(super) fn from_op(op: &mut RemQueryInterfaceOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            iids_count: op.iids_count,
            qi_results: std::mem::take(&mut op.qi_results),
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct RemQueryInterfaceOperation {
    this: OrpcThis,
    that: OrpcThat,
    ripid: Ipid,
    refs: u32,
    iids_count: u16,
    iids: Vec<Iid>,
    qi_results: Vec<RemQiResult>,
    return_value: i32,
}

impl Operation for RemQueryInterfaceOperation {
    const OPNUM: u16 = opnum::REM_QUERY_INTERFACE;
    const NAME: &'static str = "/IRemUnknown/v0/RemQueryInterface";

    fn marshal_request(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_data(&self.this)?;
        w.write_data(&self.ripid)?;
        w.write_u32(self.refs);
        let count = count_u16(self.iids_count, self.iids.len());
        w.write_u16(count);
        w.write_array(&self.iids, count as usize)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> Result<()> {
        self.this = r.read_data()?;
        self.ripid = r.read_data()?;
        self.refs = r.read_u32()?;
        self.iids_count = r.read_u16()?;
        self.iids = r.read_array("iids")?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_data(&self.that)?;
        let count = self.iids_count as usize;
        w.write_pointer(!self.qi_results.is_empty() || count > 0)?;
        if !self.qi_results.is_empty() || count > 0 {
            w.write_array(&self.qi_results, count)?;
        }
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> Result<()> {
        self.that = r.read_data()?;
        self.qi_results = if r.read_pointer()? {
            r.read_array("ppQIResults")?
        } else {
            Vec::new()
        };
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// RemAddRef

#[derive(Clone, Debug, Default)]
pub struct RemAddRefRequest {
    pub this: Option<OrpcThis>,
    pub interface_refs: Vec<RemInterfaceRef>,
}

impl RemAddRefRequest {
    pub(super) fn to_op(self, op: &mut RemAddRefOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.interface_refs_count = self.interface_refs.len() as u16;
        op.interface_refs = self.interface_refs;
    }

    pub(super) fn from_op(op: &mut RemAddRefOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            interface_refs: std::mem::take(&mut op.interface_refs),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RemAddRefResponse {
    pub that: Option<OrpcThat>,
    /// Sizes `results` on the wire; taken from the request when zero
    pub interface_refs_count: u16,
    /// One HRESULT per requested reference
    pub results: Vec<i32>,
    pub return_value: i32,
}

impl RemAddRefResponse {
    pub(super) fn to_op(self, op: &mut RemAddRefOperation) {
        if op.interface_refs_count == 0 {
            op.interface_refs_count = self.interface_refs_count;
        }
        op.that = self.that.unwrap_or_default();
        op.results = self.results;
        op.return_value = self.return_value;
    }

    pub(super) fn from_op(op: &mut RemAddRefOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            interface_refs_count: op.interface_refs_count,
            results: std::mem::take(&mut op.results),
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct RemAddRefOperation {
    this: OrpcThis,
    that: OrpcThat,
    interface_refs_count: u16,
    interface_refs: Vec<RemInterfaceRef>,
    results: Vec<i32>,
    return_value: i32,
}

impl Operation for RemAddRefOperation {
    const OPNUM: u16 = opnum::REM_ADD_REF;
    const NAME: &'static str = "/IRemUnknown/v0/RemAddRef";

    fn marshal_request(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_data(&self.this)?;
        let count = count_u16(self.interface_refs_count, self.interface_refs.len());
        w.write_u16(count);
        w.write_array(&self.interface_refs, count as usize)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> Result<()> {
        self.this = r.read_data()?;
        self.interface_refs_count = r.read_u16()?;
        self.interface_refs = r.read_array("InterfaceRefs")?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_data(&self.that)?;
        w.write_array(&self.results, self.interface_refs_count as usize)?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> Result<()> {
        self.that = r.read_data()?;
        self.results = r.read_array("pResults")?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// RemRelease

#[derive(Clone, Debug, Default)]
pub struct RemReleaseRequest {
    pub this: Option<OrpcThis>,
    pub interface_refs: Vec<RemInterfaceRef>,
}

impl RemReleaseRequest {
    pub(super) fn to_op(self, op: &mut RemReleaseOperation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.interface_refs_count = self.interface_refs.len() as u16;
        op.interface_refs = self.interface_refs;
    }

    pub(super) fn from_op(op: &mut RemReleaseOperation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            interface_refs: std::mem::take(&mut op.interface_refs),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RemReleaseResponse {
    pub that: Option<OrpcThat>,
    pub return_value: i32,
}

impl RemReleaseResponse {
    pub(super) fn to_op(self, op: &mut RemReleaseOperation) {
        op.that = self.that.unwrap_or_default();
        op.return_value = self.return_value;
    }

    pub(super) fn from_op(op: &mut RemReleaseOperation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct RemReleaseOperation {
    this: OrpcThis,
    that: OrpcThat,
    interface_refs_count: u16,
    interface_refs: Vec<RemInterfaceRef>,
    return_value: i32,
}

impl Operation for RemReleaseOperation {
    const OPNUM: u16 = opnum::REM_RELEASE;
    const NAME: &'static str = "/IRemUnknown/v0/RemRelease";

    fn marshal_request(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_data(&self.this)?;
        let count = count_u16(self.interface_refs_count, self.interface_refs.len());
        w.write_u16(count);
        w.write_array(&self.interface_refs, count as usize)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> Result<()> {
        self.this = r.read_data()?;
        self.interface_refs_count = r.read_u16()?;
        self.interface_refs = r.read_array("InterfaceRefs")?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_data(&self.that)?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> Result<()> {
        self.that = r.read_data()?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}

// RemQueryInterface2

#[derive(Clone, Debug, Default)]
pub struct RemQueryInterface2Request {
    pub this: Option<OrpcThis>,
    pub ripid: Ipid,
    pub iids: Vec<Iid>,
}

impl RemQueryInterface2Request {
    pub(super) fn to_op(self, op: &mut RemQueryInterface2Operation) {
        op.this = self.this.unwrap_or_else(OrpcThis::new);
        op.ripid = self.ripid;
        op.iids_count = self.iids.len() as u16;
        op.iids = self.iids;
    }

    pub(super) fn from_op(op: &mut RemQueryInterface2Operation) -> Self {
        Self {
            this: Some(std::mem::take(&mut op.this)),
            ripid: op.ripid,
            iids: std::mem::take(&mut op.iids),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RemQueryInterface2Response {
    pub that: Option<OrpcThat>,
    /// Sizes both out arrays; taken from the request when zero
    pub iids_count: u16,
    pub hrs: Vec<i32>,
    /// One entry per requested IID; `None` where the query failed
    pub interface_pointers: Vec<Option<MInterfacePointer>>,
    pub return_value: i32,
}

impl RemQueryInterface2Response {
    pub(super) fn to_op(self, op: &mut RemQueryInterface2Operation) {
        if op.iids_count == 0 {
            op.iids_count = self.iids_count;
        }
        op.that = self.that.unwrap_or_default();
        op.hrs = self.hrs;
        op.interface_pointers = self
            .interface_pointers
            .into_iter()
            .map(UniquePtr::from)
            .collect();
        op.return_value = self.return_value;
    }

    pub(super) fn from_op(op: &mut RemQueryInterface2Operation) -> Self {
        Self {
            that: Some(std::mem::take(&mut op.that)),
            iids_count: op.iids_count,
            hrs: std::mem::take(&mut op.hrs),
            interface_pointers: std::mem::take(&mut op.interface_pointers)
                .into_iter()
                .map(UniquePtr::into_option)
                .collect(),
            return_value: op.return_value,
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct RemQueryInterface2Operation {
    this: OrpcThis,
    that: OrpcThat,
    ripid: Ipid,
    iids_count: u16,
    iids: Vec<Iid>,
    hrs: Vec<i32>,
    interface_pointers: Vec<UniquePtr<MInterfacePointer>>,
    return_value: i32,
}

impl Operation for RemQueryInterface2Operation {
    const OPNUM: u16 = opnum::REM_QUERY_INTERFACE2;
    const NAME: &'static str = "/IRemUnknown2/v0/RemQueryInterface2";

    fn marshal_request(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_data(&self.this)?;
        w.write_data(&self.ripid)?;
        let count = count_u16(self.iids_count, self.iids.len());
        w.write_u16(count);
        w.write_array(&self.iids, count as usize)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> Result<()> {
        self.this = r.read_data()?;
        self.ripid = r.read_data()?;
        self.iids_count = r.read_u16()?;
        self.iids = r.read_array("iids")?;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_data(&self.that)?;
        let count = self.iids_count as usize;
        w.write_array(&self.hrs, count)?;
        w.write_array(&self.interface_pointers, count)?;
        w.write_i32(self.return_value);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> Result<()> {
        self.that = r.read_data()?;
        self.hrs = r.read_array("phr")?;
        self.interface_pointers = r.read_array("ppMIF")?;
        self.return_value = r.read_i32()?;
        Ok(())
    }
}
