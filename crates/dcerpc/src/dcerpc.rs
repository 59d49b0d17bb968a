//! DCE RPC PDU (Protocol Data Unit) types
//!
//! Connection-oriented PDUs as defined in DCE 1.1 (C706) chapter 12 and
//! MS-RPCE 2.2.2.
//!
//! DCE RPC PDU Header Format:
//! ```text
//! +--------+--------+--------+--------+
//! |  vers  |vers_min| ptype  | pflags |
//! +--------+--------+--------+--------+
//! |        data representation        |
//! +--------+--------+--------+--------+
//! |   frag_len      |   auth_len      |
//! +--------+--------+--------+--------+
//! |             call_id               |
//! +--------+--------+--------+--------+
//! ```
//!
//! Multi-byte header and body fields follow the integer representation in
//! the data representation label.

use bytes::{BufMut, Bytes, BytesMut};
use midl_ndr::NdrContext;

use crate::error::{Result, RpcError};

pub use midl_ndr::Guid as Uuid;

/// DCE RPC protocol version
pub const DCE_RPC_VERSION: u8 = 5;
/// DCE RPC protocol minor version
pub const DCE_RPC_VERSION_MINOR: u8 = 0;

/// Fragment size both sides start from before negotiation
pub const DEFAULT_MAX_FRAG: u16 = 4280;
/// Smallest max_recv_frag a peer may advertise
pub const MIN_FRAG: u16 = 1432;

/// NDR transfer syntax UUID
pub const NDR_SYNTAX_UUID: Uuid = Uuid::from_u128(0x8a885d04_1ceb_11c9_9fe8_08002b104860);
pub const NDR_SYNTAX_VERSION: u32 = 2;

/// Connection-oriented packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 2,
    Fault = 3,
    Bind = 11,
    BindAck = 12,
    BindNak = 13,
    AlterContext = 14,
    AlterContextResp = 15,
    Shutdown = 17,
    CoCancel = 18,
    Orphaned = 19,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Fault),
            11 => Some(Self::Bind),
            12 => Some(Self::BindAck),
            13 => Some(Self::BindNak),
            14 => Some(Self::AlterContext),
            15 => Some(Self::AlterContextResp),
            17 => Some(Self::Shutdown),
            18 => Some(Self::CoCancel),
            19 => Some(Self::Orphaned),
            _ => None,
        }
    }
}

/// Packet flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const FIRST_FRAG: u8 = 0x01;
    pub const LAST_FRAG: u8 = 0x02;
    pub const PENDING_CANCEL: u8 = 0x04;
    pub const CONC_MPX: u8 = 0x10;
    pub const DID_NOT_EXECUTE: u8 = 0x20;
    pub const MAYBE: u8 = 0x40;
    /// Request carries an object UUID after the body header
    pub const OBJECT_UUID: u8 = 0x80;

    pub fn new() -> Self {
        Self(0)
    }

    /// Single-fragment PDU
    pub fn complete() -> Self {
        Self(Self::FIRST_FRAG | Self::LAST_FRAG)
    }

    pub fn set(&mut self, flag: u8) -> &mut Self {
        self.0 |= flag;
        self
    }

    pub fn clear(&mut self, flag: u8) -> &mut Self {
        self.0 &= !flag;
        self
    }

    pub fn is_set(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn is_first_frag(&self) -> bool {
        self.is_set(Self::FIRST_FRAG)
    }

    pub fn is_last_frag(&self) -> bool {
        self.is_set(Self::LAST_FRAG)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

/// Data Representation Format Label
///
/// Byte 0 holds the character representation in the low nibble and the
/// integer representation in the high nibble; byte 1 is the floating point
/// representation. For little-endian ASCII IEEE: `[0x10, 0x00, 0x00, 0x00]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRepresentation {
    pub int_rep: IntRep,
    pub char_rep: CharRep,
    pub float_rep: FloatRep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntRep {
    BigEndian = 0,
    LittleEndian = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharRep {
    Ascii = 0,
    Ebcdic = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatRep {
    Ieee = 0,
    Vax = 1,
    Cray = 2,
    Ibm = 3,
}

impl DataRepresentation {
    /// Little-endian, ASCII, IEEE
    pub fn ndr() -> Self {
        Self {
            int_rep: IntRep::LittleEndian,
            char_rep: CharRep::Ascii,
            float_rep: FloatRep::Ieee,
        }
    }

    pub fn big_endian() -> Self {
        Self {
            int_rep: IntRep::BigEndian,
            ..Self::ndr()
        }
    }

    pub fn encode(&self) -> [u8; 4] {
        let byte0 = (self.char_rep as u8) | ((self.int_rep as u8) << 4);
        [byte0, self.float_rep as u8, 0, 0]
    }

    pub fn decode(data: [u8; 4]) -> Self {
        let int_rep = if data[0] & 0xF0 == 0 {
            IntRep::BigEndian
        } else {
            IntRep::LittleEndian
        };
        let char_rep = if data[0] & 0x0F == 0 {
            CharRep::Ascii
        } else {
            CharRep::Ebcdic
        };
        let float_rep = match data[1] {
            0 => FloatRep::Ieee,
            1 => FloatRep::Vax,
            2 => FloatRep::Cray,
            _ => FloatRep::Ibm,
        };
        Self { int_rep, char_rep, float_rep }
    }

    pub fn is_little_endian(&self) -> bool {
        self.int_rep == IntRep::LittleEndian
    }

    /// NDR byte-order context for the stub data carried under this label
    pub fn ndr_context(&self) -> NdrContext {
        NdrContext::from_drep(self.encode()[0])
    }
}

impl Default for DataRepresentation {
    fn default() -> Self {
        Self::ndr()
    }
}

/// Syntax ID: interface UUID with version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntaxId {
    pub uuid: Uuid,
    /// major in the low 16 bits, minor in the high 16 bits
    pub version: u32,
}

impl SyntaxId {
    pub fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self {
            uuid,
            version: (major as u32) | ((minor as u32) << 16),
        }
    }

    /// NDR20 transfer syntax
    pub fn ndr20() -> Self {
        Self::new(NDR_SYNTAX_UUID, NDR_SYNTAX_VERSION as u16, 0)
    }

    pub fn major_version(&self) -> u16 {
        self.version as u16
    }

    pub fn minor_version(&self) -> u16 {
        (self.version >> 16) as u16
    }

    fn encode(&self, out: &mut PduWriter) {
        out.uuid(&self.uuid);
        out.u32(self.version);
    }

    fn decode(cur: &mut PduCursor<'_>) -> Result<Self> {
        let uuid = cur.uuid()?;
        let version = cur.u32()?;
        Ok(Self { uuid, version })
    }
}

impl std::fmt::Display for SyntaxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}.{}", self.uuid, self.major_version(), self.minor_version())
    }
}

/// Body writer honouring the label's integer representation
struct PduWriter {
    buf: BytesMut,
    ctx: NdrContext,
}

impl PduWriter {
    fn new(data_rep: DataRepresentation, capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(PduHeader::SIZE + capacity);
        buf.put_bytes(0, PduHeader::SIZE);
        Self { buf, ctx: data_rep.ndr_context() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    fn u16(&mut self, v: u16) {
        self.ctx.put_u16(&mut self.buf, v);
    }

    fn u32(&mut self, v: u32) {
        self.ctx.put_u32(&mut self.buf, v);
    }

    fn uuid(&mut self, uuid: &Uuid) {
        self.u32(uuid.data1);
        self.u16(uuid.data2);
        self.u16(uuid.data3);
        self.buf.put_slice(&uuid.data4);
    }

    fn bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Pad to `n` relative to the start of the PDU
    fn align(&mut self, n: usize) {
        let pad = NdrContext::align_padding(self.buf.len(), n);
        self.buf.put_bytes(0, pad);
    }

    /// Patch the header in with the final fragment length
    fn finish(mut self, header: &PduHeader) -> Result<Bytes> {
        let frag_length = u16::try_from(self.buf.len()).map_err(|_| RpcError::PduTooLarge {
            size: self.buf.len(),
            max: u16::MAX as usize,
        })?;
        let mut header = header.clone();
        header.frag_length = frag_length;
        let mut head = BytesMut::with_capacity(PduHeader::SIZE);
        header.encode(&mut head);
        self.buf[..PduHeader::SIZE].copy_from_slice(&head);
        Ok(self.buf.freeze())
    }
}

/// Bounds-checked body reader; positions are relative to the PDU start
struct PduCursor<'a> {
    data: &'a [u8],
    pos: usize,
    ctx: NdrContext,
}

impl<'a> PduCursor<'a> {
    fn new(data: &'a [u8], header: &PduHeader) -> Result<Self> {
        let end = header.frag_length as usize;
        if data.len() < end || end < PduHeader::SIZE {
            return Err(RpcError::InvalidPduData(format!(
                "fragment length {} does not match {} bytes",
                end,
                data.len()
            )));
        }
        Ok(Self {
            data: &data[..end],
            pos: PduHeader::SIZE,
            ctx: header.data_rep.ndr_context(),
        })
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.data.len() - self.pos < n {
            return Err(RpcError::InvalidPduData(format!("truncated {}", what)));
        }
        Ok(())
    }

    fn chunk(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        self.need(n, what)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.chunk(1, "u8")?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let mut raw = self.chunk(2, "u16")?;
        Ok(self.ctx.get_u16(&mut raw))
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = self.chunk(4, "u32")?;
        Ok(self.ctx.get_u32(&mut raw))
    }

    fn uuid(&mut self) -> Result<Uuid> {
        let data1 = self.u32()?;
        let data2 = self.u16()?;
        let data3 = self.u16()?;
        let mut data4 = [0u8; 8];
        data4.copy_from_slice(self.chunk(8, "uuid")?);
        Ok(Uuid::from_fields(data1, data2, data3, data4))
    }

    fn align(&mut self, n: usize) -> Result<()> {
        let pad = NdrContext::align_padding(self.pos, n);
        self.chunk(pad, "padding").map(|_| ())
    }

    fn rest(&mut self) -> Bytes {
        let out = Bytes::copy_from_slice(&self.data[self.pos..]);
        self.pos = self.data.len();
        out
    }
}

/// Common PDU header (16 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduHeader {
    pub version: u8,
    pub version_minor: u8,
    pub packet_type: PacketType,
    pub packet_flags: PacketFlags,
    pub data_rep: DataRepresentation,
    pub frag_length: u16,
    pub auth_length: u16,
    pub call_id: u32,
}

impl PduHeader {
    pub const SIZE: usize = 16;

    pub fn new(packet_type: PacketType, call_id: u32) -> Self {
        Self {
            version: DCE_RPC_VERSION,
            version_minor: DCE_RPC_VERSION_MINOR,
            packet_type,
            packet_flags: PacketFlags::complete(),
            data_rep: DataRepresentation::ndr(),
            frag_length: 0, // set when encoding
            auth_length: 0,
            call_id,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let ctx = self.data_rep.ndr_context();
        buf.put_u8(self.version);
        buf.put_u8(self.version_minor);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.packet_flags.as_u8());
        buf.put_slice(&self.data_rep.encode());
        ctx.put_u16(buf, self.frag_length);
        ctx.put_u16(buf, self.auth_length);
        ctx.put_u32(buf, self.call_id);
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(RpcError::InvalidPduData(format!(
                "PDU header too short: {} bytes",
                data.len()
            )));
        }

        let version = data[0];
        if version != DCE_RPC_VERSION {
            return Err(RpcError::VersionMismatch {
                expected: DCE_RPC_VERSION,
                got: version,
            });
        }

        let packet_type =
            PacketType::from_u8(data[2]).ok_or(RpcError::InvalidMessageType(data[2] as i32))?;
        let data_rep = DataRepresentation::decode([data[4], data[5], data[6], data[7]]);
        let ctx = data_rep.ndr_context();
        let mut rest = &data[8..Self::SIZE];

        Ok(Self {
            version,
            version_minor: data[1],
            packet_type,
            packet_flags: PacketFlags::from_u8(data[3]),
            data_rep,
            frag_length: ctx.get_u16(&mut rest),
            auth_length: ctx.get_u16(&mut rest),
            call_id: ctx.get_u32(&mut rest),
        })
    }

    fn expect(data: &[u8], types: &[PacketType]) -> Result<Self> {
        let header = Self::decode(data)?;
        if !types.contains(&header.packet_type) {
            return Err(RpcError::InvalidMessageType(header.packet_type as i32));
        }
        Ok(header)
    }
}

/// Presentation context element of a bind or alter_context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextElement {
    pub context_id: u16,
    pub abstract_syntax: SyntaxId,
    pub transfer_syntaxes: Vec<SyntaxId>,
}

impl ContextElement {
    pub fn new(context_id: u16, abstract_syntax: SyntaxId) -> Self {
        Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes: vec![SyntaxId::ndr20()],
        }
    }

    fn encode(&self, out: &mut PduWriter) {
        out.u16(self.context_id);
        out.u8(self.transfer_syntaxes.len() as u8);
        out.u8(0);
        self.abstract_syntax.encode(out);
        for ts in &self.transfer_syntaxes {
            ts.encode(out);
        }
    }

    fn decode(cur: &mut PduCursor<'_>) -> Result<Self> {
        let context_id = cur.u16()?;
        let count = cur.u8()?;
        let _reserved = cur.u8()?;
        let abstract_syntax = SyntaxId::decode(cur)?;
        let mut transfer_syntaxes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            transfer_syntaxes.push(SyntaxId::decode(cur)?);
        }
        Ok(Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes,
        })
    }
}

/// Bind PDU. Alter-context shares the layout and differs only in the
/// packet type.
#[derive(Debug, Clone)]
pub struct BindPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub context_list: Vec<ContextElement>,
}

impl BindPdu {
    pub fn new(call_id: u32, interface: SyntaxId) -> Self {
        Self {
            header: PduHeader::new(PacketType::Bind, call_id),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id: 0,
            context_list: vec![ContextElement::new(0, interface)],
        }
    }

    /// Alter-context adding `interface` as presentation context `context_id`
    pub fn alter_context(call_id: u32, context_id: u16, interface: SyntaxId) -> Self {
        Self {
            header: PduHeader::new(PacketType::AlterContext, call_id),
            context_list: vec![ContextElement::new(context_id, interface)],
            ..Self::new(call_id, interface)
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut out = PduWriter::new(self.header.data_rep, 128);
        out.u16(self.max_xmit_frag);
        out.u16(self.max_recv_frag);
        out.u32(self.assoc_group_id);
        out.u8(self.context_list.len() as u8);
        out.u8(0);
        out.u16(0);
        for ctx in &self.context_list {
            ctx.encode(&mut out);
        }
        out.finish(&self.header)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::expect(data, &[PacketType::Bind, PacketType::AlterContext])?;
        let mut cur = PduCursor::new(data, &header)?;
        let max_xmit_frag = cur.u16()?;
        let max_recv_frag = cur.u16()?;
        let assoc_group_id = cur.u32()?;
        let count = cur.u8()?;
        let _reserved = cur.u8()?;
        let _reserved2 = cur.u16()?;
        let mut context_list = Vec::with_capacity(count as usize);
        for _ in 0..count {
            context_list.push(ContextElement::decode(&mut cur)?);
        }
        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            context_list,
        })
    }
}

/// Presentation context negotiation result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContextResult {
    Acceptance = 0,
    UserRejection = 1,
    ProviderRejection = 2,
}

/// Reason attached to a provider rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProviderReason {
    NotSpecified = 0,
    AbstractSyntaxNotSupported = 1,
    ProposedTransferSyntaxesNotSupported = 2,
    LocalLimitExceeded = 3,
}

impl ProviderReason {
    fn from_u16(v: u16) -> Self {
        match v {
            1 => Self::AbstractSyntaxNotSupported,
            2 => Self::ProposedTransferSyntaxesNotSupported,
            3 => Self::LocalLimitExceeded,
            _ => Self::NotSpecified,
        }
    }
}

/// One entry of the bind_ack result list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextResultEntry {
    pub result: ContextResult,
    pub reason: ProviderReason,
    pub transfer_syntax: SyntaxId,
}

impl ContextResultEntry {
    pub fn accepted() -> Self {
        Self {
            result: ContextResult::Acceptance,
            reason: ProviderReason::NotSpecified,
            transfer_syntax: SyntaxId::ndr20(),
        }
    }

    pub fn rejected(reason: ProviderReason) -> Self {
        Self {
            result: ContextResult::ProviderRejection,
            reason,
            transfer_syntax: SyntaxId::new(Uuid::NIL, 0, 0),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == ContextResult::Acceptance
    }
}

/// Bind acknowledgment PDU; also used for alter_context_resp
#[derive(Debug, Clone)]
pub struct BindAckPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub secondary_addr: String,
    pub results: Vec<ContextResultEntry>,
}

impl BindAckPdu {
    pub fn new(call_id: u32, assoc_group_id: u32, results: Vec<ContextResultEntry>) -> Self {
        Self {
            header: PduHeader::new(PacketType::BindAck, call_id),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id,
            secondary_addr: String::new(),
            results,
        }
    }

    pub fn alter_context_resp(
        call_id: u32,
        assoc_group_id: u32,
        results: Vec<ContextResultEntry>,
    ) -> Self {
        let mut pdu = Self::new(call_id, assoc_group_id, results);
        pdu.header.packet_type = PacketType::AlterContextResp;
        pdu
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut out = PduWriter::new(self.header.data_rep, 128);
        out.u16(self.max_xmit_frag);
        out.u16(self.max_recv_frag);
        out.u32(self.assoc_group_id);

        // port_any_t: length including the terminator, then the string
        let addr = self.secondary_addr.as_bytes();
        out.u16(addr.len() as u16 + 1);
        out.bytes(addr);
        out.u8(0);
        out.align(4);

        out.u8(self.results.len() as u8);
        out.u8(0);
        out.u16(0);
        for entry in &self.results {
            out.u16(entry.result as u16);
            out.u16(entry.reason as u16);
            entry.transfer_syntax.encode(&mut out);
        }
        out.finish(&self.header)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header =
            PduHeader::expect(data, &[PacketType::BindAck, PacketType::AlterContextResp])?;
        let mut cur = PduCursor::new(data, &header)?;
        let max_xmit_frag = cur.u16()?;
        let max_recv_frag = cur.u16()?;
        let assoc_group_id = cur.u32()?;

        let addr_len = cur.u16()? as usize;
        let mut addr = cur.chunk(addr_len, "secondary address")?.to_vec();
        if addr.last() == Some(&0) {
            addr.pop();
        }
        let secondary_addr = String::from_utf8_lossy(&addr).into_owned();
        cur.align(4)?;

        let count = cur.u8()?;
        let _reserved = cur.u8()?;
        let _reserved2 = cur.u16()?;
        let mut results = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let result = match cur.u16()? {
                0 => ContextResult::Acceptance,
                1 => ContextResult::UserRejection,
                _ => ContextResult::ProviderRejection,
            };
            let reason = ProviderReason::from_u16(cur.u16()?);
            let transfer_syntax = SyntaxId::decode(&mut cur)?;
            results.push(ContextResultEntry {
                result,
                reason,
                transfer_syntax,
            });
        }

        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            secondary_addr,
            results,
        })
    }
}

/// Bind rejection reasons
pub mod reject_reason {
    pub const NOT_SPECIFIED: u16 = 0;
    pub const TEMPORARY_CONGESTION: u16 = 1;
    pub const LOCAL_LIMIT_EXCEEDED: u16 = 2;
    pub const PROTOCOL_VERSION_NOT_SUPPORTED: u16 = 4;
    pub const DEFAULT_CONTEXT_NOT_SUPPORTED: u16 = 5;
}

/// Bind negative acknowledgment
#[derive(Debug, Clone)]
pub struct BindNakPdu {
    pub header: PduHeader,
    pub reject_reason: u16,
    /// Supported (major, minor) protocol versions
    pub versions: Vec<(u8, u8)>,
}

impl BindNakPdu {
    pub fn new(call_id: u32, reject_reason: u16) -> Self {
        Self {
            header: PduHeader::new(PacketType::BindNak, call_id),
            reject_reason,
            versions: vec![(DCE_RPC_VERSION, DCE_RPC_VERSION_MINOR)],
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut out = PduWriter::new(self.header.data_rep, 8);
        out.u16(self.reject_reason);
        out.u8(self.versions.len() as u8);
        for (major, minor) in &self.versions {
            out.u8(*major);
            out.u8(*minor);
        }
        out.finish(&self.header)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::expect(data, &[PacketType::BindNak])?;
        let mut cur = PduCursor::new(data, &header)?;
        let reject_reason = cur.u16()?;
        // the version list is optional on the wire
        let mut versions = Vec::new();
        if let Ok(count) = cur.u8() {
            for _ in 0..count {
                versions.push((cur.u8()?, cur.u8()?));
            }
        }
        Ok(Self {
            header,
            reject_reason,
            versions,
        })
    }
}

/// Request PDU
#[derive(Debug, Clone)]
pub struct RequestPdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub opnum: u16,
    pub object_uuid: Option<Uuid>,
    pub stub_data: Bytes,
}

impl RequestPdu {
    /// alloc_hint(4) + context_id(2) + opnum(2)
    pub const BODY_HEADER_SIZE: usize = 8;

    pub fn new(call_id: u32, opnum: u16, stub_data: Bytes) -> Self {
        Self {
            header: PduHeader::new(PacketType::Request, call_id),
            alloc_hint: stub_data.len() as u32,
            context_id: 0,
            opnum,
            object_uuid: None,
            stub_data,
        }
    }

    /// Bytes between the header and the stub data
    pub fn overhead(&self) -> usize {
        PduHeader::SIZE
            + Self::BODY_HEADER_SIZE
            + if self.object_uuid.is_some() { 16 } else { 0 }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut out = PduWriter::new(self.header.data_rep, 24 + self.stub_data.len());
        out.u32(self.alloc_hint);
        out.u16(self.context_id);
        out.u16(self.opnum);
        if let Some(uuid) = &self.object_uuid {
            out.uuid(uuid);
        }
        out.bytes(&self.stub_data);

        let mut header = self.header.clone();
        if self.object_uuid.is_some() {
            header.packet_flags.set(PacketFlags::OBJECT_UUID);
        } else {
            header.packet_flags.clear(PacketFlags::OBJECT_UUID);
        }
        out.finish(&header)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::expect(data, &[PacketType::Request])?;
        let mut cur = PduCursor::new(data, &header)?;
        let alloc_hint = cur.u32()?;
        let context_id = cur.u16()?;
        let opnum = cur.u16()?;
        let object_uuid = if header.packet_flags.is_set(PacketFlags::OBJECT_UUID) {
            Some(cur.uuid()?)
        } else {
            None
        };
        let stub_data = cur.rest();
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            opnum,
            object_uuid,
            stub_data,
        })
    }
}

/// Response PDU
#[derive(Debug, Clone)]
pub struct ResponsePdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub stub_data: Bytes,
}

impl ResponsePdu {
    /// alloc_hint(4) + context_id(2) + cancel_count(1) + reserved(1)
    pub const BODY_HEADER_SIZE: usize = 8;

    pub fn new(call_id: u32, stub_data: Bytes) -> Self {
        Self {
            header: PduHeader::new(PacketType::Response, call_id),
            alloc_hint: stub_data.len() as u32,
            context_id: 0,
            cancel_count: 0,
            stub_data,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut out = PduWriter::new(self.header.data_rep, 8 + self.stub_data.len());
        out.u32(self.alloc_hint);
        out.u16(self.context_id);
        out.u8(self.cancel_count);
        out.u8(0);
        out.bytes(&self.stub_data);
        out.finish(&self.header)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::expect(data, &[PacketType::Response])?;
        let mut cur = PduCursor::new(data, &header)?;
        let alloc_hint = cur.u32()?;
        let context_id = cur.u16()?;
        let cancel_count = cur.u8()?;
        let _reserved = cur.u8()?;
        let stub_data = cur.rest();
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
            stub_data,
        })
    }
}

/// Fault status codes
pub mod fault {
    /// Operation number out of range
    pub const NCA_OP_RNG_ERROR: u32 = 0x1c01_0002;
    /// Unknown interface
    pub const NCA_UNK_IF: u32 = 0x1c01_0003;
    /// Protocol error
    pub const NCA_PROTO_ERROR: u32 = 0x1c01_000b;
    /// Array bound out of range
    pub const NCA_INVALID_BOUND: u32 = 0x1c00_0007;
    /// Presentation context not negotiated
    pub const NCA_CONTEXT_MISMATCH: u32 = 0x1c00_001a;
    /// Server ran out of memory
    pub const NCA_REMOTE_NO_MEMORY: u32 = 0x1c00_001b;
    /// Stub could not unmarshal the request
    pub const RPC_S_FAULT_NDR: u32 = 0x0000_06f7;
    /// RPC_X_INVALID_BOUND
    pub const RPC_X_INVALID_BOUND: u32 = 0x0000_06c6;
    pub const RPC_S_ACCESS_DENIED: u32 = 0x0000_0005;

    /// Symbolic name for logs
    pub fn name(status: u32) -> &'static str {
        match status {
            NCA_OP_RNG_ERROR => "nca_op_rng_error",
            NCA_UNK_IF => "nca_unk_if",
            NCA_PROTO_ERROR => "nca_proto_error",
            NCA_INVALID_BOUND => "nca_invalid_bound",
            NCA_CONTEXT_MISMATCH => "nca_s_fault_context_mismatch",
            NCA_REMOTE_NO_MEMORY => "nca_s_fault_remote_no_memory",
            RPC_S_FAULT_NDR => "rpc_s_fault_ndr",
            RPC_X_INVALID_BOUND => "rpc_x_invalid_bound",
            RPC_S_ACCESS_DENIED => "rpc_s_access_denied",
            _ => "unknown",
        }
    }
}

/// Fault PDU
#[derive(Debug, Clone)]
pub struct FaultPdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub status: u32,
}

impl FaultPdu {
    pub fn new(call_id: u32, context_id: u16, status: u32) -> Self {
        let mut header = PduHeader::new(PacketType::Fault, call_id);
        header.packet_flags.set(PacketFlags::DID_NOT_EXECUTE);
        Self {
            header,
            alloc_hint: 0,
            context_id,
            cancel_count: 0,
            status,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut out = PduWriter::new(self.header.data_rep, 16);
        out.u32(self.alloc_hint);
        out.u16(self.context_id);
        out.u8(self.cancel_count);
        out.u8(0);
        out.u32(self.status);
        out.u32(0);
        out.finish(&self.header)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::expect(data, &[PacketType::Fault])?;
        let mut cur = PduCursor::new(data, &header)?;
        let alloc_hint = cur.u32()?;
        let context_id = cur.u16()?;
        let cancel_count = cur.u8()?;
        let _reserved = cur.u8()?;
        let status = cur.u32()?;
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
            status,
        })
    }
}

/// Any connection-oriented PDU this crate speaks
#[derive(Debug, Clone)]
pub enum Pdu {
    Bind(BindPdu),
    BindAck(BindAckPdu),
    BindNak(BindNakPdu),
    AlterContext(BindPdu),
    AlterContextResp(BindAckPdu),
    Request(RequestPdu),
    Response(ResponsePdu),
    Fault(FaultPdu),
}

impl Pdu {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        match header.packet_type {
            PacketType::Bind => Ok(Pdu::Bind(BindPdu::decode(data)?)),
            PacketType::BindAck => Ok(Pdu::BindAck(BindAckPdu::decode(data)?)),
            PacketType::BindNak => Ok(Pdu::BindNak(BindNakPdu::decode(data)?)),
            PacketType::AlterContext => Ok(Pdu::AlterContext(BindPdu::decode(data)?)),
            PacketType::AlterContextResp => Ok(Pdu::AlterContextResp(BindAckPdu::decode(data)?)),
            PacketType::Request => Ok(Pdu::Request(RequestPdu::decode(data)?)),
            PacketType::Response => Ok(Pdu::Response(ResponsePdu::decode(data)?)),
            PacketType::Fault => Ok(Pdu::Fault(FaultPdu::decode(data)?)),
            other => Err(RpcError::InvalidMessageType(other as i32)),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Pdu::Bind(pdu) | Pdu::AlterContext(pdu) => pdu.encode(),
            Pdu::BindAck(pdu) | Pdu::AlterContextResp(pdu) => pdu.encode(),
            Pdu::BindNak(pdu) => pdu.encode(),
            Pdu::Request(pdu) => pdu.encode(),
            Pdu::Response(pdu) => pdu.encode(),
            Pdu::Fault(pdu) => pdu.encode(),
        }
    }

    pub fn header(&self) -> &PduHeader {
        match self {
            Pdu::Bind(pdu) | Pdu::AlterContext(pdu) => &pdu.header,
            Pdu::BindAck(pdu) | Pdu::AlterContextResp(pdu) => &pdu.header,
            Pdu::BindNak(pdu) => &pdu.header,
            Pdu::Request(pdu) => &pdu.header,
            Pdu::Response(pdu) => &pdu.header,
            Pdu::Fault(pdu) => &pdu.header,
        }
    }

    pub fn call_id(&self) -> u32 {
        self.header().call_id
    }
}
