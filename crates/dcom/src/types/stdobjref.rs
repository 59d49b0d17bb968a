//! STDOBJREF (MS-DCOM 2.2.18.2)
//!
//! Identifies one marshaled interface pointer: exporter, object and IPID.

use super::error::{DcomError, Result};
use super::identifiers::{Ipid, Oid, Oxid};
use bytes::{Buf, BufMut};
use midl_ndr::{Guid, NdrDecode, NdrEncode, NdrReader, NdrWriter};

/// STDOBJREF flags (SORF_*)
pub mod flags {
    pub const SORF_NULL: u32 = 0x0000_0000;
    /// The client does not need to ping the object
    pub const SORF_NOPING: u32 = 0x0000_1000;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct StdObjRef {
    /// SORF_* flags
    pub flags: u32,
    /// Public references the reference carries
    pub public_refs: u32,
    pub oxid: Oxid,
    pub oid: Oid,
    pub ipid: Ipid,
}

impl StdObjRef {
    /// 4 + 4 + 8 + 8 + 16
    pub const SIZE: usize = 40;

    pub fn new(oxid: Oxid, oid: Oid, ipid: Ipid, public_refs: u32) -> Self {
        Self {
            flags: flags::SORF_NULL,
            public_refs,
            oxid,
            oid,
            ipid,
        }
    }

    pub fn new_noping(oxid: Oxid, oid: Oid, ipid: Ipid, public_refs: u32) -> Self {
        Self {
            flags: flags::SORF_NOPING,
            ..Self::new(oxid, oid, ipid, public_refs)
        }
    }

    pub fn requires_pinging(&self) -> bool {
        self.flags & flags::SORF_NOPING == 0
    }

    /// Raw little-endian form used inside an OBJREF
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.public_refs);
        buf.put_u64_le(self.oxid.0);
        buf.put_u64_le(self.oid.0);
        buf.put_slice(&self.ipid.0.to_bytes_le());
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(DcomError::BufferUnderflow {
                needed: Self::SIZE,
                have: buf.remaining(),
            });
        }
        let flags = buf.get_u32_le();
        let public_refs = buf.get_u32_le();
        let oxid = Oxid(buf.get_u64_le());
        let oid = Oid(buf.get_u64_le());
        let ipid = Ipid(decode_guid_le(buf));
        Ok(Self {
            flags,
            public_refs,
            oxid,
            oid,
            ipid,
        })
    }
}

/// Read a little-endian GUID; the caller checks there are 16 bytes
pub(crate) fn decode_guid_le<B: Buf>(buf: &mut B) -> Guid {
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Guid::from_bytes_le(&raw)
}

/// NDR form aligns to 8 for the hyper members
impl NdrEncode for StdObjRef {
    fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.align(8);
        w.write_u32(self.flags);
        w.write_u32(self.public_refs);
        self.oxid.ndr_encode(w)?;
        self.oid.ndr_encode(w)?;
        self.ipid.ndr_encode(w)
    }
}

impl NdrDecode for StdObjRef {
    fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
        r.align(8)?;
        Ok(Self {
            flags: r.read_u32()?,
            public_refs: r.read_u32()?,
            oxid: Oxid::ndr_decode(r)?,
            oid: Oid::ndr_decode(r)?,
            ipid: Ipid::ndr_decode(r)?,
        })
    }
}
