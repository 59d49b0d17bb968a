//! OBJREF (MS-DCOM 2.2.18) and MInterfacePointer (2.2.14)
//!
//! An OBJREF is hand-marshaled little-endian data, not NDR. It travels as
//! the byte payload of an `MInterfacePointer`.

use super::error::{DcomError, Result};
use super::identifiers::{Clsid, Iid};
use super::stdobjref::{decode_guid_le, StdObjRef};
use super::stringbinding::DualStringArray;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use midl_ndr::{NdrDecode, NdrEncode, NdrReader, NdrWriter};

/// "MEOW" read as a little-endian u32
pub const OBJREF_SIGNATURE: u32 = 0x574F_454D;

pub mod objref_flags {
    pub const OBJREF_STANDARD: u32 = 0x0000_0001;
    pub const OBJREF_HANDLER: u32 = 0x0000_0002;
    pub const OBJREF_CUSTOM: u32 = 0x0000_0004;
}

/// OBJREF_STANDARD
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjRefStandard {
    pub std: StdObjRef,
    pub resolver_addr: DualStringArray,
}

/// OBJREF_HANDLER
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjRefHandler {
    pub std: StdObjRef,
    pub clsid: Clsid,
    pub resolver_addr: DualStringArray,
}

/// OBJREF_CUSTOM
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjRefCustom {
    /// Unmarshaler class
    pub clsid: Clsid,
    pub cb_extension: u32,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjRefKind {
    Standard(ObjRefStandard),
    Handler(ObjRefHandler),
    Custom(ObjRefCustom),
}

/// OBJREF: signature, flags, IID, then the variant body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjRef {
    pub iid: Iid,
    pub kind: ObjRefKind,
}

impl ObjRef {
    /// signature + flags + iid
    pub const HEADER_SIZE: usize = 24;

    pub fn standard(iid: Iid, std: StdObjRef, resolver_addr: DualStringArray) -> Self {
        Self {
            iid,
            kind: ObjRefKind::Standard(ObjRefStandard { std, resolver_addr }),
        }
    }

    /// The STDOBJREF of standard and handler references
    pub fn std_obj_ref(&self) -> Option<&StdObjRef> {
        match &self.kind {
            ObjRefKind::Standard(s) => Some(&s.std),
            ObjRefKind::Handler(h) => Some(&h.std),
            ObjRefKind::Custom(_) => None,
        }
    }

    pub fn flags(&self) -> u32 {
        match self.kind {
            ObjRefKind::Standard(_) => objref_flags::OBJREF_STANDARD,
            ObjRefKind::Handler(_) => objref_flags::OBJREF_HANDLER,
            ObjRefKind::Custom(_) => objref_flags::OBJREF_CUSTOM,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(OBJREF_SIGNATURE);
        buf.put_u32_le(self.flags());
        buf.put_slice(&self.iid.0.to_bytes_le());
        match &self.kind {
            ObjRefKind::Standard(s) => {
                s.std.encode(buf);
                s.resolver_addr.encode(buf);
            }
            ObjRefKind::Handler(h) => {
                h.std.encode(buf);
                buf.put_slice(&h.clsid.0.to_bytes_le());
                h.resolver_addr.encode(buf);
            }
            ObjRefKind::Custom(c) => {
                buf.put_slice(&c.clsid.0.to_bytes_le());
                buf.put_u32_le(c.cb_extension);
                buf.put_u32_le(c.data.len() as u32);
                buf.put_slice(&c.data);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure(buf, Self::HEADER_SIZE)?;
        let signature = buf.get_u32_le();
        if signature != OBJREF_SIGNATURE {
            return Err(DcomError::InvalidObjRef(format!(
                "invalid signature: expected 0x{:08x}, got 0x{:08x}",
                OBJREF_SIGNATURE, signature
            )));
        }
        let flags = buf.get_u32_le();
        let iid = Iid(decode_guid_le(buf));

        let kind = match flags {
            objref_flags::OBJREF_STANDARD => ObjRefKind::Standard(ObjRefStandard {
                std: StdObjRef::decode(buf)?,
                resolver_addr: DualStringArray::decode(buf)?,
            }),
            objref_flags::OBJREF_HANDLER => {
                let std = StdObjRef::decode(buf)?;
                ensure(buf, 16)?;
                let clsid = Clsid(decode_guid_le(buf));
                ObjRefKind::Handler(ObjRefHandler {
                    std,
                    clsid,
                    resolver_addr: DualStringArray::decode(buf)?,
                })
            }
            objref_flags::OBJREF_CUSTOM => {
                ensure(buf, 24)?;
                let clsid = Clsid(decode_guid_le(buf));
                let cb_extension = buf.get_u32_le();
                let size = buf.get_u32_le() as usize;
                ensure(buf, size)?;
                ObjRefKind::Custom(ObjRefCustom {
                    clsid,
                    cb_extension,
                    data: buf.copy_to_bytes(size),
                })
            }
            other => {
                return Err(DcomError::InvalidObjRef(format!(
                    "unknown OBJREF flags: 0x{:08x}",
                    other
                )))
            }
        };
        Ok(Self { iid, kind })
    }
}

fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(DcomError::BufferUnderflow {
            needed,
            have: buf.remaining(),
        });
    }
    Ok(())
}

/// MInterfacePointer: `ulCntData` bytes of OBJREF as a conformant structure
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct MInterfacePointer {
    pub data: Vec<u8>,
}

impl MInterfacePointer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn from_objref(objref: &ObjRef) -> Self {
        Self {
            data: objref.to_bytes().to_vec(),
        }
    }

    /// Parse the carried OBJREF
    pub fn objref(&self) -> Result<ObjRef> {
        ObjRef::decode(&mut self.data.as_slice())
    }
}

impl NdrEncode for MInterfacePointer {
    fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_size(self.data.len())?;
        w.align(4);
        w.write_u32(self.data.len() as u32);
        w.write_bytes(&self.data);
        Ok(())
    }
}

impl NdrDecode for MInterfacePointer {
    fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
        let mut count = r.read_size()?;
        r.align(4)?;
        let data_count = r.read_u32()? as usize;
        if count == 0 && data_count > 0 {
            count = data_count;
        }
        let data = r.read_byte_elements(count, "abData")?;
        Ok(Self { data })
    }
}
