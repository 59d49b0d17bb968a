//! ORPC header types (MS-DCOM 2.2.13, 2.2.14)
//!
//! `OrpcThis` is the implicit first in-parameter of every ORPC request and
//! `OrpcThat` the implicit first out-parameter of every response.

use super::identifiers::Cid;
use midl_ndr::{Guid, NdrDecode, NdrEncode, NdrReader, NdrWriter, Result};

/// COM version (MS-DCOM 2.2.11)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ComVersion {
    pub major: u16,
    pub minor: u16,
}

impl ComVersion {
    /// Windows 2000
    pub const DCOM_5_1: Self = Self { major: 5, minor: 1 };
    /// Windows XP and Server 2003
    pub const DCOM_5_4: Self = Self { major: 5, minor: 4 };
    /// Windows Vista
    pub const DCOM_5_6: Self = Self { major: 5, minor: 6 };
    /// Windows 7 and later
    pub const DCOM_5_7: Self = Self { major: 5, minor: 7 };

    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl NdrEncode for ComVersion {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_u16(self.major);
        w.write_u16(self.minor);
        Ok(())
    }
}

impl NdrDecode for ComVersion {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        Ok(Self {
            major: r.read_u16()?,
            minor: r.read_u16()?,
        })
    }
}

/// One ORPC extension: opaque data tagged by a GUID
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct OrpcExtent {
    pub id: Guid,
    /// Data length without padding; zero means `data.len()`
    pub size: u32,
    pub data: Vec<u8>,
}

impl OrpcExtent {
    pub fn new(id: Guid, data: Vec<u8>) -> Self {
        Self {
            id,
            size: data.len() as u32,
            data,
        }
    }

    fn wire_size(&self) -> u32 {
        if self.size == 0 {
            self.data.len() as u32
        } else {
            self.size
        }
    }
}

/// Data is sized `(size + 7) & !7`; the conformance leads the structure.
impl NdrEncode for OrpcExtent {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        let size = self.wire_size();
        let padded = (size as usize + 7) & !7;
        w.write_size(padded)?;
        w.align(4);
        self.id.ndr_encode(w)?;
        w.write_u32(size);
        w.write_byte_elements(&self.data, padded);
        Ok(())
    }
}

impl NdrDecode for OrpcExtent {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let mut count = r.read_size()?;
        r.align(4)?;
        let id = Guid::ndr_decode(r)?;
        let size = r.read_u32()?;
        let padded = (size as usize + 7) & !7;
        if count == 0 && padded > 0 {
            count = padded;
        }
        let mut data = r.read_byte_elements(count, "data")?;
        data.truncate(size as usize);
        Ok(Self { id, size, data })
    }
}

/// ORPC_EXTENT_ARRAY: a unique pointer to `(size + 1) & !1` unique extent
/// pointers, the unused tail being NULL
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct OrpcExtentArray {
    /// Number of non-NULL extents; zero means `extents.len()`
    pub size: u32,
    pub extents: Vec<OrpcExtent>,
}

impl OrpcExtentArray {
    pub fn new(extents: Vec<OrpcExtent>) -> Self {
        Self {
            size: extents.len() as u32,
            extents,
        }
    }

    fn wire_size(&self) -> u32 {
        if self.size == 0 {
            self.extents.len() as u32
        } else {
            self.size
        }
    }

    fn slot_count(&self) -> usize {
        (self.wire_size() as usize + 1) & !1
    }
}

impl NdrEncode for OrpcExtentArray {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.align(4);
        w.write_u32(self.wire_size());
        // reserved
        w.write_u32(0);
        w.write_pointer(!self.extents.is_empty() || self.slot_count() > 0)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        let slots = self.slot_count();
        if self.extents.is_empty() && slots == 0 {
            return Ok(());
        }
        w.write_size(slots)?;
        let present = self.extents.len().min(slots);
        for i in 0..slots {
            w.write_pointer(i < present)?;
        }
        for extent in &self.extents[..present] {
            w.write_data(extent)?;
        }
        Ok(())
    }
}

impl NdrDecode for OrpcExtentArray {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        r.align(4)?;
        let size = r.read_u32()?;
        let _reserved = r.read_u32()?;
        // the pointee is read in the deferred pass; remember whether one follows
        let extents = if r.read_pointer()? {
            vec![OrpcExtent::default()]
        } else {
            Vec::new()
        };
        Ok(Self { size, extents })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        if self.extents.is_empty() {
            return Ok(());
        }
        let mut slots = r.read_size()?;
        let expected = (self.size as usize + 1) & !1;
        if slots == 0 && expected > 0 {
            slots = expected;
        }
        r.check_array_len(slots, "extent")?;
        let mut present = Vec::with_capacity(slots);
        for _ in 0..slots {
            present.push(r.read_pointer()?);
        }
        let mut extents = Vec::new();
        for non_null in present {
            if non_null {
                extents.push(r.read_data::<OrpcExtent>()?);
            }
        }
        self.extents = extents;
        Ok(())
    }
}

fn encode_extensions(extensions: &Option<OrpcExtentArray>, w: &mut NdrWriter) -> Result<()> {
    w.write_pointer(extensions.is_some())
}

fn encode_extensions_deferred(
    extensions: &Option<OrpcExtentArray>,
    w: &mut NdrWriter,
) -> Result<()> {
    match extensions {
        Some(array) => w.write_data(array),
        None => Ok(()),
    }
}

fn decode_extensions(r: &mut NdrReader) -> Result<Option<OrpcExtentArray>> {
    Ok(r.read_pointer()?.then(OrpcExtentArray::default))
}

fn decode_extensions_deferred(
    extensions: &mut Option<OrpcExtentArray>,
    r: &mut NdrReader,
) -> Result<()> {
    if extensions.is_some() {
        *extensions = Some(r.read_data()?);
    }
    Ok(())
}

/// ORPCTHIS (MS-DCOM 2.2.13.1)
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct OrpcThis {
    pub version: ComVersion,
    /// Zero for ORPC invocations
    pub flags: u32,
    pub reserved1: u32,
    /// Causality ID
    pub cid: Cid,
    pub extensions: Option<OrpcExtentArray>,
}

impl OrpcThis {
    /// Header for a new logical call: DCOM 5.7 with a fresh causality ID
    pub fn new() -> Self {
        Self {
            version: ComVersion::DCOM_5_7,
            cid: Cid::generate(),
            ..Default::default()
        }
    }

    /// Header continuing the causality of `cid`
    pub fn with_cid(cid: Cid) -> Self {
        Self {
            version: ComVersion::DCOM_5_7,
            cid,
            ..Default::default()
        }
    }
}

impl NdrEncode for OrpcThis {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.align(4);
        self.version.ndr_encode(w)?;
        w.write_u32(self.flags);
        w.write_u32(self.reserved1);
        self.cid.ndr_encode(w)?;
        encode_extensions(&self.extensions, w)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        encode_extensions_deferred(&self.extensions, w)
    }
}

impl NdrDecode for OrpcThis {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        r.align(4)?;
        let version = ComVersion::ndr_decode(r)?;
        let flags = r.read_u32()?;
        let reserved1 = r.read_u32()?;
        let cid = Cid::ndr_decode(r)?;
        let extensions = decode_extensions(r)?;
        Ok(Self {
            version,
            flags,
            reserved1,
            cid,
            extensions,
        })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        decode_extensions_deferred(&mut self.extensions, r)
    }
}

/// ORPCTHAT (MS-DCOM 2.2.13.2)
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct OrpcThat {
    pub flags: u32,
    pub extensions: Option<OrpcExtentArray>,
}

impl NdrEncode for OrpcThat {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.align(4);
        w.write_u32(self.flags);
        encode_extensions(&self.extensions, w)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        encode_extensions_deferred(&self.extensions, w)
    }
}

impl NdrDecode for OrpcThat {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        r.align(4)?;
        let flags = r.read_u32()?;
        let extensions = decode_extensions(r)?;
        Ok(Self { flags, extensions })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        decode_extensions_deferred(&mut self.extensions, r)
    }
}
