//! NDR decoding trait

use crate::{NdrReader, Result};

/// Types that unmarshal themselves from an NDR stream.
///
/// Mirrors [`NdrEncode`](crate::NdrEncode): `ndr_decode` reads the inline
/// part and leaves embedded pointers as placeholders, `ndr_decode_deferred`
/// fills them from the pointee data that follows.
pub trait NdrDecode: Sized {
    /// Read the inline part of the value
    fn ndr_decode(r: &mut NdrReader) -> Result<Self>;

    /// Read the pointees of embedded pointers
    fn ndr_decode_deferred(&mut self, _r: &mut NdrReader) -> Result<()> {
        Ok(())
    }
}

impl<T: NdrDecode> NdrDecode for Box<T> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        T::ndr_decode(r).map(Box::new)
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        (**self).ndr_decode_deferred(r)
    }
}
