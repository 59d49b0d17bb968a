//! NDR encoding trait

use crate::{NdrWriter, Result};

/// Types that marshal themselves into an NDR stream.
///
/// Encoding is split in two phases. `ndr_encode` writes the inline part of
/// the value (its scalars and the referent IDs of embedded pointers);
/// `ndr_encode_deferred` writes the pointees of those embedded pointers.
/// A container writes every member's inline part before any member's
/// deferred part, which yields the NDR ordering for embedded pointers.
pub trait NdrEncode {
    /// Write the inline part of the value
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()>;

    /// Write the pointees of embedded pointers
    fn ndr_encode_deferred(&self, _w: &mut NdrWriter) -> Result<()> {
        Ok(())
    }
}

impl<T: NdrEncode + ?Sized> NdrEncode for &T {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        (**self).ndr_encode(w)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        (**self).ndr_encode_deferred(w)
    }
}

impl<T: NdrEncode + ?Sized> NdrEncode for Box<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        (**self).ndr_encode(w)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        (**self).ndr_encode_deferred(w)
    }
}
