//! NDR byte-order context
//!
//! The context carries the integer representation negotiated through the
//! PDU data representation label, and provides the primitive put/get helpers
//! the writer, the reader and the PDU codec share.

use bytes::{Buf, BufMut};

/// Integer representation bit in the first data representation byte
const DREP_LITTLE_ENDIAN: u8 = 0x10;

/// NDR byte-order context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdrContext {
    /// Whether to use little-endian byte order
    pub little_endian: bool,
}

macro_rules! ndr_primitive_io {
    ($($put:ident, $get:ident, $ty:ty, $put_le:ident, $put_be:ident, $get_le:ident, $get_be:ident;)*) => {
        $(
            #[inline]
            pub fn $put<B: BufMut>(&self, buf: &mut B, value: $ty) {
                if self.little_endian {
                    buf.$put_le(value);
                } else {
                    buf.$put_be(value);
                }
            }

            #[inline]
            pub fn $get<B: Buf>(&self, buf: &mut B) -> $ty {
                if self.little_endian {
                    buf.$get_le()
                } else {
                    buf.$get_be()
                }
            }
        )*
    };
}

impl NdrContext {
    /// Little-endian context (the NDR20 default)
    pub fn new() -> Self {
        Self { little_endian: true }
    }

    /// Big-endian context
    pub fn big_endian() -> Self {
        Self { little_endian: false }
    }

    pub fn with_byte_order(little_endian: bool) -> Self {
        Self { little_endian }
    }

    /// Context described by the first byte of a PDU data representation label
    pub fn from_drep(byte0: u8) -> Self {
        Self::with_byte_order(byte0 & DREP_LITTLE_ENDIAN != 0)
    }

    /// Padding needed to move `position` to the next multiple of `alignment`
    #[inline]
    pub fn align_padding(position: usize, alignment: usize) -> usize {
        if alignment <= 1 {
            return 0;
        }
        (alignment - position % alignment) % alignment
    }

    #[inline]
    pub fn put_u8<B: BufMut>(&self, buf: &mut B, value: u8) {
        buf.put_u8(value);
    }

    #[inline]
    pub fn get_u8<B: Buf>(&self, buf: &mut B) -> u8 {
        buf.get_u8()
    }

    #[inline]
    pub fn put_i8<B: BufMut>(&self, buf: &mut B, value: i8) {
        buf.put_i8(value);
    }

    #[inline]
    pub fn get_i8<B: Buf>(&self, buf: &mut B) -> i8 {
        buf.get_i8()
    }

    ndr_primitive_io! {
        put_u16, get_u16, u16, put_u16_le, put_u16, get_u16_le, get_u16;
        put_i16, get_i16, i16, put_i16_le, put_i16, get_i16_le, get_i16;
        put_u32, get_u32, u32, put_u32_le, put_u32, get_u32_le, get_u32;
        put_i32, get_i32, i32, put_i32_le, put_i32, get_i32_le, get_i32;
        put_u64, get_u64, u64, put_u64_le, put_u64, get_u64_le, get_u64;
        put_i64, get_i64, i64, put_i64_le, put_i64, get_i64_le, get_i64;
        put_f32, get_f32, f32, put_f32_le, put_f32, get_f32_le, get_f32;
        put_f64, get_f64, f64, put_f64_le, put_f64, get_f64_le, get_f64;
    }
}

impl Default for NdrContext {
    fn default() -> Self {
        Self::new()
    }
}
