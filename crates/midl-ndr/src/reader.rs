//! NDR stream reader

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{MAX_NDR_ALLOCATION_SIZE, MAX_NDR_ARRAY_ELEMENTS};
use crate::{NdrContext, NdrDecode, NdrError, Result};

/// Reader over an NDR20 octet stream
pub struct NdrReader {
    data: Bytes,
    pos: usize,
    ctx: NdrContext,
    full_ptrs: HashMap<u32, Arc<dyn Any + Send + Sync>>,
}

macro_rules! read_aligned {
    ($($name:ident, $get:ident, $ty:ty, $align:expr;)*) => {
        $(
            pub fn $name(&mut self) -> Result<$ty> {
                self.align($align)?;
                let ctx = self.ctx;
                let mut chunk = self.take(std::mem::size_of::<$ty>())?;
                Ok(ctx.$get(&mut chunk))
            }
        )*
    };
}

impl NdrReader {
    pub fn new(data: Bytes) -> Self {
        Self::with_context(data, NdrContext::new())
    }

    pub fn with_context(data: Bytes, ctx: NdrContext) -> Self {
        Self {
            data,
            pos: 0,
            ctx,
            full_ptrs: HashMap::new(),
        }
    }

    pub fn context(&self) -> NdrContext {
        self.ctx
    }

    /// Current offset from the start of the stream
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Skip padding up to the next multiple of `alignment`
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = NdrContext::align_padding(self.pos, alignment);
        self.take(padding).map(|_| ())
    }

    /// Take the next `n` raw octets
    pub fn take(&mut self, n: usize) -> Result<Bytes> {
        if self.remaining() < n {
            return Err(NdrError::BufferUnderflow {
                needed: n,
                have: self.remaining(),
            });
        }
        let chunk = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(chunk)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    read_aligned! {
        read_u16, get_u16, u16, 2;
        read_i16, get_i16, i16, 2;
        read_u32, get_u32, u32, 4;
        read_i32, get_i32, i32, 4;
        read_u64, get_u64, u64, 8;
        read_i64, get_i64, i64, 8;
        read_f32, get_f32, f32, 4;
        read_f64, get_f64, f64, 8;
    }

    /// Read a complete value: inline part, then deferred part
    pub fn read_data<T: NdrDecode>(&mut self) -> Result<T> {
        let mut value = T::ndr_decode(self)?;
        value.ndr_decode_deferred(self)?;
        Ok(value)
    }

    /// Read the deferred part of a value whose inline part was already read
    pub fn read_deferred<T: NdrDecode>(&mut self, value: &mut T) -> Result<()> {
        value.ndr_decode_deferred(self)
    }

    /// Read a conformance value (max_count)
    pub fn read_size(&mut self) -> Result<usize> {
        Ok(self.read_u32()? as usize)
    }

    /// Read a pointer referent ID
    pub fn read_referent(&mut self) -> Result<u32> {
        self.read_u32()
    }

    /// Read a pointer referent and report whether it is non-null
    pub fn read_pointer(&mut self) -> Result<bool> {
        Ok(self.read_referent()? != 0)
    }

    /// Top-level unique pointer: referent followed directly by the pointee
    pub fn read_unique<T: NdrDecode>(&mut self) -> Result<Option<T>> {
        if self.read_pointer()? {
            Ok(Some(self.read_data()?))
        } else {
            Ok(None)
        }
    }

    /// Read a union: the switch value, then the matching arm
    pub fn read_union<U: crate::NdrUnion>(&mut self) -> Result<U> {
        let switch = self.read_u32()?;
        U::decode_arm(switch, self)
    }

    /// Read a union switched by an already decoded field; the transmitted
    /// switch must repeat it
    pub fn read_union_switched<U: crate::NdrUnion>(&mut self, switch: u32) -> Result<U> {
        let actual = self.read_u32()?;
        if actual != switch {
            return Err(NdrError::SwitchMismatch {
                expected: switch,
                actual,
            });
        }
        U::decode_arm(actual, self)
    }

    /// Deferred part of a union
    pub fn read_union_deferred<U: crate::NdrUnion>(&mut self, value: &mut U) -> Result<()> {
        value.decode_arm_deferred(self)
    }

    /// Reject element counts the remaining stream cannot possibly hold
    pub fn check_array_len(&self, count: usize, name: &str) -> Result<()> {
        if count > MAX_NDR_ARRAY_ELEMENTS {
            return Err(NdrError::AllocationLimitExceeded {
                requested: count,
                limit: MAX_NDR_ARRAY_ELEMENTS,
            });
        }
        if count > self.remaining() {
            return Err(NdrError::ArrayTooLarge {
                size: count,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Conformant array: max_count, then that many elements
    pub fn read_array<T: NdrDecode>(&mut self, name: &str) -> Result<Vec<T>> {
        let count = self.read_size()?;
        self.read_elements(count, name)
    }

    /// Array body of `count` elements
    pub fn read_elements<T: NdrDecode>(&mut self, count: usize, name: &str) -> Result<Vec<T>> {
        self.check_array_len(count, name)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::ndr_decode(self)?);
        }
        for item in items.iter_mut() {
            item.ndr_decode_deferred(self)?;
        }
        Ok(items)
    }

    /// Variance header; returns actual_count after checking it fits `max_count`
    pub fn read_variance(&mut self, max_count: usize) -> Result<usize> {
        let offset = self.read_u32()?;
        let actual = self.read_u32()?;
        if offset as u64 + actual as u64 > max_count as u64 {
            return Err(NdrError::ConformanceMismatch {
                max_count: max_count as u32,
                offset,
                actual_count: actual,
            });
        }
        Ok(actual as usize)
    }

    /// Conformant varying array; returns the transmitted elements and max_count
    pub fn read_conformant_varying<T: NdrDecode>(&mut self, name: &str) -> Result<(Vec<T>, usize)> {
        let max_count = self.read_size()?;
        let actual = self.read_variance(max_count)?;
        let items = self.read_elements(actual, name)?;
        Ok((items, max_count))
    }

    /// Conformant byte array
    pub fn read_byte_array(&mut self, name: &str) -> Result<Vec<u8>> {
        let count = self.read_size()?;
        self.read_byte_elements(count, name)
    }

    /// Byte array body of `count` octets
    pub fn read_byte_elements(&mut self, count: usize, name: &str) -> Result<Vec<u8>> {
        if count > MAX_NDR_ALLOCATION_SIZE {
            return Err(NdrError::AllocationLimitExceeded {
                requested: count,
                limit: MAX_NDR_ALLOCATION_SIZE,
            });
        }
        self.check_array_len(count, name)?;
        Ok(self.take(count)?.to_vec())
    }

    /// Null-terminated UTF-16 conformant varying string
    pub fn read_wstring(&mut self) -> Result<String> {
        let max_count = self.read_size()?;
        let actual = self.read_variance(max_count)?;
        self.check_array_len(actual * 2, "wchar_t string")?;
        let ctx = self.ctx;
        let mut raw = self.take(actual * 2)?;
        let mut units = Vec::with_capacity(actual);
        for _ in 0..actual {
            units.push(ctx.get_u16(&mut raw));
        }
        if units.last() == Some(&0) {
            units.pop();
        }
        let s = char::decode_utf16(units)
            .collect::<std::result::Result<String, _>>()?;
        Ok(s)
    }

    /// Null-terminated 8-bit conformant varying string
    pub fn read_string(&mut self) -> Result<String> {
        let max_count = self.read_size()?;
        let actual = self.read_variance(max_count)?;
        let mut raw = self.read_byte_elements(actual, "char string")?;
        if raw.last() == Some(&0) {
            raw.pop();
        }
        Ok(String::from_utf8(raw)?)
    }

    /// Pointee already decoded for a full-pointer referent, if any
    pub(crate) fn full_pointee<T: Any + Send + Sync>(&self, id: u32) -> Result<Option<Arc<T>>> {
        match self.full_ptrs.get(&id) {
            Some(existing) => Arc::clone(existing)
                .downcast::<T>()
                .map(Some)
                .map_err(|_| NdrError::InvalidPointer(id)),
            None => Ok(None),
        }
    }

    pub(crate) fn register_full_pointee<T: Any + Send + Sync>(&mut self, id: u32, value: Arc<T>) {
        self.full_ptrs.insert(id, value);
    }
}

impl std::fmt::Debug for NdrReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdrReader")
            .field("len", &self.data.len())
            .field("pos", &self.pos)
            .field("ctx", &self.ctx)
            .finish()
    }
}
