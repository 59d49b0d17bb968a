//! NDR stream writer

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MAX_NDR_BYTE_ARRAY_LEN;
use crate::{NdrContext, NdrEncode, NdrError, Result};

/// First referent ID handed out for non-null pointers
const FIRST_REFERENT_ID: u32 = 0x0002_0000;

/// Full-pointer bookkeeping for one pointee address
#[derive(Debug, Clone, Copy)]
pub(crate) struct FullReferent {
    pub id: u32,
    pub sent: bool,
}

/// Writer for an NDR20 octet stream.
///
/// Alignment is computed against the start of the stream, so a writer
/// is expected to produce exactly one PDU stub body.
#[derive(Debug)]
pub struct NdrWriter {
    buf: BytesMut,
    ctx: NdrContext,
    next_referent: u32,
    full_ptrs: HashMap<usize, FullReferent>,
}

impl NdrWriter {
    pub fn new() -> Self {
        Self::with_context(NdrContext::new())
    }

    pub fn with_context(ctx: NdrContext) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            ctx,
            next_referent: FIRST_REFERENT_ID,
            full_ptrs: HashMap::new(),
        }
    }

    pub fn context(&self) -> NdrContext {
        self.ctx
    }

    /// Current offset from the start of the stream
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Pad with zero bytes up to the next multiple of `alignment`
    pub fn align(&mut self, alignment: usize) {
        let padding = NdrContext::align_padding(self.buf.len(), alignment);
        self.buf.put_bytes(0, padding);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.align(2);
        self.ctx.put_u16(&mut self.buf, value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.align(2);
        self.ctx.put_i16(&mut self.buf, value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.align(4);
        self.ctx.put_u32(&mut self.buf, value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.align(4);
        self.ctx.put_i32(&mut self.buf, value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.align(8);
        self.ctx.put_u64(&mut self.buf, value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.align(8);
        self.ctx.put_i64(&mut self.buf, value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.align(4);
        self.ctx.put_f32(&mut self.buf, value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.align(8);
        self.ctx.put_f64(&mut self.buf, value);
    }

    /// Raw octets, no alignment
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Write a complete value: its inline part followed by its deferred part
    pub fn write_data<T: NdrEncode + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.ndr_encode(self)?;
        value.ndr_encode_deferred(self)
    }

    /// Write only the deferred part of a value whose inline part was
    /// already written
    pub fn write_deferred<T: NdrEncode + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.ndr_encode_deferred(self)
    }

    /// Write a conformance value (max_count)
    pub fn write_size(&mut self, size: usize) -> Result<()> {
        let size = u32::try_from(size)
            .map_err(|_| NdrError::IntegerOverflow(format!("size {} exceeds u32", size)))?;
        self.write_u32(size);
        Ok(())
    }

    /// Write a pointer referent: a fresh non-zero ID, or 0 for NULL
    pub fn write_pointer(&mut self, present: bool) -> Result<()> {
        let id = if present { self.allocate_referent()? } else { 0 };
        self.write_u32(id);
        Ok(())
    }

    /// Top-level unique pointer: the referent followed directly by the pointee
    pub fn write_unique<T: NdrEncode>(&mut self, value: Option<&T>) -> Result<()> {
        self.write_pointer(value.is_some())?;
        match value {
            Some(v) => self.write_data(v),
            None => Ok(()),
        }
    }

    /// Write a union: the switch value followed by the selected arm
    pub fn write_union<U: crate::NdrUnion>(&mut self, value: &U) -> Result<()> {
        self.write_u32(value.switch_value());
        value.encode_arm(self)
    }

    /// Write a union switched by another field: `switch` goes on the wire
    /// and the arm must agree with it
    pub fn write_union_switched<U: crate::NdrUnion>(
        &mut self,
        switch: u32,
        value: &U,
    ) -> Result<()> {
        if value.switch_value() != switch {
            return Err(NdrError::SwitchMismatch {
                expected: switch,
                actual: value.switch_value(),
            });
        }
        self.write_u32(switch);
        value.encode_arm(self)
    }

    /// Deferred part of a union
    pub fn write_union_deferred<U: crate::NdrUnion>(&mut self, value: &U) -> Result<()> {
        value.encode_arm_deferred(self)
    }

    /// Conformant array: max_count, then `count` elements.
    ///
    /// Missing trailing elements are written as `T::default()`; elements
    /// past `count` are dropped.
    pub fn write_array<T: NdrEncode + Default>(&mut self, items: &[T], count: usize) -> Result<()> {
        self.write_size(count)?;
        self.write_elements(items, count)
    }

    /// Array body without any conformance or variance header
    pub fn write_elements<T: NdrEncode + Default>(&mut self, items: &[T], count: usize) -> Result<()> {
        let present = items.len().min(count);
        let filler = T::default();
        for item in &items[..present] {
            item.ndr_encode(self)?;
        }
        for _ in present..count {
            filler.ndr_encode(self)?;
        }
        for item in &items[..present] {
            item.ndr_encode_deferred(self)?;
        }
        for _ in present..count {
            filler.ndr_encode_deferred(self)?;
        }
        Ok(())
    }

    /// Conformant varying array: max_count, offset 0, actual_count, elements
    pub fn write_conformant_varying<T: NdrEncode + Default>(
        &mut self,
        items: &[T],
        max_count: usize,
        actual_count: usize,
    ) -> Result<()> {
        if actual_count > max_count {
            return Err(NdrError::IntegerOverflow(format!(
                "actual count {} exceeds max count {}",
                actual_count, max_count
            )));
        }
        self.write_size(max_count)?;
        self.write_variance(actual_count)?;
        self.write_elements(items, actual_count)
    }

    /// Variance header: offset (always 0) and actual_count
    pub fn write_variance(&mut self, actual_count: usize) -> Result<()> {
        self.write_u32(0);
        self.write_size(actual_count)
    }

    /// Conformant byte array, zero-padded up to `count`. Counts a reader
    /// would refuse are refused here too.
    pub fn write_byte_array(&mut self, data: &[u8], count: usize) -> Result<()> {
        if count > MAX_NDR_BYTE_ARRAY_LEN {
            return Err(NdrError::AllocationLimitExceeded {
                requested: count,
                limit: MAX_NDR_BYTE_ARRAY_LEN,
            });
        }
        self.write_size(count)?;
        self.write_byte_elements(data, count);
        Ok(())
    }

    /// Byte array body, zero-padded up to `count`
    pub fn write_byte_elements(&mut self, data: &[u8], count: usize) {
        let present = data.len().min(count);
        self.buf.put_slice(&data[..present]);
        self.buf.put_bytes(0, count - present);
    }

    /// Null-terminated UTF-16 string as a conformant varying array
    pub fn write_wstring(&mut self, s: &str) -> Result<()> {
        let units: Vec<u16> = s.encode_utf16().chain(std::iter::once(0)).collect();
        self.write_size(units.len())?;
        self.write_variance(units.len())?;
        for unit in units {
            self.ctx.put_u16(&mut self.buf, unit);
        }
        Ok(())
    }

    /// Null-terminated 8-bit string as a conformant varying array
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0) {
            return Err(NdrError::InvalidString("embedded NUL".to_string()));
        }
        let len = s.len() + 1;
        self.write_size(len)?;
        self.write_variance(len)?;
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    /// Consume the writer and return the encoded stream
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    pub(crate) fn allocate_referent(&mut self) -> Result<u32> {
        let id = self.next_referent;
        self.next_referent = self
            .next_referent
            .checked_add(4)
            .ok_or_else(|| NdrError::IntegerOverflow("referent ID space exhausted".to_string()))?;
        Ok(id)
    }

    /// Referent for a full pointer to `address`, with whether this is its
    /// first appearance in the stream
    pub(crate) fn full_referent(&mut self, address: usize) -> Result<(u32, bool)> {
        if let Some(entry) = self.full_ptrs.get(&address) {
            return Ok((entry.id, false));
        }
        let id = self.allocate_referent()?;
        self.full_ptrs.insert(address, FullReferent { id, sent: false });
        Ok((id, true))
    }

    /// Claim the right to transmit the pointee at `address`; true only once
    pub(crate) fn claim_full_pointee(&mut self, address: usize) -> bool {
        match self.full_ptrs.get_mut(&address) {
            Some(entry) if !entry.sent => {
                entry.sent = true;
                true
            }
            _ => false,
        }
    }
}

impl Default for NdrWriter {
    fn default() -> Self {
        Self::new()
    }
}
