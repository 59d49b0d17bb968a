//! NDR array types
//!
//! - Fixed: `[T; N]`, no header
//! - Conformant (`[size_is]`): max_count, then the elements
//! - Varying (`[length_is]` with a fixed bound): offset, actual_count, elements
//! - Conformant varying (`[size_is, length_is]`): max_count, offset,
//!   actual_count, elements
//!
//! Every array writes all element scalars before any element's deferred
//! pointees. Arrays used as struct members whose size comes from a sibling
//! field are written with [`NdrWriter::write_elements`] by the owning struct
//! instead of these wrappers.

use crate::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter, Result};

/// Fixed-size array
impl<T: NdrEncode, const N: usize> NdrEncode for [T; N] {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        for item in self.iter() {
            item.ndr_encode(w)?;
        }
        Ok(())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        for item in self.iter() {
            item.ndr_encode_deferred(w)?;
        }
        Ok(())
    }
}

impl<T: NdrDecode, const N: usize> NdrDecode for [T; N] {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::ndr_decode(r)?);
        }
        items.try_into().map_err(|_| NdrError::BufferUnderflow { needed: N, have: 0 })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        for item in self.iter_mut() {
            item.ndr_decode_deferred(r)?;
        }
        Ok(())
    }
}

/// Conformant array (`[size_is(n)] T*` pointee or standalone)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConformantArray<T>(pub Vec<T>);

/// Conformant varying array; `max_count` defaults to the element count
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConformantVaryingArray<T> {
    pub max_count: Option<usize>,
    pub elements: Vec<T>,
}

/// Varying array with a fixed bound `N`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VaryingArray<T, const N: usize>(pub Vec<T>);

impl<T> ConformantArray<T> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> From<Vec<T>> for ConformantArray<T> {
    fn from(v: Vec<T>) -> Self {
        Self(v)
    }
}

impl<T> ConformantVaryingArray<T> {
    pub fn new(elements: Vec<T>) -> Self {
        Self { max_count: None, elements }
    }

    pub fn with_max(max_count: usize, elements: Vec<T>) -> Self {
        Self { max_count: Some(max_count), elements }
    }
}

impl<T: NdrEncode> NdrEncode for ConformantArray<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_size(self.0.len())?;
        for item in &self.0 {
            item.ndr_encode(w)?;
        }
        Ok(())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        for item in &self.0 {
            item.ndr_encode_deferred(w)?;
        }
        Ok(())
    }
}

impl<T: NdrDecode> NdrDecode for ConformantArray<T> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let count = r.read_size()?;
        r.check_array_len(count, "conformant array")?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::ndr_decode(r)?);
        }
        Ok(Self(items))
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        for item in self.0.iter_mut() {
            item.ndr_decode_deferred(r)?;
        }
        Ok(())
    }
}

impl<T: NdrEncode> NdrEncode for ConformantVaryingArray<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        let actual = self.elements.len();
        let max_count = self.max_count.unwrap_or(actual).max(actual);
        w.write_size(max_count)?;
        w.write_variance(actual)?;
        for item in &self.elements {
            item.ndr_encode(w)?;
        }
        Ok(())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        for item in &self.elements {
            item.ndr_encode_deferred(w)?;
        }
        Ok(())
    }
}

impl<T: NdrDecode> NdrDecode for ConformantVaryingArray<T> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let max_count = r.read_size()?;
        let actual = r.read_variance(max_count)?;
        r.check_array_len(actual, "conformant varying array")?;
        let mut elements = Vec::with_capacity(actual);
        for _ in 0..actual {
            elements.push(T::ndr_decode(r)?);
        }
        Ok(Self { max_count: Some(max_count), elements })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        for item in self.elements.iter_mut() {
            item.ndr_decode_deferred(r)?;
        }
        Ok(())
    }
}

impl<T: NdrEncode, const N: usize> NdrEncode for VaryingArray<T, N> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        if self.0.len() > N {
            return Err(NdrError::IntegerOverflow(format!(
                "varying array holds {} elements, bound is {}",
                self.0.len(),
                N
            )));
        }
        w.write_variance(self.0.len())?;
        for item in &self.0 {
            item.ndr_encode(w)?;
        }
        Ok(())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        for item in &self.0 {
            item.ndr_encode_deferred(w)?;
        }
        Ok(())
    }
}

impl<T: NdrDecode, const N: usize> NdrDecode for VaryingArray<T, N> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let actual = r.read_variance(N)?;
        r.check_array_len(actual, "varying array")?;
        let mut items = Vec::with_capacity(actual);
        for _ in 0..actual {
            items.push(T::ndr_decode(r)?);
        }
        Ok(Self(items))
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        for item in self.0.iter_mut() {
            item.ndr_decode_deferred(r)?;
        }
        Ok(())
    }
}
