//! NDR pointer types
//!
//! NDR supports three pointer semantics:
//!
//! - Reference (`[ref]`): non-null, no wire representation at top level
//! - Unique (`[unique]`): nullable 4-byte referent ID, no aliasing
//! - Full (`[ptr]`): nullable 4-byte referent ID, aliases share one ID
//!
//! Unique and full pointers embedded in a structure or array put only the
//! referent ID in the inline part; the pointee follows in the deferred part.

use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::{NdrDecode, NdrEncode, NdrReader, NdrWriter, Result};

/// Reference pointer. The pointee is written inline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefPtr<T>(pub T);

impl<T> RefPtr<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for RefPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for RefPtr<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: NdrEncode> NdrEncode for RefPtr<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        self.0.ndr_encode(w)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        self.0.ndr_encode_deferred(w)
    }
}

impl<T: NdrDecode> NdrDecode for RefPtr<T> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        T::ndr_decode(r).map(Self)
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        self.0.ndr_decode_deferred(r)
    }
}

/// Unique pointer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniquePtr<T>(pub Option<Box<T>>);

impl<T> UniquePtr<T> {
    pub fn new(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    pub fn null() -> Self {
        Self(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_ref(&self) -> Option<&T> {
        self.0.as_deref()
    }

    pub fn as_mut(&mut self) -> Option<&mut T> {
        self.0.as_deref_mut()
    }

    pub fn into_option(self) -> Option<T> {
        self.0.map(|b| *b)
    }
}

impl<T> Default for UniquePtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<Option<T>> for UniquePtr<T> {
    fn from(value: Option<T>) -> Self {
        Self(value.map(Box::new))
    }
}

impl<T: NdrEncode> NdrEncode for UniquePtr<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_pointer(self.0.is_some())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        match &self.0 {
            Some(value) => w.write_data(&**value),
            None => Ok(()),
        }
    }
}

impl<T: NdrDecode + Default> NdrDecode for UniquePtr<T> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        // placeholder until the deferred pass reads the pointee
        if r.read_pointer()? {
            Ok(Self(Some(Box::default())))
        } else {
            Ok(Self(None))
        }
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        if let Some(slot) = self.0.as_mut() {
            **slot = r.read_data()?;
        }
        Ok(())
    }
}

/// Full pointer. Clones of the same `Arc` marshal as aliases.
pub struct FullPtr<T> {
    value: Option<Arc<T>>,
    referent: u32,
}

impl<T> FullPtr<T> {
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc(value: Arc<T>) -> Self {
        Self { value: Some(value), referent: 0 }
    }

    pub fn null() -> Self {
        Self { value: None, referent: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_deref()
    }

    pub fn arc(&self) -> Option<&Arc<T>> {
        self.value.as_ref()
    }

    /// True when both pointers refer to the same pointee
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.value, &other.value) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn address(value: &Arc<T>) -> usize {
        Arc::as_ptr(value) as *const () as usize
    }
}

impl<T> Clone for FullPtr<T> {
    fn clone(&self) -> Self {
        Self { value: self.value.clone(), referent: self.referent }
    }
}

impl<T> Default for FullPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: fmt::Debug> fmt::Debug for FullPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FullPtr").field(&self.value).finish()
    }
}

impl<T: PartialEq> PartialEq for FullPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: NdrEncode> NdrEncode for FullPtr<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        match &self.value {
            Some(value) => {
                let (id, _) = w.full_referent(Self::address(value))?;
                w.write_u32(id);
            }
            None => w.write_u32(0),
        }
        Ok(())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        match &self.value {
            Some(value) if w.claim_full_pointee(Self::address(value)) => w.write_data(&**value),
            _ => Ok(()),
        }
    }
}

impl<T: NdrDecode + Any + Send + Sync> NdrDecode for FullPtr<T> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let referent = r.read_referent()?;
        Ok(Self { value: None, referent })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        if self.referent == 0 || self.value.is_some() {
            return Ok(());
        }
        let value = match r.full_pointee::<T>(self.referent)? {
            Some(existing) => existing,
            None => {
                let fresh = Arc::new(r.read_data::<T>()?);
                r.register_full_pointee(self.referent, Arc::clone(&fresh));
                fresh
            }
        };
        self.value = Some(value);
        Ok(())
    }
}
