//! NDR string types
//!
//! NDR strings are conformant varying arrays with a null terminator.
//!
//! Wire format:
//! ```text
//! max_count: u32    # elements including the terminator
//! offset: u32       # always 0
//! actual_count: u32 # elements including the terminator
//! chars[actual_count]
//! ```
//!
//! A string is a complete pointee: it has no deferred part, so behind a
//! unique pointer the whole array lands where the pointee is deferred to.

use std::fmt;

use crate::{NdrDecode, NdrEncode, NdrReader, NdrWriter, Result};

macro_rules! ndr_string_type {
    ($(#[$meta:meta])* $name:ident, $write:ident, $read:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl NdrEncode for $name {
            fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
                w.$write(&self.0)
            }
        }

        impl NdrDecode for $name {
            fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
                r.$read().map(Self)
            }
        }
    };
}

ndr_string_type!(
    /// `[string] char*`
    NdrString, write_string, read_string
);

ndr_string_type!(
    /// `[string] wchar_t*`
    NdrWString, write_wstring, read_wstring
);
