//! DCOM identifiers (MS-DCOM 2.2.18)
//!
//! - OXID: object exporter identifier
//! - OID: object identifier
//! - IPID: interface pointer identifier
//! - IID, CLSID and CID: interface, class and causality GUIDs

use midl_ndr::{Guid, NdrDecode, NdrEncode, NdrReader, NdrWriter};
use std::fmt;

/// Random v4 GUID
pub fn generate_guid() -> Guid {
    Guid::from_u128(uuid::Uuid::new_v4().as_u128())
}

macro_rules! guid_newtype {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub Guid);

        impl $name {
            pub const NIL: Self = Self(Guid::NIL);

            pub const fn from_u128(v: u128) -> Self {
                Self(Guid::from_u128(v))
            }

            pub fn parse(s: &str) -> midl_ndr::Result<Self> {
                Guid::parse(s).map(Self)
            }

            /// Fresh random value
            pub fn generate() -> Self {
                Self(generate_guid())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            pub fn guid(&self) -> Guid {
                self.0
            }
        }

        impl From<Guid> for $name {
            fn from(guid: Guid) -> Self {
                Self(guid)
            }
        }

        impl From<$name> for Guid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $label, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl NdrEncode for $name {
            fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
                self.0.ndr_encode(w)
            }
        }

        impl NdrDecode for $name {
            fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
                Guid::ndr_decode(r).map(Self)
            }
        }
    };
}

guid_newtype!(
    /// Interface identifier
    Iid,
    "IID"
);
guid_newtype!(
    /// Interface pointer identifier. Travels as the object UUID of every
    /// ORPC request.
    Ipid,
    "IPID"
);
guid_newtype!(
    /// Class identifier
    Clsid,
    "CLSID"
);
guid_newtype!(
    /// Causality identifier shared by all calls of one logical invocation
    Cid,
    "CID"
);

macro_rules! u64_newtype {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Random non-zero value
            pub fn generate() -> Self {
                loop {
                    let value = (uuid::Uuid::new_v4().as_u128() >> 64) as u64;
                    if value != 0 {
                        return Self(value);
                    }
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:016x})", $label, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:016x}", self.0)
            }
        }

        impl NdrEncode for $name {
            fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
                w.write_u64(self.0);
                Ok(())
            }
        }

        impl NdrDecode for $name {
            fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
                r.read_u64().map(Self)
            }
        }
    };
}

u64_newtype!(
    /// Object exporter identifier
    Oxid,
    "OXID"
);
u64_newtype!(
    /// Object identifier, unique within its exporter
    Oid,
    "OID"
);
