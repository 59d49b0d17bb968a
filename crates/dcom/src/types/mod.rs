//! Core DCOM types (MS-DCOM 2.2)
//!
//! - Identifiers: OXID, OID, IPID, IID, CLSID, CID
//! - Object references: STDOBJREF, OBJREF, MInterfacePointer
//! - String bindings: DUALSTRINGARRAY
//! - ORPC headers: ORPCTHIS, ORPCTHAT

mod error;
mod identifiers;
mod objref;
mod orpc;
mod stdobjref;
mod stringbinding;

pub use error::{check_hresult, check_win32, hresult, DcomError, Result};
pub use identifiers::{generate_guid, Cid, Clsid, Iid, Ipid, Oid, Oxid};
pub use objref::{
    objref_flags, MInterfacePointer, ObjRef, ObjRefCustom, ObjRefHandler, ObjRefKind,
    ObjRefStandard, OBJREF_SIGNATURE,
};
pub use orpc::{ComVersion, OrpcExtent, OrpcExtentArray, OrpcThat, OrpcThis};
pub use stdobjref::{flags as sorf, StdObjRef};
pub use stringbinding::{authn_svc, protocol_id, DualStringArray, SecurityBinding, StringBinding};

/// Well-known interface IDs
pub mod iid {
    use super::Iid;

    pub const IUNKNOWN: Iid = Iid::from_u128(0x00000000_0000_0000_c000_000000000046);
    pub const IREMUNKNOWN: Iid = Iid::from_u128(0x00000131_0000_0000_c000_000000000046);
    pub const IREMUNKNOWN2: Iid = Iid::from_u128(0x00000143_0000_0000_c000_000000000046);
    pub const IDISPATCH: Iid = Iid::from_u128(0x00020400_0000_0000_c000_000000000046);
}
