//! IUnknown
//!
//! QueryInterface, AddRef and Release occupy opnums 0..=2 of every DCOM
//! interface but are never remoted; IRemUnknown carries that work instead.

use bytes::Bytes;
use dcerpc::{RpcError, SyntaxId, Uuid};

pub const SYNTAX_UUID: Uuid = Uuid::from_u128(0x00000000_0000_0000_c000_000000000046);
pub const MAJOR_VERSION: u16 = 0;
pub const MINOR_VERSION: u16 = 0;

/// Last opnum IUnknown reserves
pub const LAST_OPNUM: u16 = 2;

pub fn syntax() -> SyntaxId {
    SyntaxId::new(SYNTAX_UUID, MAJOR_VERSION, MINOR_VERSION)
}

/// Every IUnknown opnum answers op_rng_error
pub fn unknown_dispatch(opnum: u16) -> dcerpc::Result<Bytes> {
    Err(RpcError::OperationUnavailable(opnum))
}
