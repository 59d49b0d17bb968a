//! IRemUnknown and IRemUnknown2 (MS-DCOM 3.1.1.5.6)
//!
//! Remote reference counting and interface queries against an object
//! exporter:
//! - RemQueryInterface / RemQueryInterface2
//! - RemAddRef / RemRelease

mod client;
mod protocol;
mod server;

pub use client::{
    DefaultRemUnknown2Client, DefaultRemUnknownClient, RemUnknown2Client, RemUnknownClient,
};
pub use protocol::{
    opnum, syntax, v2, RemAddRefRequest, RemAddRefResponse, RemInterfaceRef, RemQiResult,
    RemQueryInterface2Request, RemQueryInterface2Response, RemQueryInterfaceRequest,
    RemQueryInterfaceResponse, RemReleaseRequest, RemReleaseResponse, MAJOR_VERSION,
    MINOR_VERSION, SYNTAX_UUID,
};
pub use server::{
    new_rem_unknown2_stub, new_rem_unknown_stub, rem_unknown2_dispatch, rem_unknown_dispatch,
    RemUnknown2Server, RemUnknownServer,
};
