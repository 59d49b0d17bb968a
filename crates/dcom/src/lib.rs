//! DCOM (MS-DCOM) object RPC on top of connection-oriented DCE/RPC
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Interface stubs: IUnknown, IRemUnknown(2), IDispatch, ...   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ObjectClient (IPID + context)   │  DcomServer (IPID routing) │
//! │                                  │  ObjectExporter + IPID     │
//! │                                  │  table                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ORPCTHIS / ORPCTHAT, OBJREF, DUALSTRINGARRAY (types)        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                  DCE/RPC (dcerpc crate)                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every DCOM call is a DCE/RPC request whose object UUID is the IPID of
//! the target interface pointer. The stub data opens with ORPCTHIS and the
//! response opens with ORPCTHAT; both are part of each operation's NDR
//! layout.
//!
//! # Modules
//!
//! - [`types`]: identifiers, ORPC headers, object references, errors
//! - [`client`]: [`ObjectClient`], an IPID bound to a presentation context
//! - [`server`]: [`InterfaceStub`] and [`DcomServer`]
//! - [`iunknown`], [`remunknown`], [`idispatch`]: standard interfaces
//! - [`exporter`]: the object exporter and its IPID table

pub mod client;
pub mod exporter;
pub mod idispatch;
pub mod iunknown;
pub mod remunknown;
pub mod server;
pub mod types;

pub use client::ObjectClient;
pub use exporter::{IpidEntry, IpidTable, ObjectExporter};
pub use server::{DcomServer, InterfaceStub};
pub use types::{
    check_hresult, check_win32, hresult, iid, ComVersion, DcomError, DualStringArray, Iid, Ipid,
    MInterfacePointer, ObjRef, Oid, OrpcThat, OrpcThis, Oxid, Result, StdObjRef, StringBinding,
};

/// DCOM protocol version carried in ORPCTHIS
pub const DCOM_VERSION: ComVersion = ComVersion::DCOM_5_7;
