//! Object exporter runtime
//!
//! - IPID table of exported interface pointers
//! - Distributed reference counts kept per IPID
//! - IRemUnknown2 served against the table

mod object_exporter;
mod tables;

pub use object_exporter::ObjectExporter;
pub use tables::{IpidEntry, IpidTable};
