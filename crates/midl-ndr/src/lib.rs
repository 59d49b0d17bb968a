//! NDR (Network Data Representation) runtime library
//!
//! This crate implements the NDR20 transfer syntax used by DCE RPC and
//! MS-RPCE stubs. Marshalling goes through [`NdrWriter`] and
//! unmarshalling through [`NdrReader`]; types take part by implementing
//! [`NdrEncode`] and [`NdrDecode`].
//!
//! # NDR Wire Format
//!
//! - Primitives align to their natural size (1, 2, 4, or 8 bytes)
//! - Conformant arrays carry their max_count ahead of the elements
//! - Strings are conformant varying arrays with a null terminator
//! - Embedded pointers carry a referent ID inline; the pointee is deferred
//!   until the inline part of the enclosing top-level value is complete
//!
//! ```
//! use midl_ndr::{NdrReader, NdrWriter, NdrWString, UniquePtr};
//!
//! let mut w = NdrWriter::new();
//! w.write_u32(7);
//! w.write_data(&UniquePtr::new(NdrWString::from("server"))).unwrap();
//!
//! let mut r = NdrReader::new(w.finish());
//! assert_eq!(r.read_u32().unwrap(), 7);
//! let name: UniquePtr<NdrWString> = r.read_data().unwrap();
//! assert_eq!(name.as_ref().unwrap().as_str(), "server");
//! ```

mod arrays;
mod context;
mod decode;
mod encode;
mod error;
mod pointers;
mod primitives;
mod reader;
mod strings;
mod union;
mod writer;

pub use arrays::{ConformantArray, ConformantVaryingArray, VaryingArray};
pub use context::NdrContext;
pub use decode::NdrDecode;
pub use encode::NdrEncode;
pub use error::{
    NdrError, Result, MAX_NDR_ALLOCATION_SIZE, MAX_NDR_ARRAY_ELEMENTS, MAX_NDR_BYTE_ARRAY_LEN,
};
pub use pointers::{FullPtr, RefPtr, UniquePtr};
pub use primitives::Guid;
pub use reader::NdrReader;
pub use strings::{NdrString, NdrWString};
pub use union::NdrUnion;
pub use writer::NdrWriter;

pub use bytes::{Bytes, BytesMut};
