//! Wire operations
//!
//! One value of an [`Operation`] carries every in and out parameter of a
//! method. The client marshals its in-part and unmarshals the reply into the
//! same value; the server does the reverse.

use crate::error::Result;
use bytes::Bytes;
use midl_ndr::{NdrContext, NdrReader, NdrWriter};

/// A remotely callable method
pub trait Operation: Default + Send {
    /// Operation number within the interface
    const OPNUM: u16;
    /// Qualified name, "/Interface/vN/Method"
    const NAME: &'static str;

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()>;
    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()>;
    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()>;
    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()>;
}

/// Marshal the in-parameters of `op`
pub fn encode_request<O: Operation>(op: &O, ctx: NdrContext) -> Result<Bytes> {
    let mut w = NdrWriter::with_context(ctx);
    op.marshal_request(&mut w)?;
    Ok(w.finish())
}

/// Unmarshal a request into a fresh operation
pub fn decode_request<O: Operation>(stub: Bytes, ctx: NdrContext) -> Result<O> {
    let mut op = O::default();
    let mut r = NdrReader::with_context(stub, ctx);
    op.unmarshal_request(&mut r)?;
    Ok(op)
}

/// Marshal the out-parameters of `op`
pub fn encode_response<O: Operation>(op: &O, ctx: NdrContext) -> Result<Bytes> {
    let mut w = NdrWriter::with_context(ctx);
    op.marshal_response(&mut w)?;
    Ok(w.finish())
}

/// Unmarshal a response into `op`, keeping its in-parameters
pub fn decode_response<O: Operation>(op: &mut O, stub: Bytes, ctx: NdrContext) -> Result<()> {
    let mut r = NdrReader::with_context(stub, ctx);
    op.unmarshal_response(&mut r)?;
    Ok(())
}
