//! DCE RPC PDU fragmentation
//!
//! Stub data larger than the negotiated fragment size is carried by a
//! sequence of request or response PDUs sharing one call_id. The first has
//! FIRST_FRAG set, the last LAST_FRAG, and every fragment carries the total
//! stub length as alloc_hint.
//!
//! ```text
//! max_frag (e.g. 4280 bytes)
//! ├── PDU header (16 bytes)
//! ├── request/response body header (8 bytes)
//! ├── object UUID (16 bytes, requests with PFC_OBJECT_UUID only)
//! └── stub data fragment
//! ```
//!
//! Every fragment but the last carries a multiple of 8 stub bytes so NDR
//! alignment survives the split.

use crate::dcerpc::{PacketFlags, PduHeader, RequestPdu, ResponsePdu};
use crate::error::{Result, RpcError};
use bytes::{Bytes, BytesMut};

/// Upper bound on a reassembled stub (16 MB)
pub const DEFAULT_MAX_STUB_SIZE: usize = 16 * 1024 * 1024;

/// Splits outgoing PDUs into fragments
pub struct FragmentGenerator;

impl FragmentGenerator {
    /// Stub bytes that fit in one fragment of `max_frag`, rounded down to 8
    pub fn max_stub_size(max_frag: u16, has_object_uuid: bool) -> usize {
        let overhead = PduHeader::SIZE
            + RequestPdu::BODY_HEADER_SIZE
            + if has_object_uuid { 16 } else { 0 };
        (max_frag as usize).saturating_sub(overhead) & !7
    }

    fn flags(is_first: bool, is_last: bool, keep: PacketFlags) -> PacketFlags {
        let mut flags = keep;
        flags.clear(PacketFlags::FIRST_FRAG | PacketFlags::LAST_FRAG);
        if is_first {
            flags.set(PacketFlags::FIRST_FRAG);
        }
        if is_last {
            flags.set(PacketFlags::LAST_FRAG);
        }
        flags
    }

    /// Chunk boundaries for `total` bytes at `max_stub` per fragment
    fn chunks(total: usize, max_stub: usize) -> Result<Vec<(usize, usize)>> {
        if max_stub == 0 {
            return Err(RpcError::FragmentAssemblyError(
                "fragment size leaves no room for stub data".to_string(),
            ));
        }
        if total == 0 {
            return Ok(vec![(0, 0)]);
        }
        Ok((0..total)
            .step_by(max_stub)
            .map(|start| (start, (start + max_stub).min(total)))
            .collect())
    }

    /// Split a request. A request that fits comes back as one complete PDU.
    pub fn fragment_request(request: &RequestPdu, max_frag: u16) -> Result<Vec<RequestPdu>> {
        let max_stub = Self::max_stub_size(max_frag, request.object_uuid.is_some());
        let total = request.stub_data.len();
        let chunks = Self::chunks(total, max_stub)?;
        let count = chunks.len();

        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                let mut frag = request.clone();
                frag.alloc_hint = total as u32;
                frag.stub_data = request.stub_data.slice(start..end);
                frag.header.packet_flags =
                    Self::flags(i == 0, i + 1 == count, request.header.packet_flags);
                frag
            })
            .collect())
    }

    /// Split a response. A response that fits comes back as one complete PDU.
    pub fn fragment_response(response: &ResponsePdu, max_frag: u16) -> Result<Vec<ResponsePdu>> {
        let max_stub = Self::max_stub_size(max_frag, false);
        let total = response.stub_data.len();
        let chunks = Self::chunks(total, max_stub)?;
        let count = chunks.len();

        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                let mut frag = response.clone();
                frag.alloc_hint = total as u32;
                frag.stub_data = response.stub_data.slice(start..end);
                frag.header.packet_flags =
                    Self::flags(i == 0, i + 1 == count, response.header.packet_flags);
                frag
            })
            .collect())
    }
}

/// Reassembles the stub data of one fragmented call
pub struct FragmentAssembler {
    call_id: u32,
    stub_data: BytesMut,
    context_id: u16,
    opnum: Option<u16>,
    received_first: bool,
    received_last: bool,
    max_size: usize,
}

impl FragmentAssembler {
    pub fn new(call_id: u32) -> Self {
        Self {
            call_id,
            stub_data: BytesMut::new(),
            context_id: 0,
            opnum: None,
            received_first: false,
            received_last: false,
            max_size: DEFAULT_MAX_STUB_SIZE,
        }
    }

    /// Cap the reassembled size
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    pub fn context_id(&self) -> u16 {
        self.context_id
    }

    pub fn opnum(&self) -> Option<u16> {
        self.opnum
    }

    pub fn is_complete(&self) -> bool {
        self.received_first && self.received_last
    }

    /// Add one fragment.
    ///
    /// Returns `Ok(Some(stub))` once the LAST_FRAG fragment arrives and
    /// `Ok(None)` while more are expected. Fragments of another call, a
    /// different context or opnum, a missing first fragment or an oversized
    /// total are errors.
    pub fn add_fragment(
        &mut self,
        header: &PduHeader,
        stub: &[u8],
        ctx_id: u16,
        opnum: Option<u16>,
        alloc_hint: u32,
    ) -> Result<Option<Bytes>> {
        if header.call_id != self.call_id {
            return Err(RpcError::CallIdMismatch {
                expected: self.call_id,
                got: header.call_id,
            });
        }

        let is_first = header.packet_flags.is_first_frag();
        let is_last = header.packet_flags.is_last_frag();

        if is_first {
            if self.received_first {
                return Err(RpcError::FragmentAssemblyError(
                    "received duplicate first fragment".to_string(),
                ));
            }
            self.received_first = true;
            self.context_id = ctx_id;
            self.opnum = opnum;
            let hint = (alloc_hint as usize).min(self.max_size);
            self.stub_data.reserve(hint);
        } else if !self.received_first {
            return Err(RpcError::FragmentOutOfOrder);
        }

        if ctx_id != self.context_id {
            return Err(RpcError::ContextMismatch);
        }
        if opnum != self.opnum {
            return Err(RpcError::FragmentAssemblyError(format!(
                "opnum changed mid-call: {:?} -> {:?}",
                self.opnum, opnum
            )));
        }

        if self.stub_data.len() + stub.len() > self.max_size {
            return Err(RpcError::PduTooLarge {
                size: self.stub_data.len() + stub.len(),
                max: self.max_size,
            });
        }
        self.stub_data.extend_from_slice(stub);

        if is_last {
            self.received_last = true;
            return Ok(Some(self.stub_data.split().freeze()));
        }
        Ok(None)
    }

    /// Reuse the assembler for another call
    pub fn reset(&mut self, call_id: u32) {
        self.call_id = call_id;
        self.stub_data.clear();
        self.context_id = 0;
        self.opnum = None;
        self.received_first = false;
        self.received_last = false;
    }
}
