//! IRemUnknown and IRemUnknown2 server side

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dcerpc::operation::{decode_request, encode_response};
use dcerpc::RpcError;
use midl_ndr::NdrContext;

use super::protocol::*;
use crate::iunknown;
use crate::server::InterfaceStub;
use crate::types::{iid, Result};

#[async_trait]
pub trait RemUnknownServer: Send + Sync {
    async fn rem_query_interface(
        &self,
        req: RemQueryInterfaceRequest,
    ) -> Result<RemQueryInterfaceResponse>;

    async fn rem_add_ref(&self, req: RemAddRefRequest) -> Result<RemAddRefResponse>;

    async fn rem_release(&self, req: RemReleaseRequest) -> Result<RemReleaseResponse>;
}

#[async_trait]
pub trait RemUnknown2Server: RemUnknownServer {
    async fn rem_query_interface2(
        &self,
        req: RemQueryInterface2Request,
    ) -> Result<RemQueryInterface2Response>;
}

/// Unmarshal opnum 3..=5, call `server`, marshal the reply
pub async fn rem_unknown_dispatch<S: RemUnknownServer + ?Sized>(
    server: &S,
    opnum: u16,
    stub: Bytes,
    ndr: NdrContext,
) -> dcerpc::Result<Bytes> {
    if opnum <= iunknown::LAST_OPNUM {
        return iunknown::unknown_dispatch(opnum);
    }
    match opnum {
        opnum::REM_QUERY_INTERFACE => {
            let mut op: RemQueryInterfaceOperation = decode_request(stub, ndr)?;
            let req = RemQueryInterfaceRequest::from_op(&mut op);
            let resp = server.rem_query_interface(req).await?;
            resp.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::REM_ADD_REF => {
            let mut op: RemAddRefOperation = decode_request(stub, ndr)?;
            let req = RemAddRefRequest::from_op(&mut op);
            let resp = server.rem_add_ref(req).await?;
            resp.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        opnum::REM_RELEASE => {
            let mut op: RemReleaseOperation = decode_request(stub, ndr)?;
            let req = RemReleaseRequest::from_op(&mut op);
            let resp = server.rem_release(req).await?;
            resp.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        _ => Err(RpcError::OperationUnavailable(opnum)),
    }
}

/// IRemUnknown2 adds opnum 6 and hands 0..=5 to the base
pub async fn rem_unknown2_dispatch<S: RemUnknown2Server + ?Sized>(
    server: &S,
    opnum: u16,
    stub: Bytes,
    ndr: NdrContext,
) -> dcerpc::Result<Bytes> {
    if opnum < opnum::REM_QUERY_INTERFACE2 {
        return rem_unknown_dispatch(server, opnum, stub, ndr).await;
    }
    match opnum {
        opnum::REM_QUERY_INTERFACE2 => {
            let mut op: RemQueryInterface2Operation = decode_request(stub, ndr)?;
            let req = RemQueryInterface2Request::from_op(&mut op);
            let resp = server.rem_query_interface2(req).await?;
            resp.to_op(&mut op);
            encode_response(&op, NdrContext::new())
        }
        _ => Err(RpcError::OperationUnavailable(opnum)),
    }
}

pub fn new_rem_unknown_stub<S: RemUnknownServer + ?Sized + 'static>(server: Arc<S>) -> InterfaceStub {
    InterfaceStub::new(iid::IREMUNKNOWN, move |call, stub| {
        let server = Arc::clone(&server);
        async move { rem_unknown_dispatch(server.as_ref(), call.opnum, stub, call.ndr).await }
    })
}

pub fn new_rem_unknown2_stub<S: RemUnknown2Server + ?Sized + 'static>(
    server: Arc<S>,
) -> InterfaceStub {
    InterfaceStub::new(iid::IREMUNKNOWN2, move |call, stub| {
        let server = Arc::clone(&server);
        async move { rem_unknown2_dispatch(server.as_ref(), call.opnum, stub, call.ndr).await }
    })
    .extends(iid::IREMUNKNOWN)
}
