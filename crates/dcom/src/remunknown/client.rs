//! IRemUnknown and IRemUnknown2 clients

use std::sync::Arc;

use async_trait::async_trait;
use dcerpc::{DceRpcClient, Operation, SyntaxId};

use super::protocol::*;
use crate::client::ObjectClient;
use crate::types::{check_hresult, Ipid, Result};

#[async_trait]
pub trait RemUnknownClient: Send + Sync {
    async fn rem_query_interface(
        &self,
        req: RemQueryInterfaceRequest,
    ) -> Result<RemQueryInterfaceResponse>;

    async fn rem_add_ref(&self, req: RemAddRefRequest) -> Result<RemAddRefResponse>;

    async fn rem_release(&self, req: RemReleaseRequest) -> Result<RemReleaseResponse>;

    fn conn(&self) -> &ObjectClient;

    /// Bind another interface on the same connection
    async fn alter_context(&self, syntax: SyntaxId) -> Result<ObjectClient> {
        self.conn().alter_context(syntax).await
    }

    /// Client addressing another IPID
    fn ipid(&self, ipid: Ipid) -> Self
    where
        Self: Sized;
}

#[derive(Clone, Debug)]
pub struct DefaultRemUnknownClient {
    obj: ObjectClient,
}

impl DefaultRemUnknownClient {
    /// Bind IRemUnknown on `conn`
    pub async fn new(conn: Arc<DceRpcClient>) -> Result<Self> {
        Ok(Self::from_object(ObjectClient::bind(conn, syntax()).await?))
    }

    /// Client over an already bound object, as a derived interface uses it
    pub fn from_object(obj: ObjectClient) -> Self {
        Self { obj }
    }
}

#[async_trait]
impl RemUnknownClient for DefaultRemUnknownClient {
    async fn rem_query_interface(
        &self,
        req: RemQueryInterfaceRequest,
    ) -> Result<RemQueryInterfaceResponse> {
        let mut op = RemQueryInterfaceOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = RemQueryInterfaceResponse::from_op(&mut op);
        check_hresult(RemQueryInterfaceOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn rem_add_ref(&self, req: RemAddRefRequest) -> Result<RemAddRefResponse> {
        let mut op = RemAddRefOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = RemAddRefResponse::from_op(&mut op);
        check_hresult(RemAddRefOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    async fn rem_release(&self, req: RemReleaseRequest) -> Result<RemReleaseResponse> {
        let mut op = RemReleaseOperation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = RemReleaseResponse::from_op(&mut op);
        check_hresult(RemReleaseOperation::NAME, resp.return_value)?;
        Ok(resp)
    }

    fn conn(&self) -> &ObjectClient {
        &self.obj
    }

    fn ipid(&self, ipid: Ipid) -> Self {
        Self {
            obj: self.obj.with_ipid(ipid),
        }
    }
}

#[async_trait]
pub trait RemUnknown2Client: Send + Sync {
    /// IRemUnknown methods, on the same context
    fn rem_unknown(&self) -> &dyn RemUnknownClient;

    async fn rem_query_interface2(
        &self,
        req: RemQueryInterface2Request,
    ) -> Result<RemQueryInterface2Response>;

    fn conn(&self) -> &ObjectClient;

    async fn alter_context(&self, syntax: SyntaxId) -> Result<ObjectClient> {
        self.conn().alter_context(syntax).await
    }

    fn ipid(&self, ipid: Ipid) -> Self
    where
        Self: Sized;
}

#[derive(Clone, Debug)]
pub struct DefaultRemUnknown2Client {
    base: DefaultRemUnknownClient,
    obj: ObjectClient,
}

impl DefaultRemUnknown2Client {
    /// Bind IRemUnknown2 on `conn`
    pub async fn new(conn: Arc<DceRpcClient>) -> Result<Self> {
        Ok(Self::from_object(
            ObjectClient::bind(conn, v2::syntax()).await?,
        ))
    }

    pub fn from_object(obj: ObjectClient) -> Self {
        Self {
            base: DefaultRemUnknownClient::from_object(obj.clone()),
            obj,
        }
    }
}

#[async_trait]
impl RemUnknown2Client for DefaultRemUnknown2Client {
    fn rem_unknown(&self) -> &dyn RemUnknownClient {
        &self.base
    }

    async fn rem_query_interface2(
        &self,
        req: RemQueryInterface2Request,
    ) -> Result<RemQueryInterface2Response> {
        let mut op = RemQueryInterface2Operation::default();
        req.to_op(&mut op);
        self.obj.invoke(&mut op).await?;
        let resp = RemQueryInterface2Response::from_op(&mut op);
        check_hresult(RemQueryInterface2Operation::NAME, resp.return_value)?;
        Ok(resp)
    }

    fn conn(&self) -> &ObjectClient {
        &self.obj
    }

    fn ipid(&self, ipid: Ipid) -> Self {
        Self::from_object(self.obj.with_ipid(ipid))
    }
}
