//! Object client
//!
//! Every DCOM interface client funnels its calls through an [`ObjectClient`]:
//! one connection, the presentation context the interface is bound on, and
//! the IPID of the object being addressed.

use std::fmt;
use std::sync::Arc;

use dcerpc::{DceRpcClient, Operation, SyntaxId};
use tracing::debug;

use crate::types::{DcomError, Ipid, Result};

/// Connection, presentation context and IPID for ORPC calls
#[derive(Clone)]
pub struct ObjectClient {
    conn: Arc<DceRpcClient>,
    context_id: u16,
    ipid: Option<Ipid>,
}

impl ObjectClient {
    /// Client on the connection's primary context, with no IPID yet
    pub fn new(conn: Arc<DceRpcClient>) -> Self {
        Self {
            conn,
            context_id: 0,
            ipid: None,
        }
    }

    /// Client on the context bound to `syntax`, negotiating it with
    /// alter_context when the connection does not carry it yet
    pub async fn bind(conn: Arc<DceRpcClient>, syntax: SyntaxId) -> Result<Self> {
        let context_id = conn.bind_context(syntax).await?;
        debug!("Interface {} on context {}", syntax, context_id);
        Ok(Self {
            conn,
            context_id,
            ipid: None,
        })
    }

    /// Same connection and context, addressing `ipid`
    pub fn with_ipid(&self, ipid: Ipid) -> Self {
        Self {
            ipid: Some(ipid),
            ..self.clone()
        }
    }

    pub fn ipid(&self) -> Option<Ipid> {
        self.ipid
    }

    pub fn context_id(&self) -> u16 {
        self.context_id
    }

    pub fn connection(&self) -> &Arc<DceRpcClient> {
        &self.conn
    }

    /// Same connection and IPID on the context bound to `syntax`
    pub async fn alter_context(&self, syntax: SyntaxId) -> Result<Self> {
        let context_id = self.conn.bind_context(syntax).await?;
        Ok(Self {
            conn: Arc::clone(&self.conn),
            context_id,
            ipid: self.ipid,
        })
    }

    /// Send `op` to the addressed object and unmarshal the reply into it
    pub async fn invoke<O: Operation>(&self, op: &mut O) -> Result<()> {
        let ipid = self.ipid.ok_or(DcomError::MissingIpid(O::NAME))?;
        debug!("{} -> {} (ctx {})", O::NAME, ipid, self.context_id);
        self.conn
            .invoke(self.context_id, Some(ipid.guid()), op)
            .await?;
        Ok(())
    }
}

impl fmt::Debug for ObjectClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectClient")
            .field("interface", self.conn.interface())
            .field("context_id", &self.context_id)
            .field("ipid", &self.ipid)
            .finish()
    }
}
