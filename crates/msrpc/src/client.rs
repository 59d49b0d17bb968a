//! Call path shared by the plain (non-DCOM) RPC interface clients

use std::fmt;
use std::sync::Arc;

use dcerpc::{DceRpcClient, Operation, SyntaxId};
use tracing::debug;

use dcom::Result;

/// A presentation context on a connection, without an object UUID
#[derive(Clone)]
pub struct InterfaceClient {
    conn: Arc<DceRpcClient>,
    context_id: u16,
}

impl InterfaceClient {
    /// Bind `syntax` on `conn`; an already bound syntax reuses its context
    pub async fn bind(conn: Arc<DceRpcClient>, syntax: SyntaxId) -> Result<Self> {
        let context_id = conn.bind_context(syntax).await?;
        Ok(Self { conn, context_id })
    }

    pub fn context_id(&self) -> u16 {
        self.context_id
    }

    pub fn connection(&self) -> &Arc<DceRpcClient> {
        &self.conn
    }

    pub async fn invoke<O: Operation>(&self, op: &mut O) -> Result<()> {
        debug!("{} on context {}", O::NAME, self.context_id);
        self.conn.invoke(self.context_id, None, op).await?;
        Ok(())
    }
}

impl fmt::Debug for InterfaceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceClient")
            .field("context_id", &self.context_id)
            .finish()
    }
}
