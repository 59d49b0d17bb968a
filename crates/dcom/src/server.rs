//! DCOM object server
//!
//! Calls arrive on ordinary DCE/RPC presentation contexts. The request's
//! object UUID names the target IPID; [`DcomServer`] looks the IPID up and
//! hands the call to the stub exported under it.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use dcerpc::{CallContext, DceRpcServer, Interface, OperationHandler, RpcError, SyntaxId};
use tracing::{debug, warn};

use crate::exporter::{IpidEntry, IpidTable, ObjectExporter};
use crate::remunknown::{self, new_rem_unknown2_stub};
use crate::types::{hresult, iid, DualStringArray, Iid, Ipid, ObjRef, Oid, Oxid, Result, StdObjRef};

/// Server side of one interface: its IID, the IIDs it extends and the
/// dispatcher for its opnums
pub struct InterfaceStub {
    pub iid: Iid,
    pub bases: Vec<Iid>,
    handler: OperationHandler,
}

impl InterfaceStub {
    pub fn new<F, Fut>(iid: Iid, handler: F) -> Self
    where
        F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = dcerpc::Result<Bytes>> + Send + 'static,
    {
        Self {
            iid,
            bases: Vec::new(),
            handler: Arc::new(move |call, stub| Box::pin(handler(call, stub))),
        }
    }

    /// Declare a base interface whose opnums the handler also serves
    pub fn extends(mut self, base: Iid) -> Self {
        self.bases.push(base);
        self
    }

    /// Whether calls bound to `iid` may reach this stub
    pub fn implements(&self, iid: Iid) -> bool {
        iid == iid::IUNKNOWN || iid == self.iid || self.bases.contains(&iid)
    }

    pub fn handler(&self) -> &OperationHandler {
        &self.handler
    }
}

impl std::fmt::Debug for InterfaceStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceStub")
            .field("iid", &self.iid)
            .field("bases", &self.bases)
            .finish()
    }
}

/// Object exporter reachable over DCE/RPC
pub struct DcomServer {
    exporter: Arc<ObjectExporter>,
    rem_unknown: StdObjRef,
}

impl DcomServer {
    /// Server advertising `bindings`, hosting its own IRemUnknown2 object
    pub fn new(bindings: DualStringArray) -> Self {
        let exporter = Arc::new(ObjectExporter::new(bindings));
        let oid = Oid::generate();
        let ipid = Ipid::generate();
        let stub = new_rem_unknown2_stub(Arc::clone(&exporter));
        exporter
            .table()
            .insert(IpidEntry::new(ipid, oid, Arc::new(stub)));
        let rem_unknown = StdObjRef::new(exporter.oxid(), oid, ipid, 0);
        Self {
            exporter,
            rem_unknown,
        }
    }

    pub fn oxid(&self) -> Oxid {
        self.exporter.oxid()
    }

    pub fn bindings(&self) -> &DualStringArray {
        self.exporter.bindings()
    }

    pub fn exporter(&self) -> &Arc<ObjectExporter> {
        &self.exporter
    }

    /// IPID of the exporter's IRemUnknown2 object
    pub fn rem_unknown_ipid(&self) -> Ipid {
        self.rem_unknown.ipid
    }

    /// Export a new object; returns its STDOBJREF
    pub fn export(&self, stub: InterfaceStub) -> Result<StdObjRef> {
        self.exporter.export(stub)
    }

    /// Add an interface to an exported object
    pub fn export_interface(
        &self,
        oid: Oid,
        stub: InterfaceStub,
        ipid: Option<Ipid>,
    ) -> Result<Ipid> {
        self.exporter.export_interface(oid, stub, ipid)
    }

    pub fn unexport(&self, ipid: &Ipid) -> Result<()> {
        self.exporter.unexport(ipid)
    }

    /// Marshal an exported interface pointer as a standard OBJREF
    pub fn objref(&self, ipid: &Ipid, public_refs: u32) -> Result<ObjRef> {
        self.exporter.objref(ipid, public_refs)
    }

    /// DCE/RPC interface for `syntax` whose calls are routed by IPID
    pub fn interface(&self, syntax: SyntaxId) -> Interface {
        let table = Arc::clone(self.exporter.table());
        let mut interface = Interface::from_syntax(syntax);
        interface.set_dispatch(move |call, stub| route(Arc::clone(&table), call, stub));
        interface
    }

    /// Register IRemUnknown, IRemUnknown2 and every syntax in `syntaxes`
    pub async fn register(&self, rpc: &DceRpcServer, syntaxes: &[SyntaxId]) {
        let base = [remunknown::syntax(), remunknown::v2::syntax()];
        for syntax in base.iter().chain(syntaxes) {
            rpc.register_interface(self.interface(*syntax)).await;
        }
    }
}

async fn route(table: Arc<IpidTable>, call: CallContext, stub: Bytes) -> dcerpc::Result<Bytes> {
    let ipid = match call.object {
        Some(object) if !object.is_nil() => Ipid(object),
        _ => {
            warn!("Call {} opnum {} carries no IPID", call.call_id, call.opnum);
            return Err(RpcError::Fault(hresult::RPC_E_INVALID_IPID));
        }
    };
    let target = table.stub(&ipid).ok_or_else(|| {
        warn!("Call {} for unknown IPID {}", call.call_id, ipid);
        RpcError::Fault(hresult::RPC_E_INVALID_IPID)
    })?;
    let iid = Iid(call.interface.uuid);
    if !target.implements(iid) {
        return Err(RpcError::InterfaceNotFound(format!(
            "IPID {} does not serve {}",
            ipid, call.interface
        )));
    }
    debug!("Call {} opnum {} -> {} ({:?})", call.call_id, call.opnum, ipid, target.iid);
    (target.handler)(call, stub).await
}
