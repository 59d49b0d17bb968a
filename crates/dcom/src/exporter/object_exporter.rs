//! Object exporter
//!
//! Owns the OXID, the string bindings clients use to reach it and the IPID
//! table. It also answers IRemUnknown2 against that table.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::tables::{IpidEntry, IpidTable};
use crate::remunknown::{
    RemAddRefRequest, RemAddRefResponse, RemQiResult, RemQueryInterface2Request,
    RemQueryInterface2Response, RemQueryInterfaceRequest, RemQueryInterfaceResponse,
    RemReleaseRequest, RemReleaseResponse, RemUnknown2Server, RemUnknownServer,
};
use crate::server::InterfaceStub;
use crate::types::{
    hresult, DcomError, DualStringArray, Iid, Ipid, MInterfacePointer, ObjRef, Oid, Oxid, Result,
    StdObjRef,
};

/// Public references handed out with each RemQueryInterface2 result
const QI2_PUBLIC_REFS: u32 = 1;

pub struct ObjectExporter {
    oxid: Oxid,
    bindings: DualStringArray,
    table: Arc<IpidTable>,
}

impl ObjectExporter {
    pub fn new(bindings: DualStringArray) -> Self {
        Self {
            oxid: Oxid::generate(),
            bindings,
            table: Arc::new(IpidTable::new()),
        }
    }

    pub fn oxid(&self) -> Oxid {
        self.oxid
    }

    pub fn bindings(&self) -> &DualStringArray {
        &self.bindings
    }

    pub fn table(&self) -> &Arc<IpidTable> {
        &self.table
    }

    /// Export a new object with one interface; returns its reference
    pub fn export(&self, stub: InterfaceStub) -> Result<StdObjRef> {
        let oid = Oid::generate();
        let ipid = self.export_interface(oid, stub, None)?;
        Ok(StdObjRef::new(self.oxid, oid, ipid, 0))
    }

    /// Add an interface to object `oid` under `ipid`, or a fresh IPID
    pub fn export_interface(
        &self,
        oid: Oid,
        stub: InterfaceStub,
        ipid: Option<Ipid>,
    ) -> Result<Ipid> {
        let ipid = ipid.unwrap_or_else(Ipid::generate);
        let iid = stub.iid;
        if !self.table.insert(IpidEntry::new(ipid, oid, Arc::new(stub))) {
            return Err(DcomError::DuplicateIpid(ipid.to_string()));
        }
        info!("Exported {:?} on {:?} as {}", iid, oid, ipid);
        Ok(ipid)
    }

    /// Withdraw an interface pointer
    pub fn unexport(&self, ipid: &Ipid) -> Result<()> {
        match self.table.remove(ipid) {
            Some(entry) => {
                debug!("Unexported {} ({:?})", ipid, entry.iid());
                Ok(())
            }
            None => Err(DcomError::UnknownIpid(ipid.to_string())),
        }
    }

    /// Standard OBJREF for an exported interface pointer
    pub fn objref(&self, ipid: &Ipid, public_refs: u32) -> Result<ObjRef> {
        let entry = self
            .table
            .lookup(ipid)
            .ok_or_else(|| DcomError::UnknownIpid(ipid.to_string()))?;
        Ok(ObjRef::standard(
            entry.iid(),
            StdObjRef::new(self.oxid, entry.oid, entry.ipid, public_refs),
            self.bindings.clone(),
        ))
    }

    /// Resolve `iid` on the object behind `ripid`, adding `refs` public
    /// references to the interface pointer found
    fn query(&self, oid: Oid, iid: Iid, refs: u32) -> Option<IpidEntry> {
        let entry = self.table.find_interface(oid, iid)?;
        self.table.add_refs(&entry.ipid, refs, 0);
        Some(entry)
    }
}

#[async_trait]
impl RemUnknownServer for ObjectExporter {
    async fn rem_query_interface(
        &self,
        req: RemQueryInterfaceRequest,
    ) -> Result<RemQueryInterfaceResponse> {
        let iids_count = req.iids.len() as u16;
        let Some(object) = self.table.lookup(&req.ripid) else {
            return Ok(RemQueryInterfaceResponse {
                iids_count,
                return_value: hresult::E_INVALIDARG as i32,
                ..Default::default()
            });
        };

        let qi_results: Vec<RemQiResult> = req
            .iids
            .iter()
            .map(|iid| match self.query(object.oid, *iid, req.refs) {
                Some(found) => RemQiResult {
                    hresult: hresult::S_OK as i32,
                    std: StdObjRef::new(self.oxid, found.oid, found.ipid, req.refs),
                },
                None => RemQiResult {
                    hresult: hresult::E_NOINTERFACE as i32,
                    std: StdObjRef::default(),
                },
            })
            .collect();

        let return_value = if !qi_results.is_empty() && qi_results.iter().all(|r| r.hresult != 0) {
            hresult::E_NOINTERFACE
        } else {
            hresult::S_OK
        };
        debug!(
            "RemQueryInterface on {}: {} of {} resolved",
            req.ripid,
            qi_results.iter().filter(|r| r.hresult == 0).count(),
            qi_results.len()
        );
        Ok(RemQueryInterfaceResponse {
            that: None,
            iids_count,
            qi_results,
            return_value: return_value as i32,
        })
    }

    async fn rem_add_ref(&self, req: RemAddRefRequest) -> Result<RemAddRefResponse> {
        let results: Vec<i32> = req
            .interface_refs
            .iter()
            .map(|r| {
                if self.table.add_refs(&r.ipid, r.public_refs, r.private_refs) {
                    hresult::S_OK as i32
                } else {
                    hresult::E_INVALIDARG as i32
                }
            })
            .collect();
        let return_value = if results.iter().all(|hr| *hr == 0) {
            hresult::S_OK
        } else {
            hresult::E_INVALIDARG
        };
        Ok(RemAddRefResponse {
            that: None,
            interface_refs_count: req.interface_refs.len() as u16,
            results,
            return_value: return_value as i32,
        })
    }

    async fn rem_release(&self, req: RemReleaseRequest) -> Result<RemReleaseResponse> {
        let mut return_value = hresult::S_OK;
        for r in &req.interface_refs {
            if !self.table.release_refs(&r.ipid, r.public_refs, r.private_refs) {
                return_value = hresult::E_INVALIDARG;
            }
        }
        Ok(RemReleaseResponse {
            that: None,
            return_value: return_value as i32,
        })
    }
}

#[async_trait]
impl RemUnknown2Server for ObjectExporter {
    async fn rem_query_interface2(
        &self,
        req: RemQueryInterface2Request,
    ) -> Result<RemQueryInterface2Response> {
        let iids_count = req.iids.len() as u16;
        let Some(object) = self.table.lookup(&req.ripid) else {
            return Ok(RemQueryInterface2Response {
                iids_count,
                return_value: hresult::E_INVALIDARG as i32,
                ..Default::default()
            });
        };

        let mut hrs = Vec::with_capacity(req.iids.len());
        let mut interface_pointers = Vec::with_capacity(req.iids.len());
        for iid in &req.iids {
            match self.query(object.oid, *iid, QI2_PUBLIC_REFS) {
                Some(found) => {
                    let objref = ObjRef::standard(
                        *iid,
                        StdObjRef::new(self.oxid, found.oid, found.ipid, QI2_PUBLIC_REFS),
                        self.bindings.clone(),
                    );
                    hrs.push(hresult::S_OK as i32);
                    interface_pointers.push(Some(MInterfacePointer::from_objref(&objref)));
                }
                None => {
                    hrs.push(hresult::E_NOINTERFACE as i32);
                    interface_pointers.push(None);
                }
            }
        }

        let return_value = if !hrs.is_empty() && hrs.iter().all(|hr| *hr != 0) {
            hresult::E_NOINTERFACE
        } else {
            hresult::S_OK
        };
        Ok(RemQueryInterface2Response {
            that: None,
            iids_count,
            hrs,
            interface_pointers,
            return_value: return_value as i32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remunknown::RemInterfaceRef;
    use crate::types::iid;
    use bytes::Bytes;

    fn stub(iid: Iid) -> InterfaceStub {
        InterfaceStub::new(iid, |_call, _stub| async { Ok(Bytes::new()) })
    }

    #[tokio::test]
    async fn test_query_interface_resolves_within_object() {
        let exporter = ObjectExporter::new(DualStringArray::default());
        let std = exporter.export(stub(iid::IDISPATCH)).unwrap();
        let other = Iid::generate();

        let resp = exporter
            .rem_query_interface(RemQueryInterfaceRequest {
                this: None,
                ripid: std.ipid,
                refs: 3,
                iids: vec![iid::IUNKNOWN, other],
            })
            .await
            .unwrap();
        assert_eq!(resp.return_value, 0);
        assert_eq!(resp.qi_results[0].hresult, 0);
        assert_eq!(resp.qi_results[0].std.ipid, std.ipid);
        assert_eq!(resp.qi_results[0].std.public_refs, 3);
        assert_eq!(resp.qi_results[1].hresult, hresult::E_NOINTERFACE as i32);
        assert_eq!(exporter.table().lookup(&std.ipid).unwrap().public_refs, 3);
    }

    #[tokio::test]
    async fn test_query_interface_with_no_match_fails() {
        let exporter = ObjectExporter::new(DualStringArray::default());
        let std = exporter.export(stub(iid::IDISPATCH)).unwrap();
        let resp = exporter
            .rem_query_interface(RemQueryInterfaceRequest {
                this: None,
                ripid: std.ipid,
                refs: 1,
                iids: vec![Iid::generate()],
            })
            .await
            .unwrap();
        assert_eq!(resp.return_value, hresult::E_NOINTERFACE as i32);
    }

    #[tokio::test]
    async fn test_add_ref_and_release() {
        let exporter = ObjectExporter::new(DualStringArray::default());
        let std = exporter.export(stub(iid::IDISPATCH)).unwrap();
        let unknown = Ipid::generate();

        let resp = exporter
            .rem_add_ref(RemAddRefRequest {
                this: None,
                interface_refs: vec![RemInterfaceRef::new(std.ipid, 4), RemInterfaceRef::new(unknown, 1)],
            })
            .await
            .unwrap();
        assert_eq!(resp.results, vec![0, hresult::E_INVALIDARG as i32]);
        assert_eq!(resp.return_value, hresult::E_INVALIDARG as i32);
        assert_eq!(exporter.table().lookup(&std.ipid).unwrap().public_refs, 4);

        let resp = exporter
            .rem_release(RemReleaseRequest {
                this: None,
                interface_refs: vec![RemInterfaceRef::new(std.ipid, 10)],
            })
            .await
            .unwrap();
        assert_eq!(resp.return_value, 0);
        let entry = exporter.table().lookup(&std.ipid).unwrap();
        assert_eq!(entry.public_refs, 0);
        assert_eq!(entry.private_refs, 1);
    }

    #[tokio::test]
    async fn test_query_interface2_returns_objrefs() {
        let exporter = ObjectExporter::new(DualStringArray::with_tcp_binding("127.0.0.1[4135]"));
        let std = exporter.export(stub(iid::IDISPATCH)).unwrap();
        let resp = exporter
            .rem_query_interface2(RemQueryInterface2Request {
                this: None,
                ripid: std.ipid,
                iids: vec![iid::IDISPATCH, Iid::generate()],
            })
            .await
            .unwrap();
        assert_eq!(resp.hrs[0], 0);
        let objref = resp.interface_pointers[0].as_ref().unwrap().objref().unwrap();
        assert_eq!(objref.iid, iid::IDISPATCH);
        assert_eq!(objref.std_obj_ref().unwrap().oxid, exporter.oxid());
        assert!(resp.interface_pointers[1].is_none());
    }

    #[test]
    fn test_unexport() {
        let exporter = ObjectExporter::new(DualStringArray::default());
        let std = exporter.export(stub(iid::IDISPATCH)).unwrap();
        let objref = exporter.objref(&std.ipid, 2).unwrap();
        assert_eq!(objref.std_obj_ref().unwrap().public_refs, 2);
        exporter.unexport(&std.ipid).unwrap();
        assert!(matches!(exporter.unexport(&std.ipid), Err(DcomError::UnknownIpid(_))));
        assert!(exporter.table().is_empty());
    }

    #[test]
    fn test_duplicate_ipid_is_rejected() {
        let exporter = ObjectExporter::new(DualStringArray::default());
        let std = exporter.export(stub(iid::IDISPATCH)).unwrap();
        let err = exporter
            .export_interface(std.oid, stub(Iid::generate()), Some(std.ipid))
            .unwrap_err();
        assert!(matches!(err, DcomError::DuplicateIpid(_)));
    }
}
