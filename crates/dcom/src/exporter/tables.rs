//! IPID table
//!
//! Every exported interface pointer has one entry: the object it belongs
//! to, the interface it serves, its reference counts and the stub that
//! dispatches its calls.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::server::InterfaceStub;
use crate::types::{Iid, Ipid, Oid};

/// Entry in the IPID table
#[derive(Clone)]
pub struct IpidEntry {
    pub ipid: Ipid,
    pub oid: Oid,
    pub stub: Arc<InterfaceStub>,
    /// References held by remote clients
    pub public_refs: u32,
    /// Local reference held by the exporter until unexport
    pub private_refs: u32,
}

impl IpidEntry {
    pub fn new(ipid: Ipid, oid: Oid, stub: Arc<InterfaceStub>) -> Self {
        Self {
            ipid,
            oid,
            stub,
            public_refs: 0,
            private_refs: 1,
        }
    }

    pub fn iid(&self) -> Iid {
        self.stub.iid
    }

    pub fn total_refs(&self) -> u32 {
        self.public_refs.saturating_add(self.private_refs)
    }
}

impl std::fmt::Debug for IpidEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpidEntry")
            .field("ipid", &self.ipid)
            .field("oid", &self.oid)
            .field("iid", &self.stub.iid)
            .field("public_refs", &self.public_refs)
            .field("private_refs", &self.private_refs)
            .finish()
    }
}

/// Thread-safe table of exported interface pointers
#[derive(Debug, Default)]
pub struct IpidTable {
    entries: RwLock<HashMap<Ipid, IpidEntry>>,
}

impl IpidTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; false if the IPID is already taken
    pub fn insert(&self, entry: IpidEntry) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&entry.ipid) {
            return false;
        }
        entries.insert(entry.ipid, entry);
        true
    }

    pub fn lookup(&self, ipid: &Ipid) -> Option<IpidEntry> {
        self.entries.read().get(ipid).cloned()
    }

    /// Stub serving `ipid`
    pub fn stub(&self, ipid: &Ipid) -> Option<Arc<InterfaceStub>> {
        self.entries.read().get(ipid).map(|e| Arc::clone(&e.stub))
    }

    pub fn remove(&self, ipid: &Ipid) -> Option<IpidEntry> {
        self.entries.write().remove(ipid)
    }

    /// Entries of one object
    pub fn object_entries(&self, oid: Oid) -> Vec<IpidEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| e.oid == oid)
            .cloned()
            .collect()
    }

    /// Interface pointer on `oid` able to serve `iid`: an exact match first,
    /// then one whose stub extends `iid`
    pub fn find_interface(&self, oid: Oid, iid: Iid) -> Option<IpidEntry> {
        let entries = self.entries.read();
        let mut candidates = entries.values().filter(|e| e.oid == oid);
        let exact = candidates.clone().find(|e| e.stub.iid == iid);
        exact
            .or_else(|| candidates.find(|e| e.stub.implements(iid)))
            .cloned()
    }

    /// Add references; false for an unknown IPID
    pub fn add_refs(&self, ipid: &Ipid, public_refs: u32, private_refs: u32) -> bool {
        match self.entries.write().get_mut(ipid) {
            Some(entry) => {
                entry.public_refs = entry.public_refs.saturating_add(public_refs);
                entry.private_refs = entry.private_refs.saturating_add(private_refs);
                true
            }
            None => false,
        }
    }

    /// Drop references, never below zero; false for an unknown IPID
    pub fn release_refs(&self, ipid: &Ipid, public_refs: u32, private_refs: u32) -> bool {
        match self.entries.write().get_mut(ipid) {
            Some(entry) => {
                entry.public_refs = entry.public_refs.saturating_sub(public_refs);
                entry.private_refs = entry.private_refs.saturating_sub(private_refs);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
