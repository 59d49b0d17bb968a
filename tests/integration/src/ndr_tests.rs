//! NDR Tests - marshaled operations over a live connection
//!
//! - Conformant arrays of structures with embedded unique pointers
//! - Unions with pointer arms
//! - Conformant varying arrays with explicit bounds
//! - Big-endian stub data
//! - Malformed stub data surfacing as faults

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::*;
use dcerpc::operation::{decode_request, encode_response};
use dcerpc::{
    fault, CallContext, DceRpcServer, InterfaceBuilder, Operation, RpcError, SyntaxId, Uuid,
};
use midl_ndr::{
    NdrContext, NdrDecode, NdrEncode, NdrError, NdrReader, NdrUnion, NdrWString, NdrWriter,
    UniquePtr,
};

const INVENTORY_UUID: Uuid = Uuid::from_u128(0xc3d4e5f6_a7b8_9012_cdef_234567890123);

fn inventory_syntax() -> SyntaxId {
    SyntaxId::new(INVENTORY_UUID, 1, 0)
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Item {
    id: u32,
    weight: f32,
    name: UniquePtr<NdrWString>,
}

impl Item {
    fn new(id: u32, weight: f32, name: Option<&str>) -> Self {
        Self {
            id,
            weight,
            name: name.map(NdrWString::new).into(),
        }
    }
}

impl NdrEncode for Item {
    fn ndr_encode(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.align(4);
        w.write_u32(self.id);
        w.write_f32(self.weight);
        self.name.ndr_encode(w)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        self.name.ndr_encode_deferred(w)
    }
}

impl NdrDecode for Item {
    fn ndr_decode(r: &mut NdrReader) -> midl_ndr::Result<Self> {
        r.align(4)?;
        Ok(Self {
            id: r.read_u32()?,
            weight: r.read_f32()?,
            name: UniquePtr::ndr_decode(r)?,
        })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.name.ndr_decode_deferred(r)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Lookup {
    ById(u32),
    ByName(UniquePtr<NdrWString>),
}

impl Default for Lookup {
    fn default() -> Self {
        Lookup::ById(0)
    }
}

impl NdrUnion for Lookup {
    fn switch_value(&self) -> u32 {
        match self {
            Lookup::ById(_) => 1,
            Lookup::ByName(_) => 2,
        }
    }

    fn encode_arm(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        match self {
            Lookup::ById(id) => w.write_u32(*id),
            Lookup::ByName(name) => name.ndr_encode(w)?,
        }
        Ok(())
    }

    fn encode_arm_deferred(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        match self {
            Lookup::ByName(name) => w.write_deferred(name),
            _ => Ok(()),
        }
    }

    fn decode_arm(switch: u32, r: &mut NdrReader) -> midl_ndr::Result<Self> {
        match switch {
            1 => Ok(Lookup::ById(r.read_u32()?)),
            2 => Ok(Lookup::ByName(UniquePtr::ndr_decode(r)?)),
            other => Err(NdrError::InvalidDiscriminant(other)),
        }
    }

    fn decode_arm_deferred(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        match self {
            Lookup::ByName(name) => r.read_deferred(name),
            _ => Ok(()),
        }
    }
}

/// opnum 0: store items, return the total weight and the named count
#[derive(Debug, Default)]
struct StoreItems {
    items: Vec<Item>,
    total_weight: f32,
    named: u32,
}

impl Operation for StoreItems {
    const OPNUM: u16 = 0;
    const NAME: &'static str = "/inventory/v1/StoreItems";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_u32(self.items.len() as u32);
        w.write_array(&self.items, self.items.len())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        let count = r.read_u32()? as usize;
        self.items = r.read_array("items")?;
        if self.items.len() != count {
            return Err(NdrError::ConformanceMismatch {
                max_count: self.items.len() as u32,
                offset: 0,
                actual_count: count as u32,
            });
        }
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_f32(self.total_weight);
        w.write_u32(self.named);
        Ok(())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.total_weight = r.read_f32()?;
        self.named = r.read_u32()?;
        Ok(())
    }
}

/// opnum 1: find an item by id or name
#[derive(Debug, Default)]
struct FindItem {
    lookup: Lookup,
    found: Option<Item>,
}

impl Operation for FindItem {
    const OPNUM: u16 = 1;
    const NAME: &'static str = "/inventory/v1/FindItem";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_union(&self.lookup)?;
        w.write_union_deferred(&self.lookup)
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.lookup = r.read_union()?;
        r.read_union_deferred(&mut self.lookup)
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_unique(self.found.as_ref())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.found = r.read_unique()?;
        Ok(())
    }
}

/// opnum 2: bounded sample window, `[size_is(max), length_is(len)]`
#[derive(Debug, Default)]
struct Window {
    max: u32,
    samples: Vec<u16>,
    reversed: Vec<u16>,
}

impl Operation for Window {
    const OPNUM: u16 = 2;
    const NAME: &'static str = "/inventory/v1/Window";

    fn marshal_request(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_u32(self.max);
        w.write_conformant_varying(&self.samples, self.max as usize, self.samples.len())
    }

    fn unmarshal_request(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.max = r.read_u32()?;
        let (samples, max) = r.read_conformant_varying("samples")?;
        if max != self.max as usize {
            return Err(NdrError::ConformanceMismatch {
                max_count: max as u32,
                offset: 0,
                actual_count: self.max,
            });
        }
        self.samples = samples;
        Ok(())
    }

    fn marshal_response(&self, w: &mut NdrWriter) -> midl_ndr::Result<()> {
        w.write_conformant_varying(&self.reversed, self.max as usize, self.reversed.len())
    }

    fn unmarshal_response(&mut self, r: &mut NdrReader) -> midl_ndr::Result<()> {
        self.reversed = r.read_conformant_varying("reversed")?.0;
        Ok(())
    }
}

struct Inventory {
    items: parking_lot::Mutex<Vec<Item>>,
}

async fn inventory_dispatch(
    inventory: Arc<Inventory>,
    call: CallContext,
    stub: Bytes,
) -> dcerpc::Result<Bytes> {
    match call.opnum {
        StoreItems::OPNUM => {
            let mut op: StoreItems = decode_request(stub, call.ndr)?;
            op.total_weight = op.items.iter().map(|i| i.weight).sum();
            op.named = op.items.iter().filter(|i| !i.name.is_null()).count() as u32;
            inventory.items.lock().extend(op.items.drain(..));
            encode_response(&op, NdrContext::new())
        }
        FindItem::OPNUM => {
            let mut op: FindItem = decode_request(stub, call.ndr)?;
            let items = inventory.items.lock();
            op.found = items
                .iter()
                .find(|item| match &op.lookup {
                    Lookup::ById(id) => item.id == *id,
                    Lookup::ByName(name) => {
                        item.name.as_ref().map(NdrWString::as_str)
                            == name.as_ref().map(NdrWString::as_str)
                    }
                })
                .cloned();
            encode_response(&op, NdrContext::new())
        }
        Window::OPNUM => {
            let mut op: Window = decode_request(stub, call.ndr)?;
            op.reversed = op.samples.iter().rev().copied().collect();
            encode_response(&op, NdrContext::new())
        }
        other => Err(RpcError::OperationUnavailable(other)),
    }
}

async fn start_inventory() -> (std::net::SocketAddr, tokio::task::JoinHandle<dcerpc::Result<()>>) {
    let inventory = Arc::new(Inventory {
        items: parking_lot::Mutex::new(Vec::new()),
    });
    let interface = InterfaceBuilder::from_syntax(inventory_syntax())
        .dispatch(move |call, stub| inventory_dispatch(Arc::clone(&inventory), call, stub))
        .build();
    let server = Arc::new(DceRpcServer::new());
    server.register_interface(interface).await;
    spawn_server(server).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_struct_array_with_embedded_pointers() {
    init_logging();
    let (addr, server) = start_inventory().await;
    let client = connect(addr, inventory_syntax()).await;

    let mut op = StoreItems {
        items: vec![
            Item::new(1, 1.5, Some("bolt")),
            Item::new(2, 2.25, None),
            Item::new(3, 0.25, Some("washer")),
        ],
        ..Default::default()
    };
    client.invoke(0, None, &mut op).await.unwrap();
    assert_eq!(op.total_weight, 4.0);
    assert_eq!(op.named, 2);

    let mut find = FindItem {
        lookup: Lookup::ByName(UniquePtr::new(NdrWString::new("washer"))),
        ..Default::default()
    };
    client.invoke(0, None, &mut find).await.unwrap();
    assert_eq!(find.found, Some(Item::new(3, 0.25, Some("washer"))));

    let mut find = FindItem {
        lookup: Lookup::ById(2),
        ..Default::default()
    };
    client.invoke(0, None, &mut find).await.unwrap();
    let found = find.found.unwrap();
    assert!(found.name.is_null());

    let mut find = FindItem {
        lookup: Lookup::ById(99),
        ..Default::default()
    };
    client.invoke(0, None, &mut find).await.unwrap();
    assert!(find.found.is_none());

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conformant_varying_bounds() {
    init_logging();
    let (addr, server) = start_inventory().await;
    let client = connect(addr, inventory_syntax()).await;

    let mut op = Window {
        max: 8,
        samples: vec![1, 2, 3],
        ..Default::default()
    };
    client.invoke(0, None, &mut op).await.unwrap();
    assert_eq!(op.reversed, vec![3, 2, 1]);

    // more samples than the declared bound never leaves the client
    let mut op = Window {
        max: 2,
        samples: vec![1, 2, 3],
        ..Default::default()
    };
    assert!(client.invoke(0, None, &mut op).await.is_err());

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_stub_is_a_fault() {
    init_logging();
    let (addr, server) = start_inventory().await;
    let client = connect(addr, inventory_syntax()).await;

    // union switch 7 has no arm
    let err = client
        .call(FindItem::OPNUM, Bytes::from_static(&[7, 0, 0, 0, 0, 0, 0, 0]))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Fault(_)), "{:?}", err);

    // a conformance larger than the stub itself
    let mut w = NdrWriter::new();
    w.write_u32(1);
    w.write_u32(0x00ff_ffff);
    let err = client.call(StoreItems::OPNUM, w.finish()).await.unwrap_err();
    assert!(matches!(err, RpcError::Fault(_)), "{:?}", err);

    let err = client.call(42, Bytes::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::Fault(fault::NCA_OP_RNG_ERROR)), "{:?}", err);

    // the connection survives faults
    let mut op = Window {
        max: 1,
        samples: vec![9],
        ..Default::default()
    };
    client.invoke(0, None, &mut op).await.unwrap();
    assert_eq!(op.reversed, vec![9]);

    server.abort();
}

#[test]
fn test_big_endian_items_decode() {
    let items = vec![Item::new(0x0102_0304, 3.5, Some("nut")), Item::default()];
    let ctx = NdrContext::big_endian();
    let mut w = NdrWriter::with_context(ctx);
    w.write_array(&items, items.len()).unwrap();
    let raw = w.finish();
    assert_eq!(&raw[0..4], &[0, 0, 0, 2]);
    assert_eq!(&raw[4..8], &[1, 2, 3, 4]);

    let mut r = NdrReader::with_context(raw, ctx);
    let back: Vec<Item> = r.read_array("items").unwrap();
    assert_eq!(back, items);
    assert_eq!(r.remaining(), 0);
}

#[test]
fn test_big_endian_request_through_operation_codec() {
    let ctx = NdrContext::big_endian();
    let op = Window {
        max: 4,
        samples: vec![0x0102, 0x0304],
        ..Default::default()
    };
    let stub = dcerpc::operation::encode_request(&op, ctx).unwrap();
    assert_eq!(&stub[0..4], &[0, 0, 0, 4]);
    let back: Window = decode_request(stub, ctx).unwrap();
    assert_eq!(back.max, 4);
    assert_eq!(back.samples, vec![0x0102, 0x0304]);
}
