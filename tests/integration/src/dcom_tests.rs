//! DCOM Tests - object routing over loopback TCP
//!
//! - IRemUnknown / IRemUnknown2 against the exporter's IPID table
//! - Calls addressed by IPID reaching the exported object
//! - Faults for missing, unknown and mismatched IPIDs
//! - Many clients sharing one exporter

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use common::*;
use dcerpc::fault;
use dcom::idispatch::{
    self, new_dispatch_stub, DefaultDispatchClient, DispatchClient, DispatchServer,
    GetIdsOfNamesRequest, GetIdsOfNamesResponse, GetTypeInfoCountRequest,
    GetTypeInfoCountResponse, GetTypeInfoRequest, GetTypeInfoResponse,
};
use dcom::remunknown::{
    self, DefaultRemUnknown2Client, DefaultRemUnknownClient, RemInterfaceRef,
    RemQueryInterface2Request, RemQueryInterfaceRequest, RemReleaseRequest, RemUnknown2Client,
    RemUnknownClient,
};
use dcom::{hresult, iid, DcomError, Iid, Ipid, ObjectClient, Result, StringBinding};

const IID_UNSUPPORTED: Iid = Iid::from_u128(0x11111111_2222_3333_4444_555555555555);

/// Maps member names to their position in a fixed table
struct Members {
    calls: AtomicU32,
}

const MEMBERS: &[&str] = &["Stop", "Start", "Status"];

#[async_trait]
impl DispatchServer for Members {
    async fn get_type_info_count(
        &self,
        _req: GetTypeInfoCountRequest,
    ) -> Result<GetTypeInfoCountResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(GetTypeInfoCountResponse {
            count: 1,
            ..Default::default()
        })
    }

    async fn get_type_info(&self, _req: GetTypeInfoRequest) -> Result<GetTypeInfoResponse> {
        Err(DcomError::Hresult {
            operation: "GetTypeInfo",
            code: hresult::E_NOTIMPL,
        })
    }

    async fn get_ids_of_names(&self, req: GetIdsOfNamesRequest) -> Result<GetIdsOfNamesResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let ids: Vec<i32> = req
            .names
            .iter()
            .map(|name| {
                MEMBERS
                    .iter()
                    .position(|m| m.eq_ignore_ascii_case(name))
                    .map_or(-1, |i| i as i32 + 1)
            })
            .collect();
        let return_value = if ids.contains(&-1) {
            0x8002_0006u32 as i32 // DISP_E_UNKNOWNNAME
        } else {
            0
        };
        Ok(GetIdsOfNamesResponse {
            dispatch_ids: ids,
            return_value,
            ..Default::default()
        })
    }
}

struct Fixture {
    harness: DcomHarness,
    server: tokio::task::JoinHandle<dcerpc::Result<()>>,
    members: Arc<Members>,
    ipid: Ipid,
}

async fn fixture() -> Fixture {
    init_logging();
    let mut harness = DcomHarness::new().await;
    let members = Arc::new(Members {
        calls: AtomicU32::new(0),
    });
    let std = harness
        .dcom
        .export(new_dispatch_stub(Arc::clone(&members)))
        .unwrap();
    let server = harness.start(&[idispatch::syntax()]).await;
    Fixture {
        harness,
        server,
        members,
        ipid: std.ipid,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_query_interface2_then_call() {
    let f = fixture().await;
    let conn = Arc::new(connect(f.harness.addr, remunknown::v2::syntax()).await);

    let remunk = DefaultRemUnknown2Client::new(Arc::clone(&conn))
        .await
        .unwrap()
        .ipid(f.harness.dcom.rem_unknown_ipid());
    let resp = remunk
        .rem_query_interface2(RemQueryInterface2Request {
            ripid: f.ipid,
            iids: vec![iid::IDISPATCH, IID_UNSUPPORTED],
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(resp.hrs, vec![0, hresult::E_NOINTERFACE as i32]);
    assert!(resp.interface_pointers[1].is_none());
    let objref = resp.interface_pointers[0].as_ref().unwrap().objref().unwrap();
    assert_eq!(objref.iid, iid::IDISPATCH);
    let std = *objref.std_obj_ref().unwrap();
    assert_eq!(std.ipid, f.ipid);
    assert_eq!(std.oxid, f.harness.dcom.oxid());
    assert_eq!(std.public_refs, 1);
    let dcom::types::ObjRefKind::Standard(standard) = &objref.kind else {
        panic!("expected a standard OBJREF");
    };
    assert_eq!(
        standard.resolver_addr.string_bindings().unwrap(),
        vec![StringBinding::tcp(&format!("127.0.0.1[{}]", f.harness.addr.port()))]
    );

    let dispatch = DefaultDispatchClient::new(conn).await.unwrap().ipid(std.ipid);
    let ids = dispatch
        .get_ids_of_names(GetIdsOfNamesRequest {
            names: vec!["status".into(), "Stop".into()],
            lcid: 0x409,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ids.dispatch_ids, vec![3, 1]);

    let err = dispatch
        .get_ids_of_names(GetIdsOfNamesRequest {
            names: vec!["Reboot".into()],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(0x8002_0006));

    f.server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rem_query_interface_and_reference_counts() {
    let f = fixture().await;
    let conn = Arc::new(connect(f.harness.addr, remunknown::syntax()).await);
    let remunk = DefaultRemUnknownClient::new(Arc::clone(&conn))
        .await
        .unwrap()
        .ipid(f.harness.dcom.rem_unknown_ipid());

    let resp = remunk
        .rem_query_interface(RemQueryInterfaceRequest {
            ripid: f.ipid,
            refs: 5,
            iids: vec![iid::IUNKNOWN, iid::IDISPATCH],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(resp.qi_results.len(), 2);
    for result in &resp.qi_results {
        assert_eq!(result.hresult, 0);
        assert_eq!(result.std.ipid, f.ipid);
        assert_eq!(result.std.public_refs, 5);
    }
    let entry = f.harness.dcom.exporter().table().lookup(&f.ipid).unwrap();
    assert_eq!(entry.public_refs, 10);

    remunk
        .rem_release(RemReleaseRequest {
            interface_refs: vec![RemInterfaceRef::new(f.ipid, 7)],
            ..Default::default()
        })
        .await
        .unwrap();
    let entry = f.harness.dcom.exporter().table().lookup(&f.ipid).unwrap();
    assert_eq!(entry.public_refs, 3);

    let err = remunk
        .rem_query_interface(RemQueryInterfaceRequest {
            ripid: Ipid::generate(),
            refs: 1,
            iids: vec![iid::IDISPATCH],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::E_INVALIDARG));

    f.server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ipid_faults() {
    let f = fixture().await;
    let conn = Arc::new(connect(f.harness.addr, idispatch::syntax()).await);
    let dispatch = DefaultDispatchClient::new(Arc::clone(&conn)).await.unwrap();

    // no IPID: refused before anything is sent
    let err = dispatch
        .get_type_info_count(GetTypeInfoCountRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DcomError::MissingIpid(_)), "{:?}", err);

    // an IPID the exporter never handed out
    let err = dispatch
        .ipid(Ipid::generate())
        .get_type_info_count(GetTypeInfoCountRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::RPC_E_INVALID_IPID));

    // IDispatch against the IRemUnknown2 object
    let err = dispatch
        .ipid(f.harness.dcom.rem_unknown_ipid())
        .get_type_info_count(GetTypeInfoCountRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(fault::NCA_UNK_IF));

    // a server-side DcomError travels back as its HRESULT
    let err = dispatch
        .ipid(f.ipid)
        .get_type_info(GetTypeInfoRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::E_NOTIMPL));

    // IDispatch::Invoke is not implemented by the stub
    let raw = ObjectClient::bind(Arc::clone(&conn), idispatch::syntax())
        .await
        .unwrap()
        .with_ipid(f.ipid);
    let err = raw
        .connection()
        .call_context(
            raw.context_id(),
            idispatch::opnum::INVOKE,
            Some(f.ipid.guid()),
            bytes::Bytes::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.fault_status(), Some(fault::NCA_OP_RNG_ERROR));

    // the connection is still usable
    let count = dispatch
        .ipid(f.ipid)
        .get_type_info_count(GetTypeInfoCountRequest::default())
        .await
        .unwrap();
    assert_eq!(count.count, 1);

    f.server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unexported_ipid_is_rejected() {
    let f = fixture().await;
    let conn = Arc::new(connect(f.harness.addr, idispatch::syntax()).await);
    let dispatch = DefaultDispatchClient::new(conn).await.unwrap().ipid(f.ipid);

    dispatch
        .get_type_info_count(GetTypeInfoCountRequest::default())
        .await
        .unwrap();

    f.harness.dcom.unexport(&f.ipid).unwrap();
    let err = dispatch
        .get_type_info_count(GetTypeInfoCountRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::RPC_E_INVALID_IPID));
    assert!(f.harness.dcom.unexport(&f.ipid).is_err());

    f.server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_clients_share_exporter() {
    const CLIENTS: usize = 8;
    const CALLS: usize = 20;

    let f = fixture().await;
    let stats = Arc::new(ConcurrentStats::new());

    let handles: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let addr = f.harness.addr;
            let ipid = f.ipid;
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                let conn = Arc::new(connect(addr, idispatch::syntax()).await);
                let dispatch = DefaultDispatchClient::new(conn).await.unwrap().ipid(ipid);
                for _ in 0..CALLS {
                    let start = std::time::Instant::now();
                    match dispatch
                        .get_ids_of_names(GetIdsOfNamesRequest {
                            names: vec!["Start".into()],
                            ..Default::default()
                        })
                        .await
                    {
                        Ok(resp) if resp.dispatch_ids == vec![2] => {
                            stats.record_success(start.elapsed())
                        }
                        _ => stats.record_failure(),
                    }
                }
            })
        })
        .collect();
    join_all(handles).await;

    assert_eq!(stats.success_count(), (CLIENTS * CALLS) as u64);
    assert_eq!(stats.failure_count(), 0);
    assert_eq!(
        f.members.calls.load(Ordering::Relaxed),
        (CLIENTS * CALLS) as u32
    );

    f.server.abort();
}
