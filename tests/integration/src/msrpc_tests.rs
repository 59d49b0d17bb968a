//! MSRPC Tests - interface bindings end to end over loopback TCP
//!
//! - IIisServiceControl and IWbemLevel1Login exported through DcomServer
//! - InitShutdown and msgsvc registered as plain RPC interfaces
//! - Several interfaces sharing one connection

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use common::*;
use dcerpc::{fault, DceRpcServer, RpcError};
use dcom::idispatch::{
    DispatchServer, GetIdsOfNamesRequest, GetIdsOfNamesResponse, GetTypeInfoCountRequest,
    GetTypeInfoCountResponse, GetTypeInfoRequest, GetTypeInfoResponse,
};
use dcom::remunknown::{DefaultRemUnknown2Client, RemQueryInterface2Request, RemUnknown2Client};
use dcom::{hresult, iid, DcomError, InterfaceStub, MInterfacePointer, Result};
use msrpc::iiss::{
    self, new_iis_service_control_stub, DefaultIisServiceControlClient, IisServiceControlClient,
    IisServiceControlServer, KillRequest, KillResponse, RebootRequest, RebootResponse,
    StartRequest, StartResponse, StatusRequest, StatusResponse, StopRequest, StopResponse,
};
use msrpc::initshutdown::{
    self, new_init_shutdown_interface, win32, BaseAbortShutdownRequest,
    BaseAbortShutdownResponse, BaseInitiateShutdownExRequest, BaseInitiateShutdownExResponse,
    BaseInitiateShutdownRequest, BaseInitiateShutdownResponse, DefaultInitShutdownClient,
    InitShutdownClient, InitShutdownServer, RegUnicodeString, ShutdownResponse,
};
use msrpc::msgsvc::{
    self, new_msgsvc_interface, status, DefaultMsgsvcClient, MsgEnumInfo, MsgEnumStruct, MsgInfo,
    MsgInfo0, MsgInfoContainer, MsgsvcClient, MsgsvcServer, NetrMessageNameAddRequest,
    NetrMessageNameAddResponse, NetrMessageNameDelRequest, NetrMessageNameDelResponse,
    NetrMessageNameEnumRequest, NetrMessageNameEnumResponse, NetrMessageNameGetInfoRequest,
    NetrMessageNameGetInfoResponse, StatusResponse as NetStatus,
};
use msrpc::wmi::{
    self, new_level1_login_stub, DefaultLevel1LoginClient, EstablishPositionRequest,
    EstablishPositionResponse, Level1LoginClient, Level1LoginServer, NtlmLoginRequest,
    NtlmLoginResponse, RequestChallengeRequest, RequestChallengeResponse, WbemLoginRequest,
    WbemLoginResponse, CHALLENGE_SIZE,
};

// IIisServiceControl

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Running,
    Stopped,
}

struct Services {
    services: Mutex<Vec<(&'static str, State)>>,
}

impl Services {
    fn new() -> Self {
        Self {
            services: Mutex::new(vec![
                ("W3SVC", State::Running),
                ("FTPSVC", State::Running),
                ("SMTPSVC", State::Stopped),
            ]),
        }
    }

    fn set_all(&self, state: State) {
        for entry in self.services.lock().iter_mut() {
            entry.1 = state;
        }
    }
}

#[async_trait]
impl DispatchServer for Services {
    async fn get_type_info_count(
        &self,
        _req: GetTypeInfoCountRequest,
    ) -> Result<GetTypeInfoCountResponse> {
        Ok(GetTypeInfoCountResponse::default())
    }

    async fn get_type_info(&self, _req: GetTypeInfoRequest) -> Result<GetTypeInfoResponse> {
        Err(DcomError::Hresult {
            operation: "GetTypeInfo",
            code: hresult::E_NOTIMPL,
        })
    }

    async fn get_ids_of_names(
        &self,
        _req: GetIdsOfNamesRequest,
    ) -> Result<GetIdsOfNamesResponse> {
        Err(DcomError::Hresult {
            operation: "GetIDsOfNames",
            code: hresult::E_NOTIMPL,
        })
    }
}

#[async_trait]
impl IisServiceControlServer for Services {
    async fn stop(&self, _req: StopRequest) -> Result<StopResponse> {
        self.set_all(State::Stopped);
        Ok(StopResponse::default())
    }

    async fn start(&self, _req: StartRequest) -> Result<StartResponse> {
        self.set_all(State::Running);
        Ok(StartResponse::default())
    }

    async fn reboot(&self, _req: RebootRequest) -> Result<RebootResponse> {
        Ok(RebootResponse {
            return_value: hresult::E_ACCESSDENIED as i32,
            ..Default::default()
        })
    }

    async fn status(&self, req: StatusRequest) -> Result<StatusResponse> {
        let services = self.services.lock();
        let mut records = Vec::new();
        for (name, state) in services.iter() {
            let state = match state {
                State::Running => "running",
                State::Stopped => "stopped",
            };
            records.extend_from_slice(name.as_bytes());
            records.push(0);
            records.extend_from_slice(state.as_bytes());
            records.push(0);
        }
        if records.len() > req.buffer_size as usize {
            return Ok(StatusResponse {
                required_buffer_size: records.len() as u32,
                return_value: hresult::E_INSUFFICIENT_BUFFER as i32,
                ..Default::default()
            });
        }
        Ok(StatusResponse {
            buffer: records,
            service_count: services.len() as u32,
            ..Default::default()
        })
    }

    async fn kill(&self, _req: KillRequest) -> Result<KillResponse> {
        self.set_all(State::Stopped);
        Ok(KillResponse::default())
    }
}

fn parse_records(buffer: &[u8], count: u32) -> Vec<(String, String)> {
    let fields: Vec<String> = buffer
        .split(|b| *b == 0)
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect();
    fields
        .chunks(2)
        .take(count as usize)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_iis_service_control_over_dcom() {
    init_logging();
    let mut harness = DcomHarness::new().await;
    let std = harness
        .dcom
        .export(new_iis_service_control_stub(Arc::new(Services::new())))
        .unwrap();
    let server = harness.start(&[iiss::syntax()]).await;

    let conn = Arc::new(connect(harness.addr, iiss::syntax()).await);
    let client = DefaultIisServiceControlClient::new(Arc::clone(&conn))
        .await
        .unwrap()
        .ipid(std.ipid);

    // too small: the HRESULT comes back, not a fault
    let err = client
        .status(StatusRequest {
            buffer_size: 8,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::E_INSUFFICIENT_BUFFER));

    let resp = client
        .status(StatusRequest {
            buffer_size: 256,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(resp.service_count, 3);
    assert_eq!(resp.buffer.len(), 256);
    let records = parse_records(&resp.buffer, resp.service_count);
    assert_eq!(records[0], ("W3SVC".to_string(), "running".to_string()));
    assert_eq!(records[2], ("SMTPSVC".to_string(), "stopped".to_string()));

    client
        .stop(StopRequest {
            timeout_msecs: 1000,
            force: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    let resp = client
        .status(StatusRequest {
            buffer_size: 256,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(parse_records(&resp.buffer, resp.service_count)
        .iter()
        .all(|(_, state)| state == "stopped"));

    // a reply buffer larger than any client would accept is refused up front
    let err = client
        .status(StatusRequest {
            buffer_size: u32::MAX,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(fault::NCA_REMOTE_NO_MEMORY));

    client.start(StartRequest::default()).await.unwrap();
    client.kill(KillRequest::default()).await.unwrap();

    let err = client.reboot(RebootRequest::default()).await.unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::E_ACCESSDENIED));

    // the IDispatch methods share the IIisServiceControl context
    let err = client
        .dispatch()
        .get_ids_of_names(GetIdsOfNamesRequest {
            names: vec!["Stop".into()],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::E_NOTIMPL));

    // QueryInterface sees both the interface and its IDispatch base
    let remunk = DefaultRemUnknown2Client::new(conn)
        .await
        .unwrap()
        .ipid(harness.dcom.rem_unknown_ipid());
    let resp = remunk
        .rem_query_interface2(RemQueryInterface2Request {
            ripid: std.ipid,
            iids: vec![iiss::IID, iid::IDISPATCH, wmi::IID],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(resp.hrs, vec![0, 0, hresult::E_NOINTERFACE as i32]);

    server.abort();
}

// IWbemLevel1Login

struct Login {
    namespace: MInterfacePointer,
}

#[async_trait]
impl Level1LoginServer for Login {
    async fn establish_position(
        &self,
        _req: EstablishPositionRequest,
    ) -> Result<EstablishPositionResponse> {
        Ok(EstablishPositionResponse {
            locale_version: 1,
            ..Default::default()
        })
    }

    async fn request_challenge(
        &self,
        _req: RequestChallengeRequest,
    ) -> Result<RequestChallengeResponse> {
        Ok(RequestChallengeResponse {
            reserved3: [0xa5; CHALLENGE_SIZE],
            ..Default::default()
        })
    }

    async fn wbem_login(&self, _req: WbemLoginRequest) -> Result<WbemLoginResponse> {
        Err(DcomError::Hresult {
            operation: "WBEMLogin",
            code: hresult::E_NOTIMPL,
        })
    }

    async fn ntlm_login(&self, req: NtlmLoginRequest) -> Result<NtlmLoginResponse> {
        if req.network_resource.as_deref() != Some("root\\cimv2") {
            return Ok(NtlmLoginResponse {
                return_value: 0x8004_100Eu32 as i32, // WBEM_E_INVALID_NAMESPACE
                ..Default::default()
            });
        }
        Ok(NtlmLoginResponse {
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wmi_login_hands_out_namespace_objref() {
    init_logging();
    let mut harness = DcomHarness::new().await;

    // IWbemServices is only handed out, never called here
    let services = harness
        .dcom
        .export(InterfaceStub::new(wmi::IID_IWBEM_SERVICES, |call, _stub| async move {
            Err(RpcError::OperationUnavailable(call.opnum))
        }))
        .unwrap();
    let namespace = harness.dcom.objref(&services.ipid, 1).unwrap();
    let login = harness
        .dcom
        .export(new_level1_login_stub(Arc::new(Login {
            namespace: MInterfacePointer::from_objref(&namespace),
        })))
        .unwrap();
    let server = harness.start(&[wmi::syntax()]).await;

    let conn = Arc::new(connect(harness.addr, wmi::syntax()).await);
    let client = DefaultLevel1LoginClient::new(conn)
        .await
        .unwrap()
        .ipid(login.ipid);

    let position = client
        .establish_position(EstablishPositionRequest::default())
        .await
        .unwrap();
    assert_eq!(position.locale_version, 1);

    let challenge = client
        .request_challenge(RequestChallengeRequest::default())
        .await
        .unwrap();
    assert_eq!(challenge.reserved3, [0xa5; CHALLENGE_SIZE]);

    let err = client
        .wbem_login(WbemLoginRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(hresult::E_NOTIMPL));

    let resp = client
        .ntlm_login(NtlmLoginRequest {
            network_resource: Some("root\\cimv2".into()),
            preferred_locale: Some("en-US".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    let objref = resp.namespace.unwrap().objref().unwrap();
    assert_eq!(objref.iid, wmi::IID_IWBEM_SERVICES);
    let std = objref.std_obj_ref().unwrap();
    assert_eq!(std.ipid, services.ipid);
    assert_eq!(std.oxid, harness.dcom.oxid());

    let err = client
        .ntlm_login(NtlmLoginRequest {
            network_resource: Some("root\\missing".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.hresult(), Some(0x8004_100E));

    server.abort();
}

// InitShutdown and msgsvc

#[derive(Default)]
struct Host {
    shutdown: Mutex<Option<(String, u32, u32)>>,
    names: Mutex<Vec<String>>,
}

impl Host {
    fn begin(&self, message: Option<RegUnicodeString>, timeout: u32, reason: u32) -> u32 {
        let mut shutdown = self.shutdown.lock();
        if shutdown.is_some() {
            return win32::ERROR_SHUTDOWN_IN_PROGRESS;
        }
        let message = message.map(|m| m.value()).unwrap_or_default();
        *shutdown = Some((message, timeout, reason));
        win32::ERROR_SUCCESS
    }
}

#[async_trait]
impl InitShutdownServer for Host {
    async fn base_initiate_shutdown(
        &self,
        req: BaseInitiateShutdownRequest,
    ) -> Result<BaseInitiateShutdownResponse> {
        Ok(ShutdownResponse {
            return_value: self.begin(req.message, req.timeout, 0),
        })
    }

    async fn base_abort_shutdown(
        &self,
        _req: BaseAbortShutdownRequest,
    ) -> Result<BaseAbortShutdownResponse> {
        let return_value = match self.shutdown.lock().take() {
            Some(_) => win32::ERROR_SUCCESS,
            None => win32::ERROR_NO_SHUTDOWN_IN_PROGRESS,
        };
        Ok(ShutdownResponse { return_value })
    }

    async fn base_initiate_shutdown_ex(
        &self,
        req: BaseInitiateShutdownExRequest,
    ) -> Result<BaseInitiateShutdownExResponse> {
        Ok(ShutdownResponse {
            return_value: self.begin(req.message, req.timeout, req.reason),
        })
    }
}

#[async_trait]
impl MsgsvcServer for Host {
    async fn netr_message_name_add(
        &self,
        req: NetrMessageNameAddRequest,
    ) -> Result<NetrMessageNameAddResponse> {
        let mut names = self.names.lock();
        if names.iter().any(|n| n.eq_ignore_ascii_case(&req.msg_name)) {
            return Ok(NetStatus {
                return_value: status::NERR_DUPLICATE_NAME,
            });
        }
        names.push(req.msg_name.to_uppercase());
        Ok(NetStatus::default())
    }

    async fn netr_message_name_enum(
        &self,
        req: NetrMessageNameEnumRequest,
    ) -> Result<NetrMessageNameEnumResponse> {
        if req.info.level != 0 {
            return Ok(NetrMessageNameEnumResponse {
                return_value: status::ERROR_INVALID_LEVEL,
                ..Default::default()
            });
        }
        let names = self.names.lock();
        let entries = names
            .iter()
            .map(|name| MsgInfo0 {
                name: Some(name.clone()),
            })
            .collect();
        Ok(NetrMessageNameEnumResponse {
            info: MsgEnumStruct {
                level: 0,
                info: MsgEnumInfo::Level0(Some(MsgInfoContainer::new(entries))),
            },
            total_entries: names.len() as u32,
            ..Default::default()
        })
    }

    async fn netr_message_name_get_info(
        &self,
        req: NetrMessageNameGetInfoRequest,
    ) -> Result<NetrMessageNameGetInfoResponse> {
        let names = self.names.lock();
        match names.iter().find(|n| n.eq_ignore_ascii_case(&req.msg_name)) {
            Some(name) if req.level == 0 => Ok(NetrMessageNameGetInfoResponse {
                level: 0,
                info: MsgInfo::Level0(Some(MsgInfo0 {
                    name: Some(name.clone()),
                })),
                return_value: status::NERR_SUCCESS,
            }),
            Some(_) => Ok(NetrMessageNameGetInfoResponse {
                return_value: status::ERROR_INVALID_LEVEL,
                ..Default::default()
            }),
            None => Ok(NetrMessageNameGetInfoResponse {
                return_value: status::NERR_NAME_NOT_FOUND,
                ..Default::default()
            }),
        }
    }

    async fn netr_message_name_del(
        &self,
        req: NetrMessageNameDelRequest,
    ) -> Result<NetrMessageNameDelResponse> {
        let mut names = self.names.lock();
        let before = names.len();
        names.retain(|n| !n.eq_ignore_ascii_case(&req.msg_name));
        let return_value = if names.len() == before {
            status::NERR_NAME_NOT_FOUND
        } else {
            status::NERR_SUCCESS
        };
        Ok(NetStatus { return_value })
    }
}

fn win32_code(err: &DcomError) -> Option<u32> {
    match err {
        DcomError::Win32 { code, .. } => Some(*code),
        _ => None,
    }
}

async fn start_host() -> (
    Arc<Host>,
    std::net::SocketAddr,
    tokio::task::JoinHandle<dcerpc::Result<()>>,
) {
    init_logging();
    let host = Arc::new(Host::default());
    let rpc = Arc::new(DceRpcServer::new());
    rpc.register_interface(new_init_shutdown_interface(Arc::clone(&host)))
        .await;
    rpc.register_interface(new_msgsvc_interface(Arc::clone(&host)))
        .await;
    let (addr, server) = spawn_server(rpc).await;
    (host, addr, server)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_init_shutdown_plain_rpc() {
    let (host, addr, server) = start_host().await;
    let conn = Arc::new(connect(addr, initshutdown::syntax()).await);
    let client = DefaultInitShutdownClient::new(conn).await.unwrap();

    let err = client
        .base_abort_shutdown(BaseAbortShutdownRequest::default())
        .await
        .unwrap_err();
    assert_eq!(win32_code(&err), Some(win32::ERROR_NO_SHUTDOWN_IN_PROGRESS));

    client
        .base_initiate_shutdown_ex(BaseInitiateShutdownExRequest {
            server_name: Some("\\\\HOST".into()),
            message: Some(RegUnicodeString::new("patching")),
            timeout: 30,
            force_apps_closed: 1,
            reboot_after_shutdown: 1,
            reason: 0x8002_0003,
        })
        .await
        .unwrap();
    assert_eq!(
        host.shutdown.lock().clone(),
        Some(("patching".to_string(), 30, 0x8002_0003))
    );

    let err = client
        .base_initiate_shutdown(BaseInitiateShutdownRequest {
            timeout: 5,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(win32_code(&err), Some(win32::ERROR_SHUTDOWN_IN_PROGRESS));

    client
        .base_abort_shutdown(BaseAbortShutdownRequest::default())
        .await
        .unwrap();
    assert!(host.shutdown.lock().is_none());

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_msgsvc_shares_connection_with_init_shutdown() {
    let (_host, addr, server) = start_host().await;
    let conn = Arc::new(connect(addr, initshutdown::syntax()).await);

    let shutdown = DefaultInitShutdownClient::new(Arc::clone(&conn))
        .await
        .unwrap();
    let names = DefaultMsgsvcClient::new(Arc::clone(&conn)).await.unwrap();
    assert_ne!(shutdown.conn().context_id(), names.conn().context_id());

    for name in ["alice", "bob"] {
        names
            .netr_message_name_add(NetrMessageNameAddRequest {
                msg_name: name.into(),
                ..Default::default()
            })
            .await
            .unwrap();
    }
    let err = names
        .netr_message_name_add(NetrMessageNameAddRequest {
            msg_name: "ALICE".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(win32_code(&err), Some(status::NERR_DUPLICATE_NAME));

    let resp = names
        .netr_message_name_enum(NetrMessageNameEnumRequest {
            info: MsgEnumStruct::for_level(0),
            pref_max_len: u32::MAX,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(resp.total_entries, 2);
    let MsgEnumInfo::Level0(Some(container)) = &resp.info.info else {
        panic!("expected a level 0 container, got {:?}", resp.info);
    };
    let listed: Vec<_> = container
        .entries()
        .iter()
        .map(|e| e.name.clone().unwrap_or_default())
        .collect();
    assert_eq!(listed, vec!["ALICE", "BOB"]);

    // a level that disagrees with its union arm never leaves the client
    let err = names
        .netr_message_name_enum(NetrMessageNameEnumRequest {
            info: MsgEnumStruct {
                level: 1,
                info: MsgEnumInfo::Level0(None),
            },
            pref_max_len: u32::MAX,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            DcomError::Rpc(RpcError::Ndr(midl_ndr::NdrError::SwitchMismatch {
                expected: 1,
                actual: 0
            }))
        ),
        "{:?}",
        err
    );

    let resp = names
        .netr_message_name_get_info(NetrMessageNameGetInfoRequest {
            msg_name: "bob".into(),
            level: 0,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(matches!(
        resp.info,
        MsgInfo::Level0(Some(MsgInfo0 { name: Some(ref n) })) if n == "BOB"
    ));

    let err = names
        .netr_message_name_get_info(NetrMessageNameGetInfoRequest {
            msg_name: "bob".into(),
            level: 1,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(win32_code(&err), Some(status::ERROR_INVALID_LEVEL));

    names
        .netr_message_name_del(NetrMessageNameDelRequest {
            msg_name: "alice".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let err = names
        .netr_message_name_del(NetrMessageNameDelRequest {
            msg_name: "alice".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(win32_code(&err), Some(status::NERR_NAME_NOT_FOUND));

    // the first context is still usable after the alter_context
    let err = shutdown
        .base_abort_shutdown(BaseAbortShutdownRequest::default())
        .await
        .unwrap_err();
    assert_eq!(win32_code(&err), Some(win32::ERROR_NO_SHUTDOWN_IN_PROGRESS));

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unregistered_interface_is_rejected() {
    let (_host, addr, server) = start_host().await;
    let conn = Arc::new(connect(addr, msgsvc::syntax()).await);

    // IIisServiceControl is not served by this host
    assert!(DefaultIisServiceControlClient::new(Arc::clone(&conn))
        .await
        .is_err());

    // an opnum past the interface's last one
    let ctx = conn.bind_context(initshutdown::syntax()).await.unwrap();
    let err = conn
        .call_context(ctx, 9, None, bytes::Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.fault_status(), Some(fault::NCA_OP_RNG_ERROR));

    server.abort();
}
