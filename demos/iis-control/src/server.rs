//! IIS service control server
//!
//! Hosts one IIisServiceControl object backed by an in-memory table of
//! services and prints its IPID for the client.
//!
//! USAGE:
//!   iis-control-server [OPTIONS]
//!
//! EXAMPLES:
//!   iis-control-server                           # Listen on the configured address
//!   iis-control-server --listen 0.0.0.0:4135     # Listen on all interfaces
//!   iis-control-server --ipid-file /tmp/iis.ipid # Also write the IPID to a file

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use dcerpc::{DceRpcServer, RpcConfig};
use dcom::idispatch::{
    DispatchServer, GetIdsOfNamesRequest, GetIdsOfNamesResponse, GetTypeInfoCountRequest,
    GetTypeInfoCountResponse, GetTypeInfoRequest, GetTypeInfoResponse,
};
use dcom::{hresult, DcomServer, DualStringArray, Result};
use msrpc::iiss::{
    self, IisServiceControlServer, KillRequest, KillResponse, RebootRequest, RebootResponse,
    StartRequest, StartResponse, StatusRequest, StatusResponse, StopRequest, StopResponse,
};
use parking_lot::Mutex;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "iis-control-server")]
#[command(version)]
#[command(about = "Hosts an IIisServiceControl object over DCE/RPC")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on; defaults to the configured server address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Write the object's IPID to this file
    #[arg(long)]
    ipid_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Running,
    Stopped,
}

impl State {
    fn as_str(self) -> &'static str {
        match self {
            State::Running => "running",
            State::Stopped => "stopped",
        }
    }
}

struct IisServices {
    services: Mutex<Vec<(&'static str, State)>>,
}

impl IisServices {
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
        for (name, current) in self.services.lock().iter_mut() {
            if *current != state {
                info!("{} -> {}", name, state.as_str());
                *current = state;
            }
        }
    }

    /// `NAME\0state\0` for every service
    fn records(&self) -> (Vec<u8>, u32) {
        let services = self.services.lock();
        let mut out = Vec::new();
        for (name, state) in services.iter() {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(state.as_str().as_bytes());
            out.push(0);
        }
        (out, services.len() as u32)
    }
}

#[async_trait]
impl DispatchServer for IisServices {
    async fn get_type_info_count(
        &self,
        _req: GetTypeInfoCountRequest,
    ) -> Result<GetTypeInfoCountResponse> {
        Ok(GetTypeInfoCountResponse::default())
    }

    async fn get_type_info(&self, _req: GetTypeInfoRequest) -> Result<GetTypeInfoResponse> {
        Ok(GetTypeInfoResponse {
            return_value: hresult::E_NOTIMPL as i32,
            ..Default::default()
        })
    }

    async fn get_ids_of_names(&self, _req: GetIdsOfNamesRequest) -> Result<GetIdsOfNamesResponse> {
        Ok(GetIdsOfNamesResponse {
            return_value: hresult::E_NOTIMPL as i32,
            ..Default::default()
        })
    }
}

#[async_trait]
impl IisServiceControlServer for IisServices {
    async fn stop(&self, req: StopRequest) -> Result<StopResponse> {
        info!("Stop (timeout {} ms, force {})", req.timeout_msecs, req.force);
        self.set_all(State::Stopped);
        Ok(StopResponse::default())
    }

    async fn start(&self, req: StartRequest) -> Result<StartResponse> {
        info!("Start (timeout {} ms)", req.timeout_msecs);
        self.set_all(State::Running);
        Ok(StartResponse::default())
    }

    async fn reboot(&self, req: RebootRequest) -> Result<RebootResponse> {
        info!("Reboot refused (timeout {} ms)", req.timeout_msecs);
        Ok(RebootResponse {
            return_value: hresult::E_ACCESSDENIED as i32,
            ..Default::default()
        })
    }

    async fn status(&self, req: StatusRequest) -> Result<StatusResponse> {
        let (records, count) = self.records();
        let required = records.len() as u32;
        if req.buffer_size < required {
            return Ok(StatusResponse {
                required_buffer_size: required,
                return_value: hresult::E_INSUFFICIENT_BUFFER as i32,
                ..Default::default()
            });
        }
        Ok(StatusResponse {
            buffer: records,
            required_buffer_size: required,
            service_count: count,
            ..Default::default()
        })
    }

    async fn kill(&self, _req: KillRequest) -> Result<KillResponse> {
        info!("Kill");
        self.set_all(State::Stopped);
        Ok(KillResponse::default())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = RpcConfig::load(args.config.as_deref())?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if config.debug { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let addr = match args.listen {
        Some(addr) => addr,
        None => config.server_addr()?,
    };

    let dcom = DcomServer::new(DualStringArray::with_tcp_binding(&format!(
        "{}[{}]",
        addr.ip(),
        addr.port()
    )));
    let objref = dcom.export(iiss::new_iis_service_control_stub(Arc::new(IisServices::new())))?;

    let rpc = DceRpcServer::with_config(config.server_config());
    dcom.register(&rpc, &[iiss::syntax()]).await;

    println!("IIisServiceControl");
    println!("  OXID:        {}", dcom.oxid());
    println!("  IPID:        {}", objref.ipid);
    println!("  RemUnknown:  {}", dcom.rem_unknown_ipid());
    println!("  Listening:   {}", addr);

    if let Some(path) = &args.ipid_file {
        std::fs::write(path, objref.ipid.to_string())?;
    }

    info!("Serving on {}", addr);
    rpc.run_until(addr, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    Ok(())
}
