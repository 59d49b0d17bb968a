//! IIS service control client
//!
//! USAGE:
//!   iis-control-client --ipid <IPID> <COMMAND>
//!
//! EXAMPLES:
//!   iis-control-client --ipid-file /tmp/iis.ipid status
//!   iis-control-client --ipid <IPID> stop --timeout 5000 --force
//!   iis-control-client --ipid <IPID> --rem-unknown <IPID> start

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dcerpc::RpcConfig;
use dcom::remunknown::{DefaultRemUnknown2Client, RemQueryInterface2Request, RemUnknown2Client};
use dcom::{hresult, DcomError, Ipid};
use msrpc::iiss::{
    self, DefaultIisServiceControlClient, IisServiceControlClient, KillRequest, RebootRequest,
    StartRequest, StatusRequest, StopRequest,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const MAX_STATUS_BUFFER: u32 = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "iis-control-client")]
#[command(version)]
#[command(about = "Calls IIisServiceControl on an iis-control-server")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server address; defaults to the configured server address
    #[arg(long)]
    server: Option<SocketAddr>,

    /// IPID of the IIisServiceControl object
    #[arg(long, conflicts_with = "ipid_file")]
    ipid: Option<String>,

    /// File holding the IPID, as written by the server
    #[arg(long)]
    ipid_file: Option<PathBuf>,

    /// IRemUnknown IPID; when given the object is queried for the
    /// interface before the call
    #[arg(long)]
    rem_unknown: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List services and their state
    Status {
        /// Initial buffer size; grown while the server asks for more
        #[arg(long, default_value_t = 16)]
        buffer_size: u32,
    },
    /// Stop all services
    Stop {
        #[arg(long, default_value_t = 30_000)]
        timeout: u32,
        #[arg(long)]
        force: bool,
    },
    /// Start all services
    Start {
        #[arg(long, default_value_t = 30_000)]
        timeout: u32,
    },
    /// Reboot the host
    Reboot {
        #[arg(long, default_value_t = 30_000)]
        timeout: u32,
        #[arg(long)]
        force_apps_closed: bool,
    },
    /// Terminate all services
    Kill,
}

fn print_records(buffer: &[u8], count: u32) {
    let fields: Vec<_> = buffer
        .split(|b| *b == 0)
        .map(String::from_utf8_lossy)
        .collect();
    for pair in fields.chunks(2).take(count as usize) {
        if let [name, state] = pair {
            println!("  {:<10} {}", name, state);
        }
    }
}

async fn status(
    client: &DefaultIisServiceControlClient,
    mut buffer_size: u32,
) -> dcom::Result<()> {
    loop {
        let req = StatusRequest {
            buffer_size,
            ..Default::default()
        };
        match client.status(req).await {
            Ok(resp) => {
                println!("{} service(s):", resp.service_count);
                print_records(&resp.buffer, resp.service_count);
                return Ok(());
            }
            Err(e)
                if e.hresult() == Some(hresult::E_INSUFFICIENT_BUFFER)
                    && buffer_size < MAX_STATUS_BUFFER =>
            {
                buffer_size = buffer_size.saturating_mul(2).min(MAX_STATUS_BUFFER);
                info!("Status buffer too small, retrying with {}", buffer_size);
            }
            Err(e) => return Err(e),
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = RpcConfig::load(args.config.as_deref())?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if config.debug { Level::DEBUG } else { Level::WARN })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ipid = match (&args.ipid, &args.ipid_file) {
        (Some(ipid), _) => Ipid::parse(ipid)?,
        (None, Some(path)) => Ipid::parse(std::fs::read_to_string(path)?.trim())?,
        (None, None) => return Err("one of --ipid or --ipid-file is required".into()),
    };
    let addr = match args.server {
        Some(addr) => addr,
        None => config.server_addr()?,
    };

    let conn = Arc::new(config.client_builder(iiss::syntax()).connect(addr).await?);

    if let Some(rem_unknown) = &args.rem_unknown {
        let remunk = DefaultRemUnknown2Client::new(Arc::clone(&conn))
            .await?
            .ipid(Ipid::parse(rem_unknown)?);
        let resp = remunk
            .rem_query_interface2(RemQueryInterface2Request {
                ripid: ipid,
                iids: vec![iiss::IID],
                ..Default::default()
            })
            .await?;
        match resp.hrs.first().copied() {
            Some(0) => info!("Object implements IIisServiceControl"),
            Some(hr) => {
                warn!("QueryInterface failed: {}", hresult::name(hr as u32));
                return Err(DcomError::Hresult {
                    operation: "RemQueryInterface2",
                    code: hr as u32,
                }
                .into());
            }
            None => return Err("empty RemQueryInterface2 reply".into()),
        }
    }

    let client = DefaultIisServiceControlClient::new(conn).await?.ipid(ipid);

    match args.command {
        Command::Status { buffer_size } => status(&client, buffer_size).await?,
        Command::Stop { timeout, force } => {
            client
                .stop(StopRequest {
                    timeout_msecs: timeout,
                    force: force as u32,
                    ..Default::default()
                })
                .await?;
            println!("Services stopped");
        }
        Command::Start { timeout } => {
            client
                .start(StartRequest {
                    timeout_msecs: timeout,
                    ..Default::default()
                })
                .await?;
            println!("Services started");
        }
        Command::Reboot {
            timeout,
            force_apps_closed,
        } => {
            client
                .reboot(RebootRequest {
                    timeout_msecs: timeout,
                    force_apps_closed: force_apps_closed as u32,
                    ..Default::default()
                })
                .await?;
            println!("Reboot requested");
        }
        Command::Kill => {
            client.kill(KillRequest::default()).await?;
            println!("Services killed");
        }
    }

    Ok(())
}
