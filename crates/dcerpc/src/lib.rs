//! Connection-oriented DCE RPC (MS-RPCE) client and server
//!
//! This crate carries NDR-marshalled stub data over `ncacn_ip_tcp`.
//!
//! # Features
//!
//! - bind, alter_context and several presentation contexts per connection
//! - Request and response fragmentation
//! - Object UUIDs on requests, which DCOM uses for IPID routing
//! - Fault PDUs surfaced as [`RpcError::Fault`]
//! - [`Operation`] values marshalled through `midl-ndr`
//! - Async server and client using Tokio
//!
//! # Example
//!
//! ## Server
//!
//! ```no_run
//! use dcerpc::{DceRpcServer, InterfaceBuilder};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() {
//!     let interface = InterfaceBuilder::new(
//!         "12345678-1234-1234-1234-123456789012",
//!         1,
//!         0,
//!     )
//!     .unwrap()
//!     .operation(0, |_call, _args| async { Ok(Bytes::new()) })
//!     .operation(1, |_call, args: Bytes| async move { Ok(args) })
//!     .build();
//!
//!     let server = DceRpcServer::new();
//!     server.register_interface(interface).await;
//!     server.run("127.0.0.1:12345".parse().unwrap()).await.unwrap();
//! }
//! ```
//!
//! ## Client
//!
//! ```no_run
//! use dcerpc::{DceRpcClient, SyntaxId, Uuid};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() {
//!     let interface = SyntaxId::new(
//!         Uuid::parse("12345678-1234-1234-1234-123456789012").unwrap(),
//!         1,
//!         0,
//!     );
//!
//!     let client = DceRpcClient::connect(
//!         "127.0.0.1:12345".parse().unwrap(),
//!         interface,
//!     ).await.unwrap();
//!
//!     client.null_call().await.unwrap();
//!     let result = client.call(1, Bytes::from("hello")).await.unwrap();
//!     assert_eq!(result.as_ref(), b"hello");
//! }
//! ```

pub mod config;
pub mod dcerpc;
pub mod dcerpc_client;
pub mod dcerpc_server;
pub mod dcerpc_transport;
pub mod error;
pub mod fragmentation;
pub mod operation;

pub use config::RpcConfig;
pub use dcerpc::{
    fault, reject_reason, BindAckPdu, BindNakPdu, BindPdu, ContextElement, ContextResult,
    ContextResultEntry, DataRepresentation, FaultPdu, PacketFlags, PacketType, Pdu, PduHeader,
    ProviderReason, RequestPdu, ResponsePdu, SyntaxId, Uuid, DCE_RPC_VERSION,
    DCE_RPC_VERSION_MINOR, DEFAULT_MAX_FRAG, MIN_FRAG, NDR_SYNTAX_UUID,
    NDR_SYNTAX_VERSION,
};
pub use dcerpc_client::{DceRpcClient, DceRpcClientBuilder};
pub use dcerpc_server::{
    fault_status_for, CallContext, DceRpcServer, DceRpcServerConfig, HandlerFuture, Interface,
    InterfaceBuilder, OperationHandler, ServerStats, ServerStatsSnapshot,
};
pub use dcerpc_transport::{DceRpcTransport, DEFAULT_MAX_PDU_SIZE};
pub use error::{Result, RpcError};
pub use fragmentation::{FragmentAssembler, FragmentGenerator};
pub use operation::Operation;
