//! Stubs for Microsoft RPC interfaces
//!
//! Each module carries one interface: its syntax, opnums, request and
//! response types, a client trait with a default implementation, and a
//! server trait with a dispatcher.
//!
//! DCOM interfaces ride on [`dcom::ObjectClient`] and are hosted with
//! [`dcom::DcomServer`]:
//!
//! - [`iiss`]: IIisServiceControl (IIS service control)
//! - [`coma`]: ICatalogSession (COM+ catalog)
//! - [`wmi`]: IWbemLevel1Login (WMI login)
//!
//! Plain RPC interfaces bind through [`InterfaceClient`] and register
//! directly with a [`dcerpc::DceRpcServer`]:
//!
//! - [`initshutdown`]: InitShutdown (remote shutdown)
//! - [`msgsvc`]: msgsvc (messenger name table)

pub mod client;
pub mod coma;
pub mod iiss;
pub mod initshutdown;
pub mod msgsvc;
pub mod wmi;

pub use client::InterfaceClient;
