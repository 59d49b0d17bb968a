//! Runtime configuration shared by clients and servers
//!
//! Values come from defaults, then an optional JSON file, then the
//! `MSRPC_DEBUG`, `MSRPC_SERVER` and `MSRPC_TIMEOUT` environment variables

use crate::dcerpc::{SyntaxId, DEFAULT_MAX_FRAG, MIN_FRAG};
use crate::dcerpc_client::DceRpcClientBuilder;
use crate::dcerpc_server::DceRpcServerConfig;
use crate::dcerpc_transport::DEFAULT_MAX_PDU_SIZE;
use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default call timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// The only protocol sequence implemented
pub const PROTOCOL_NCACN_IP_TCP: &str = "ncacn_ip_tcp";

/// The only transfer syntax implemented
pub const TRANSFER_ENCODING_NDR20: &str = "ndr20";

/// RPC configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Enables debug logging
    pub debug: bool,
    /// Server address, `host:port`
    pub server: String,
    /// Timeout for connect, bind and each call, in seconds. Zero disables it
    pub timeout: u64,
    /// Protocol sequence
    pub protocol: String,
    /// Transfer syntax
    pub transfer_encoding: String,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub max_pdu_size: usize,
    /// Concurrent connections a server accepts
    pub max_connections: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            debug: false,
            server: "127.0.0.1:135".to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
            protocol: PROTOCOL_NCACN_IP_TCP.to_string(),
            transfer_encoding: TRANSFER_ENCODING_NDR20.to_string(),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            max_connections: 10000,
        }
    }
}

impl RpcConfig {
    /// Defaults overridden from the environment
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load from `path` when given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| RpcError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| RpcError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(debug) = var("MSRPC_DEBUG") {
            self.debug = matches!(debug.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(server) = var("MSRPC_SERVER") {
            self.server = server;
        }
        if let Some(timeout) = var("MSRPC_TIMEOUT").and_then(|t| t.trim().parse().ok()) {
            self.timeout = timeout;
        }
    }

    /// Reject settings this implementation cannot honour
    pub fn validate(&self) -> Result<()> {
        if !self.protocol.eq_ignore_ascii_case(PROTOCOL_NCACN_IP_TCP) {
            return Err(RpcError::Config(format!(
                "unsupported protocol sequence: {}",
                self.protocol
            )));
        }
        if !self.transfer_encoding.eq_ignore_ascii_case(TRANSFER_ENCODING_NDR20) {
            return Err(RpcError::Config(format!(
                "unsupported transfer encoding: {}",
                self.transfer_encoding
            )));
        }
        if self.max_xmit_frag < MIN_FRAG || self.max_recv_frag < MIN_FRAG {
            return Err(RpcError::Config(format!(
                "fragment sizes below {} are not allowed",
                MIN_FRAG
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// Parsed `server` address
    pub fn server_addr(&self) -> Result<SocketAddr> {
        self.server
            .parse()
            .map_err(|e| RpcError::Config(format!("invalid server address {}: {}", self.server, e)))
    }

    pub fn server_config(&self) -> DceRpcServerConfig {
        DceRpcServerConfig {
            max_pdu_size: self.max_pdu_size,
            max_connections: self.max_connections,
            max_xmit_frag: self.max_xmit_frag,
            max_recv_frag: self.max_recv_frag,
        }
    }

    pub fn client_builder(&self, interface: SyntaxId) -> DceRpcClientBuilder {
        let builder = DceRpcClientBuilder::from_syntax(interface)
            .max_pdu_size(self.max_pdu_size)
            .max_frag(self.max_xmit_frag, self.max_recv_frag);
        match self.timeout() {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }
}
