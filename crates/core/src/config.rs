//! Gateway configuration, read from the environment at startup.

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::client::GatewayOptions;

pub const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";

/// Parse a listen address. A bare `:port` binds every IPv4 interface.
pub fn parse_listen_addr(value: &str) -> Result<SocketAddr, AddrParseError> {
    match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}").parse(),
        None => value.parse(),
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// `host:port` the TLS connection is made to.
    pub peer_endpoint: String,
    /// Server name expected in the peer's TLS certificate.
    pub gateway_peer: String,
    pub msp_id: String,
    pub channel_name: String,
    pub chaincode_name: String,
    pub tls_cert_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub api_addr: SocketAddr,
    pub options: GatewayOptions,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));
        let timeout = |name: &'static str, default: Duration| match var(name) {
            None => Ok(default),
            Some(v) => v
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ConfigError::Invalid {
                    name,
                    reason: format!("{v:?}: {e}"),
                }),
        };

        let api_addr = var("API_ADDR").unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let api_addr = parse_listen_addr(&api_addr).map_err(|e| ConfigError::Invalid {
            name: "API_ADDR",
            reason: format!("{api_addr:?}: {e}"),
        })?;

        let defaults = GatewayOptions::default();
        let options = GatewayOptions {
            evaluate_timeout: timeout("EVALUATE_TIMEOUT_SECS", defaults.evaluate_timeout)?,
            endorse_timeout: timeout("ENDORSE_TIMEOUT_SECS", defaults.endorse_timeout)?,
            submit_timeout: timeout("SUBMIT_TIMEOUT_SECS", defaults.submit_timeout)?,
            commit_status_timeout: timeout(
                "COMMIT_STATUS_TIMEOUT_SECS",
                defaults.commit_status_timeout,
            )?,
        };

        Ok(Self {
            peer_endpoint: required("PEER_ENDPOINT")?,
            gateway_peer: required("GATEWAY_PEER")?,
            msp_id: required("MSP_ID")?,
            channel_name: required("CHANNEL_NAME")?,
            chaincode_name: required("CHAINCODE_NAME")?,
            tls_cert_path: required("TLS_CERT_PATH")?.into(),
            cert_path: required("CERT_PATH")?.into(),
            key_path: required("KEY_PATH")?.into(),
            api_addr,
            options,
        })
    }
}
