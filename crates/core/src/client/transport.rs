//! Transport to the ledger gateway endpoint.
//!
//! The gateway exposes four calls, one per protocol step:
//!
//! | call            | request                      | response              |
//! |-----------------|------------------------------|-----------------------|
//! | `evaluate`      | [`SignedProposal`]           | contract result bytes |
//! | `endorse`       | [`SignedProposal`]           | [`PreparedTransaction`] |
//! | `submit`        | [`SignedEnvelope`]           | (accepted for ordering) |
//! | `commit-status` | [`SignedCommitStatusRequest`] | [`CommitStatus`]     |
//!
//! [`HttpsTransport`] speaks this over TLS. Tests run the same protocol
//! against an in-process ledger.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::proposal::{
    CommitStatus, PreparedTransaction, SignedCommitStatusRequest, SignedEnvelope, SignedProposal,
};

pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Failure reported by (or while reaching) the gateway for one call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),
    /// The contract returned an application error; the message is the
    /// contract's own.
    #[error("contract rejected the transaction: {0}")]
    Rejected(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Abstraction over the gateway endpoint for testability.
pub trait LedgerTransport: Send + Sync + 'static {
    /// Run a read-only proposal on a single peer.
    fn evaluate(&self, proposal: SignedProposal) -> TransportFuture<'_, Vec<u8>>;

    /// Collect endorsements for a proposal.
    fn endorse(&self, proposal: SignedProposal) -> TransportFuture<'_, PreparedTransaction>;

    /// Hand a signed transaction to the ordering service.
    fn submit(&self, envelope: SignedEnvelope) -> TransportFuture<'_, ()>;

    /// Wait for the transaction's block to commit and report its validation code.
    fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
    ) -> TransportFuture<'_, CommitStatus>;
}

impl<T: LedgerTransport> LedgerTransport for Arc<T> {
    fn evaluate(&self, proposal: SignedProposal) -> TransportFuture<'_, Vec<u8>> {
        (**self).evaluate(proposal)
    }

    fn endorse(&self, proposal: SignedProposal) -> TransportFuture<'_, PreparedTransaction> {
        (**self).endorse(proposal)
    }

    fn submit(&self, envelope: SignedEnvelope) -> TransportFuture<'_, ()> {
        (**self).submit(envelope)
    }

    fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
    ) -> TransportFuture<'_, CommitStatus> {
        (**self).commit_status(request)
    }
}

// =============================================================================
// Errors on the wire
// =============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ChaincodeError,
    Unavailable,
    PermissionDenied,
    #[serde(other)]
    Unknown,
}

/// Body of a non-2xx gateway response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl From<ErrorBody> for TransportError {
    fn from(body: ErrorBody) -> Self {
        match body.code {
            ErrorCode::ChaincodeError => TransportError::Rejected(body.message),
            ErrorCode::Unavailable => TransportError::Unavailable(body.message),
            ErrorCode::PermissionDenied => TransportError::AccessDenied(body.message),
            ErrorCode::Unknown => TransportError::Protocol(body.message),
        }
    }
}

// =============================================================================
// HTTPS transport
// =============================================================================

/// Errors while establishing the secured channel. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid TLS trust certificate: {0}")]
    TrustCertificate(String),
    #[error("invalid endpoint {endpoint}: {reason}")]
    Endpoint { endpoint: String, reason: String },
    #[error("cannot reach {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },
    #[error("failed to build TLS client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Gateway transport over HTTPS with a pinned trust anchor.
///
/// Connections go to the configured endpoint address while the TLS server
/// name is validated against the peer name, so the endpoint may be an IP or
/// an alias that does not appear in the peer's certificate.
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    client: reqwest::Client,
    base_url: String,
}

/// Upper bound on the connect-time TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

impl HttpsTransport {
    /// Build the client and complete one TLS handshake with the peer, so a
    /// wrong address, port or trust anchor fails here.
    pub async fn connect(
        endpoint: &str,
        peer_name: &str,
        tls_ca_pem: &[u8],
    ) -> Result<Self, ChannelError> {
        let transport = Self::prepare(endpoint, peer_name, tls_ca_pem).await?;
        transport.handshake(endpoint).await?;
        tracing::info!(endpoint, peer_name, "Ledger channel ready");
        Ok(transport)
    }

    async fn prepare(
        endpoint: &str,
        peer_name: &str,
        tls_ca_pem: &[u8],
    ) -> Result<Self, ChannelError> {
        crate::identity::parse_certificate_pem(tls_ca_pem)
            .map_err(|e| ChannelError::TrustCertificate(e.to_string()))?;
        let ca = reqwest::Certificate::from_pem(tls_ca_pem)
            .map_err(|e| ChannelError::TrustCertificate(e.to_string()))?;

        let (host, port) = split_endpoint(endpoint)?;
        let addr: SocketAddr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ChannelError::Endpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ChannelError::Endpoint {
                endpoint: endpoint.to_string(),
                reason: "no addresses resolved".into(),
            })?;

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca)
            .resolve(peer_name, addr)
            .build()?;
        tracing::debug!(endpoint, peer_name, %addr, "Resolved ledger endpoint");

        Ok(Self {
            client,
            base_url: format!("https://{peer_name}:{port}"),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Any HTTP status counts: it can only arrive over a verified channel.
    async fn handshake(&self, endpoint: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .head(&self.base_url)
            .timeout(HANDSHAKE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ChannelError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: error_chain(&e),
            })?;
        tracing::debug!(endpoint, status = %response.status(), "TLS handshake completed");
        Ok(())
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| TransportError::Protocol(format!("{path}: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        tracing::debug!(%status, path, body = %text, "Gateway returned an error");
        Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => body.into(),
            Err(_) if status.is_server_error() => TransportError::Unavailable(format!("{status}")),
            Err(_) => TransportError::Protocol(format!("{status}: {text}")),
        })
    }
}

/// reqwest's own message omits the connect or TLS cause.
fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut reason = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    reason
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_connect() || e.is_timeout() {
        TransportError::Unavailable(e.to_string())
    } else {
        TransportError::Protocol(e.to_string())
    }
}

/// Split `host:port`, tolerating an `https://` or `grpcs://` prefix.
fn split_endpoint(endpoint: &str) -> Result<(&str, u16), ChannelError> {
    let bad = |reason: &str| ChannelError::Endpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("grpcs://"))
        .unwrap_or(endpoint)
        .trim_end_matches('/');
    let (host, port) = trimmed.rsplit_once(':').ok_or_else(|| bad("expected host:port"))?;
    if host.is_empty() {
        return Err(bad("empty host"));
    }
    let port = port.parse::<u16>().map_err(|_| bad("invalid port"))?;
    Ok((host.trim_start_matches('[').trim_end_matches(']'), port))
}

impl LedgerTransport for HttpsTransport {
    fn evaluate(&self, proposal: SignedProposal) -> TransportFuture<'_, Vec<u8>> {
        Box::pin(async move {
            let response: ResultBody = self.post("/v1/evaluate", &proposal).await?;
            Ok(response.result)
        })
    }

    fn endorse(&self, proposal: SignedProposal) -> TransportFuture<'_, PreparedTransaction> {
        Box::pin(async move { self.post("/v1/endorse", &proposal).await })
    }

    fn submit(&self, envelope: SignedEnvelope) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let _: serde_json::Value = self.post("/v1/submit", &envelope).await?;
            Ok(())
        })
    }

    fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
    ) -> TransportFuture<'_, CommitStatus> {
        Box::pin(async move { self.post("/v1/commit-status", &request).await })
    }
}

#[derive(Deserialize)]
struct ResultBody {
    #[serde(with = "hex::serde")]
    result: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::fixtures;

    #[test]
    fn test_split_endpoint() {
        assert_eq!(split_endpoint("localhost:7051").unwrap(), ("localhost", 7051));
        assert_eq!(split_endpoint("grpcs://peer0:7051").unwrap(), ("peer0", 7051));
        assert_eq!(split_endpoint("https://10.0.0.5:443/").unwrap(), ("10.0.0.5", 443));
        assert_eq!(split_endpoint("[::1]:7051").unwrap(), ("::1", 7051));
        assert!(split_endpoint("localhost").is_err());
        assert!(split_endpoint(":7051").is_err());
        assert!(split_endpoint("localhost:http").is_err());
    }

    #[tokio::test]
    async fn test_prepare_uses_peer_name_for_tls() {
        let transport = HttpsTransport::prepare(
            "127.0.0.1:7051",
            "peer0.org1.example.com",
            fixtures::TLS_CA_PEM.as_bytes(),
        )
        .await
        .unwrap();
        assert_eq!(transport.base_url(), "https://peer0.org1.example.com:7051");
    }

    #[tokio::test]
    async fn test_connect_rejects_closed_port() {
        let err = HttpsTransport::connect(
            "127.0.0.1:1",
            "peer0.org1.example.com",
            fixtures::TLS_CA_PEM.as_bytes(),
        )
        .await
        .unwrap_err();
        assert!(
            matches!(&err, ChannelError::Unreachable { endpoint, .. } if endpoint == "127.0.0.1:1"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_plaintext_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let err = HttpsTransport::connect(
            &endpoint,
            "peer0.org1.example.com",
            fixtures::TLS_CA_PEM.as_bytes(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChannelError::Unreachable { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_trust_certificate() {
        let err = HttpsTransport::connect("127.0.0.1:7051", "peer0", b"garbage")
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::TrustCertificate(_)));

        let key_pem = fixtures::KEY_PKCS8_PEM.as_bytes();
        let err = HttpsTransport::connect("127.0.0.1:7051", "peer0", key_pem)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::TrustCertificate(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_endpoint() {
        let err = HttpsTransport::connect("no-port", "peer0", fixtures::TLS_CA_PEM.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Endpoint { .. }));
    }

    #[test]
    fn test_error_body_mapping() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"code":"CHAINCODE_ERROR","message":"NOT_FOUND: the asset 1 does not exist"}"#,
        )
        .unwrap();
        assert_eq!(
            TransportError::from(body),
            TransportError::Rejected("NOT_FOUND: the asset 1 does not exist".into())
        );

        let body: ErrorBody =
            serde_json::from_str(r#"{"code":"NEW_THING","message":"?"}"#).unwrap();
        assert!(matches!(TransportError::from(body), TransportError::Protocol(_)));
    }
}
