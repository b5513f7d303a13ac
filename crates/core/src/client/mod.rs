//! Ledger client: signs proposals with the gateway identity and drives them
//! through evaluate or endorse → order → commit.
//!
//! ```text
//! Gateway::connect(identity, transport, options)
//!     └─ network(channel)
//!          └─ contract(name) ── evaluate(fn, args)  (one peer, read only)
//!                            └─ submit(fn, args)    (endorse, order, commit)
//! ```
//!
//! Every phase is bounded by its own timeout. Nothing is retried: a
//! submission that fails after the envelope reached ordering may still
//! commit, and [`GatewayError::outcome`] says when that is possible.

pub mod proposal;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod in_process;


use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use account_registry::{ErrorKind, ValidationCode};

use crate::identity::{IdentityError, SigningIdentity};
use proposal::{CommitStatusRequest, Proposal, SignError};
use transport::{LedgerTransport, TransportError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-phase deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayOptions {
    pub evaluate_timeout: Duration,
    pub endorse_timeout: Duration,
    pub submit_timeout: Duration,
    pub commit_status_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            evaluate_timeout: DEFAULT_TIMEOUT,
            endorse_timeout: DEFAULT_TIMEOUT,
            submit_timeout: DEFAULT_TIMEOUT,
            commit_status_timeout: DEFAULT_TIMEOUT,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Why a single bounded call did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPhase {
    Endorsement,
    Ordering,
    CommitWait,
}

impl fmt::Display for SubmitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmitPhase::Endorsement => "endorsement",
            SubmitPhase::Ordering => "ordering",
            SubmitPhase::CommitWait => "commit wait",
        })
    }
}

/// Whether a failed submission may still take effect on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    NotCommitted,
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("evaluation failed: {cause}")]
    Evaluation { cause: CallError },

    #[error("submission failed during {phase} of transaction {tx_id}: {cause}")]
    Submission {
        phase: SubmitPhase,
        tx_id: String,
        cause: CallError,
    },

    #[error("transaction {tx_id} committed with validation code {code}")]
    Commit { tx_id: String, code: ValidationCode },

    #[error("signing failed: {0}")]
    Signing(#[from] IdentityError),

    #[error("failed to encode request: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode ledger response: {0}")]
    Decode(String),
}

impl From<SignError> for GatewayError {
    fn from(e: SignError) -> Self {
        match e {
            SignError::Encode(e) => GatewayError::Encode(e),
            SignError::Identity(e) => GatewayError::Signing(e),
        }
    }
}

impl GatewayError {
    pub fn outcome(&self) -> TransactionOutcome {
        match self {
            GatewayError::Submission {
                phase: SubmitPhase::CommitWait,
                ..
            }
            | GatewayError::Submission {
                phase: SubmitPhase::Ordering,
                cause: CallError::Timeout(_),
                ..
            } => TransactionOutcome::Unknown,
            _ => TransactionOutcome::NotCommitted,
        }
    }

    pub fn tx_id(&self) -> Option<&str> {
        match self {
            GatewayError::Submission { tx_id, .. } | GatewayError::Commit { tx_id, .. } => {
                Some(tx_id)
            }
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<&CallError> {
        match self {
            GatewayError::Evaluation { cause } | GatewayError::Submission { cause, .. } => {
                Some(cause)
            }
            _ => None,
        }
    }

    /// Classification of a contract rejection, if this is one.
    pub fn contract_error_kind(&self) -> Option<ErrorKind> {
        match self.cause()? {
            CallError::Transport(TransportError::Rejected(message)) => {
                Some(ErrorKind::from_wire(message).unwrap_or(ErrorKind::Internal))
            }
            _ => None,
        }
    }

    /// The contract's message for a rejection, without the kind prefix.
    pub fn contract_message(&self) -> Option<&str> {
        match self.cause()? {
            CallError::Transport(TransportError::Rejected(message)) => Some(
                message
                    .split_once(": ")
                    .filter(|(code, _)| ErrorKind::from_code(code).is_some())
                    .map_or(message.as_str(), |(_, rest)| rest),
            ),
            _ => None,
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, CallError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(CallError::Transport),
        Err(_) => Err(CallError::Timeout(limit)),
    }
}

// =============================================================================
// Gateway / Network / Contract
// =============================================================================

struct Inner {
    signer: SigningIdentity,
    transport: Box<dyn LedgerTransport>,
    options: GatewayOptions,
}

/// A connection to the ledger under one signing identity. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("msp_id", &self.inner.signer.identity().msp_id())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Bind an identity to a transport. Signs a test message first so an
    /// unusable key fails here rather than on the first request.
    pub fn connect(
        signer: SigningIdentity,
        transport: impl LedgerTransport,
        options: GatewayOptions,
    ) -> Result<Self, GatewayError> {
        signer.sign_message(b"gateway self-check")?;
        tracing::info!(
            msp_id = %signer.identity().msp_id(),
            subject = %signer.identity().subject(),
            ?options,
            "Gateway connected"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                signer,
                transport: Box::new(transport),
                options,
            }),
        })
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.inner.options
    }

    pub fn network(&self, channel: impl Into<String>) -> Network {
        Network {
            gateway: self.clone(),
            channel: channel.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Network {
    gateway: Gateway,
    channel: String,
}

impl Network {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn contract(&self, name: impl Into<String>) -> Contract {
        let name: String = name.into();
        Contract {
            gateway: self.gateway.clone(),
            channel: Arc::from(self.channel.as_str()),
            chaincode: Arc::from(name),
        }
    }
}

/// Handle on one deployed contract. `Send + Sync`, shared across tasks.
#[derive(Debug, Clone)]
pub struct Contract {
    gateway: Gateway,
    channel: Arc<str>,
    chaincode: Arc<str>,
}

impl Contract {
    pub fn name(&self) -> &str {
        &self.chaincode
    }

    fn proposal(&self, function: &str, args: &[String]) -> Proposal {
        Proposal::new(
            &self.channel,
            &self.chaincode,
            self.gateway.inner.signer.identity().serialized(),
            function,
            args,
        )
    }

    /// Run a query on one peer. Nothing is ordered or committed.
    pub async fn evaluate(&self, function: &str, args: &[String]) -> Result<Vec<u8>, GatewayError> {
        let inner = &self.gateway.inner;
        let proposal = self.proposal(function, args);
        let tx_id = proposal.tx_id().to_string();
        let signed = proposal.sign(&inner.signer)?;

        tracing::debug!(%tx_id, function, "Evaluating");
        bounded(
            inner.options.evaluate_timeout,
            inner.transport.evaluate(signed),
        )
        .await
        .map_err(|cause| {
            tracing::warn!(%tx_id, function, %cause, "Evaluation failed");
            GatewayError::Evaluation { cause }
        })
    }

    /// Endorse, order and wait for commit. Returns the contract's result
    /// once the transaction is committed as valid.
    pub async fn submit(&self, function: &str, args: &[String]) -> Result<Vec<u8>, GatewayError> {
        let inner = &self.gateway.inner;
        let options = inner.options;
        let proposal = self.proposal(function, args);
        let tx_id = proposal.tx_id().to_string();
        let signed = proposal.sign(&inner.signer)?;

        let failed = |phase: SubmitPhase| {
            let tx_id = tx_id.clone();
            move |cause: CallError| {
                tracing::warn!(%tx_id, function, %phase, %cause, "Submission failed");
                GatewayError::Submission {
                    phase,
                    tx_id,
                    cause,
                }
            }
        };

        tracing::debug!(%tx_id, function, "Endorsing");
        let prepared = bounded(options.endorse_timeout, inner.transport.endorse(signed))
            .await
            .map_err(failed(SubmitPhase::Endorsement))?;
        if prepared.tx_id != tx_id {
            return Err(GatewayError::Decode(format!(
                "endorsement returned transaction {} for proposal {tx_id}",
                prepared.tx_id
            )));
        }

        let envelope = prepared.sign(&inner.signer)?;
        bounded(options.submit_timeout, inner.transport.submit(envelope))
            .await
            .map_err(failed(SubmitPhase::Ordering))?;

        let request = CommitStatusRequest {
            channel_id: self.channel.to_string(),
            tx_id: tx_id.clone(),
            identity: inner.signer.identity().serialized(),
        }
        .sign(&inner.signer)?;
        let status = bounded(
            options.commit_status_timeout,
            inner.transport.commit_status(request),
        )
        .await
        .map_err(failed(SubmitPhase::CommitWait))?;

        if !status.validation_code.is_valid() {
            tracing::warn!(
                %tx_id,
                function,
                block = status.block_number,
                code = %status.validation_code,
                "Transaction invalidated at commit"
            );
            return Err(GatewayError::Commit {
                tx_id,
                code: status.validation_code,
            });
        }

        tracing::info!(%tx_id, function, block = status.block_number, "Transaction committed");
        Ok(prepared.result)
    }
}
