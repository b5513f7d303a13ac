//! In-process ledger speaking the gateway protocol.
//!
//! Runs the account contract against a [`MemoryLedger`], checks every
//! signature against the certificate carried in the request, and commits
//! each submitted transaction in a block of its own. Faults can be injected
//! per endpoint to exercise timeouts and outcome handling.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use account_registry::memory::{MemoryLedger, ReadWriteSet};
use account_registry::AccountContract;

use super::proposal::{
    CommitStatus, PreparedTransaction, Proposal, SignedCommitStatusRequest, SignedEnvelope,
    SignedProposal,
};
use super::transport::{LedgerTransport, TransportError, TransportFuture};
use crate::identity::{verify_message, Identity, PublicKey, SerializedIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Evaluate,
    Endorse,
    Submit,
    CommitStatus,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Unavailable,
    Delay(Duration),
}

struct Endorsed {
    rwset: ReadWriteSet,
    payload: Vec<u8>,
    creator: PublicKey,
}

#[derive(Default)]
struct State {
    ledger: MemoryLedger,
    endorsed: HashMap<String, Endorsed>,
    statuses: HashMap<String, CommitStatus>,
}

pub struct InProcessLedger {
    channel: String,
    chaincode: String,
    state: Mutex<State>,
    faults: Mutex<HashMap<Endpoint, Fault>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn access_denied(reason: impl ToString) -> TransportError {
    TransportError::AccessDenied(reason.to_string())
}

fn malformed(what: &str, e: impl std::fmt::Display) -> TransportError {
    TransportError::Protocol(format!("malformed {what}: {e}"))
}

/// Check `signature` over `message` against the creator's certificate key.
fn verify_creator(
    creator: &SerializedIdentity,
    message: &[u8],
    signature: &[u8],
) -> Result<PublicKey, TransportError> {
    let key = Identity::from_serialized(creator)
        .and_then(|identity| identity.verifying_key())
        .map_err(access_denied)?;
    if !verify_message(&key, message, signature) {
        return Err(access_denied("signature verification failed"));
    }
    Ok(key)
}

impl InProcessLedger {
    pub fn new(channel: impl Into<String>, chaincode: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chaincode: chaincode.into(),
            state: Mutex::new(State::default()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Make `endpoint` answer with [`TransportError::Unavailable`].
    pub fn fail(&self, endpoint: Endpoint) {
        lock(&self.faults).insert(endpoint, Fault::Unavailable);
    }

    /// Hold every call to `endpoint` for `delay` before handling it.
    pub fn delay(&self, endpoint: Endpoint, delay: Duration) {
        lock(&self.faults).insert(endpoint, Fault::Delay(delay));
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Committed value of `key`.
    pub fn committed(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.state).ledger.get(key).map(<[u8]>::to_vec)
    }

    pub fn height(&self) -> u64 {
        lock(&self.state).ledger.height()
    }

    async fn inject(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        let fault = lock(&self.faults).get(&endpoint).copied();
        match fault {
            Some(Fault::Unavailable) => Err(TransportError::Unavailable(format!(
                "{endpoint:?} endpoint is down"
            ))),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_proposal(
        &self,
        signed: &SignedProposal,
    ) -> Result<(Proposal, PublicKey), TransportError> {
        let proposal = signed.proposal().map_err(|e| malformed("proposal", e))?;
        let key = verify_creator(
            &proposal.header.creator,
            &signed.proposal_bytes,
            &signed.signature,
        )?;
        if !proposal.has_valid_tx_id() {
            return Err(TransportError::Protocol(format!(
                "transaction id {} does not match nonce and creator",
                proposal.tx_id()
            )));
        }
        if proposal.header.channel_id != self.channel {
            return Err(TransportError::Protocol(format!(
                "channel {} not found",
                proposal.header.channel_id
            )));
        }
        if proposal.header.chaincode != self.chaincode {
            return Err(TransportError::Protocol(format!(
                "chaincode {} is not installed",
                proposal.header.chaincode
            )));
        }
        Ok((proposal, key))
    }

    /// Simulate a proposal against committed state.
    fn simulate(&self, proposal: &Proposal) -> Result<(Vec<u8>, ReadWriteSet), TransportError> {
        let state = lock(&self.state);
        let mut simulator = state
            .ledger
            .simulate(proposal.tx_id(), proposal.header.timestamp);
        let result = AccountContract::invoke(&mut simulator, &proposal.function, &proposal.args)
            .map_err(|e| TransportError::Rejected(e.to_wire()))?;
        Ok((result, simulator.into_rwset()))
    }
}

impl LedgerTransport for InProcessLedger {
    fn evaluate(&self, signed: SignedProposal) -> TransportFuture<'_, Vec<u8>> {
        Box::pin(async move {
            self.inject(Endpoint::Evaluate).await?;
            let (proposal, _) = self.check_proposal(&signed)?;
            let (result, _) = self.simulate(&proposal)?;
            Ok(result)
        })
    }

    fn endorse(&self, signed: SignedProposal) -> TransportFuture<'_, PreparedTransaction> {
        Box::pin(async move {
            self.inject(Endpoint::Endorse).await?;
            let (proposal, creator) = self.check_proposal(&signed)?;
            let (result, rwset) = self.simulate(&proposal)?;
            let tx_id = proposal.tx_id().to_string();
            lock(&self.state).endorsed.insert(
                tx_id.clone(),
                Endorsed {
                    rwset,
                    payload: signed.proposal_bytes.clone(),
                    creator,
                },
            );
            Ok(PreparedTransaction {
                tx_id,
                payload: signed.proposal_bytes,
                result,
            })
        })
    }

    fn submit(&self, envelope: SignedEnvelope) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.inject(Endpoint::Submit).await?;
            let mut state = lock(&self.state);
            let endorsed = state.endorsed.remove(&envelope.tx_id).ok_or_else(|| {
                TransportError::Protocol(format!("transaction {} was not endorsed", envelope.tx_id))
            })?;
            if endorsed.payload != envelope.payload
                || !verify_message(&endorsed.creator, &envelope.payload, &envelope.signature)
            {
                return Err(access_denied("envelope signature verification failed"));
            }

            let keys: Vec<String> = endorsed.rwset.written_keys().map(str::to_owned).collect();
            let validation_code = state.ledger.commit(endorsed.rwset);
            let block_number = state.ledger.height();
            tracing::debug!(
                tx_id = %envelope.tx_id,
                block_number,
                %validation_code,
                ?keys,
                "Committed"
            );
            state.statuses.insert(
                envelope.tx_id,
                CommitStatus {
                    block_number,
                    validation_code,
                },
            );
            Ok(())
        })
    }

    fn commit_status(
        &self,
        signed: SignedCommitStatusRequest,
    ) -> TransportFuture<'_, CommitStatus> {
        Box::pin(async move {
            self.inject(Endpoint::CommitStatus).await?;
            let request = signed
                .request()
                .map_err(|e| malformed("commit status request", e))?;
            verify_creator(&request.identity, &signed.request_bytes, &signed.signature)?;
            lock(&self.state)
                .statuses
                .get(&request.tx_id)
                .copied()
                .ok_or_else(|| {
                    TransportError::Protocol(format!("transaction {} is unknown", request.tx_id))
                })
        })
    }
}
