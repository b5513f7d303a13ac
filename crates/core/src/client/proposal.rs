//! Wire messages exchanged with the ledger gateway.
//!
//! Every request carries its serialized bytes next to a signature over
//! `SHA-256(bytes)`, so the receiving peer verifies exactly what was signed
//! and never a re-serialization of it.

use account_registry::ValidationCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::identity::{IdentityError, SerializedIdentity, SigningIdentity};

/// Length of the random per-proposal nonce.
pub const NONCE_LEN: usize = 24;

/// `hex(SHA-256(nonce || creator))`.
pub fn transaction_id(nonce: &[u8], creator: &SerializedIdentity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(creator.to_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProposalHeader {
    pub channel_id: String,
    pub chaincode: String,
    pub tx_id: String,
    #[serde(with = "hex::serde")]
    pub nonce: Vec<u8>,
    pub creator: SerializedIdentity,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

/// A request to run one contract function.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub header: ProposalHeader,
    pub function: String,
    pub args: Vec<String>,
}

impl Proposal {
    pub fn new(
        channel_id: &str,
        chaincode: &str,
        creator: SerializedIdentity,
        function: &str,
        args: &[String],
    ) -> Self {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let tx_id = transaction_id(&nonce, &creator);
        Self {
            header: ProposalHeader {
                channel_id: channel_id.to_string(),
                chaincode: chaincode.to_string(),
                tx_id,
                nonce: nonce.to_vec(),
                creator,
                timestamp: chrono::Utc::now().timestamp(),
            },
            function: function.to_string(),
            args: args.to_vec(),
        }
    }

    pub fn tx_id(&self) -> &str {
        &self.header.tx_id
    }

    /// Whether the transaction id is the one derived from nonce and creator.
    pub fn has_valid_tx_id(&self) -> bool {
        self.header.tx_id == transaction_id(&self.header.nonce, &self.header.creator)
    }

    pub fn sign(&self, signer: &SigningIdentity) -> Result<SignedProposal, SignError> {
        let proposal_bytes = serde_json::to_vec(self)?;
        let signature = signer.sign_message(&proposal_bytes)?;
        Ok(SignedProposal {
            proposal_bytes,
            signature,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("failed to serialize request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedProposal {
    #[serde(with = "hex::serde")]
    pub proposal_bytes: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl SignedProposal {
    pub fn proposal(&self) -> Result<Proposal, serde_json::Error> {
        serde_json::from_slice(&self.proposal_bytes)
    }
}

/// An endorsed transaction, ready to be signed and sent for ordering.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PreparedTransaction {
    pub tx_id: String,
    /// Opaque transaction payload the client signs.
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    /// The contract's return value from endorsement.
    #[serde(with = "hex::serde")]
    pub result: Vec<u8>,
}

impl PreparedTransaction {
    pub fn sign(&self, signer: &SigningIdentity) -> Result<SignedEnvelope, IdentityError> {
        Ok(SignedEnvelope {
            tx_id: self.tx_id.clone(),
            signature: signer.sign_message(&self.payload)?,
            payload: self.payload.clone(),
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub tx_id: String,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CommitStatusRequest {
    pub channel_id: String,
    pub tx_id: String,
    pub identity: SerializedIdentity,
}

impl CommitStatusRequest {
    pub fn sign(&self, signer: &SigningIdentity) -> Result<SignedCommitStatusRequest, SignError> {
        let request_bytes = serde_json::to_vec(self)?;
        let signature = signer.sign_message(&request_bytes)?;
        Ok(SignedCommitStatusRequest {
            request_bytes,
            signature,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedCommitStatusRequest {
    #[serde(with = "hex::serde")]
    pub request_bytes: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl SignedCommitStatusRequest {
    pub fn request(&self) -> Result<CommitStatusRequest, serde_json::Error> {
        serde_json::from_slice(&self.request_bytes)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitStatus {
    pub block_number: u64,
    pub validation_code: ValidationCode,
}
