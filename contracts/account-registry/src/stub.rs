//! Ledger access seen from inside the contract.
//!
//! The contract never talks to the world state directly. It runs against a
//! [`ChaincodeStub`] that the peer hands it for the duration of one
//! transaction simulation: reads observe the committed state, writes are
//! buffered into the transaction's write set and only become visible once the
//! ledger commits the transaction as [`ValidationCode::Valid`].

use serde::{Deserialize, Serialize};

/// A live key/value pair returned by a range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// One committed write to a key, as returned by the history iterator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyModification {
    pub tx_id: String,
    /// Value written by the transaction; empty for deletions.
    pub value: Vec<u8>,
    pub is_delete: bool,
    /// Transaction timestamp, seconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StubError {
    #[error("key must not be an empty string")]
    EmptyKey,
    #[error("ledger access failed: {0}")]
    Ledger(String),
}

/// Per-transaction view of the ledger state.
pub trait ChaincodeStub {
    /// Identifier of the transaction being simulated.
    fn tx_id(&self) -> &str;

    /// Committed value for `key`, or `None` when the key is absent.
    fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, StubError>;

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), StubError>;

    fn del_state(&mut self, key: &str) -> Result<(), StubError>;

    /// Live keys in `[start, end)` in lexicographic order. An empty bound is
    /// open on that side.
    fn get_state_by_range(&mut self, start: &str, end: &str) -> Result<Vec<KeyValue>, StubError>;

    /// Every committed write to `key`, oldest first.
    fn get_history_for_key(&mut self, key: &str) -> Result<Vec<KeyModification>, StubError>;
}

/// Outcome the ledger assigns to a transaction when its block commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Valid,
    /// A key read during simulation changed version before commit.
    MvccReadConflict,
    PhantomReadConflict,
    EndorsementPolicyFailure,
    DuplicateTxid,
    BadProposalTxid,
    #[serde(other)]
    Other,
}

impl ValidationCode {
    pub fn is_valid(self) -> bool {
        matches!(self, ValidationCode::Valid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValidationCode::Valid => "VALID",
            ValidationCode::MvccReadConflict => "MVCC_READ_CONFLICT",
            ValidationCode::PhantomReadConflict => "PHANTOM_READ_CONFLICT",
            ValidationCode::EndorsementPolicyFailure => "ENDORSEMENT_POLICY_FAILURE",
            ValidationCode::DuplicateTxid => "DUPLICATE_TXID",
            ValidationCode::BadProposalTxid => "BAD_PROPOSAL_TXID",
            ValidationCode::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
