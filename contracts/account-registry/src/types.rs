use serde::{Deserialize, Serialize};

use crate::stub::StubError;

/// A dealer account record, keyed on the ledger by its MSISDN.
///
/// Field names on the wire are fixed by the existing API consumers.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    #[serde(rename = "DEALERID")]
    pub dealer_id: String,
    /// Subscriber identifier; also the ledger key.
    #[serde(rename = "MSISDN")]
    pub msisdn: String,
    #[serde(rename = "MPIN")]
    pub mpin: String,
    #[serde(rename = "BALANCE")]
    pub balance: i64,
    #[serde(rename = "STATUS")]
    pub status: String,
    #[serde(rename = "TRANSAMOUNT")]
    pub trans_amount: i64,
    #[serde(rename = "TRANSTYPE")]
    pub trans_type: String,
    #[serde(rename = "REMARKS")]
    pub remarks: String,
}

/// Number of positional arguments taken by `CreateAsset` / `UpdateAsset`.
pub const ACCOUNT_ARG_COUNT: usize = 8;

impl Account {
    /// Build an account from the positional transaction arguments
    /// `dealerID, msisdn, mpin, balance, status, transAmount, transType, remarks`.
    ///
    /// The two amounts arrive as base-10 text and must parse as `i64`.
    pub fn from_args(function: &str, args: &[String]) -> Result<Self, ContractError> {
        let [dealer_id, msisdn, mpin, balance, status, trans_amount, trans_type, remarks] = args
        else {
            return Err(ContractError::IncorrectArgs {
                function: function.to_string(),
                expected: ACCOUNT_ARG_COUNT,
                got: args.len(),
            });
        };

        Ok(Self {
            dealer_id: dealer_id.clone(),
            msisdn: msisdn.clone(),
            mpin: mpin.clone(),
            balance: parse_amount("BALANCE", balance)?,
            status: status.clone(),
            trans_amount: parse_amount("TRANSAMOUNT", trans_amount)?,
            trans_type: trans_type.clone(),
            remarks: remarks.clone(),
        })
    }

    /// Inverse of [`Account::from_args`]: the argument list a client sends.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.dealer_id.clone(),
            self.msisdn.clone(),
            self.mpin.clone(),
            self.balance.to_string(),
            self.status.clone(),
            self.trans_amount.to_string(),
            self.trans_type.clone(),
            self.remarks.clone(),
        ]
    }
}

/// Parse a decimal amount. No sign or range rules beyond fitting in `i64`.
pub fn parse_amount(field: &'static str, value: &str) -> Result<i64, ContractError> {
    value.parse::<i64>().map_err(|_| ContractError::InvalidAmount {
        field,
        value: value.to_string(),
    })
}

/// One entry of an account's change history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryRecord {
    #[serde(rename = "txId")]
    pub tx_id: String,
    /// Snapshot after the write; absent for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Account>,
    #[serde(rename = "isDelete")]
    pub is_delete: bool,
    /// Commit timestamp in seconds.
    pub timestamp: i64,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("the asset {0} already exists")]
    AlreadyExists(String),
    #[error("the asset {0} does not exist")]
    NotFound(String),
    #[error("{field} must be a base-10 64-bit integer, got {value:?}")]
    InvalidAmount { field: &'static str, value: String },
    #[error("{function} expects {expected} arguments, got {got}")]
    IncorrectArgs {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("invalid record encoding: {0}")]
    Decode(String),
    #[error(transparent)]
    Ledger(#[from] StubError),
}

/// Coarse classification of a contract failure, stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    InvalidAmount,
    InvalidArgument,
    Internal,
}

impl ErrorKind {
    const ALL: [ErrorKind; 5] = [
        ErrorKind::AlreadyExists,
        ErrorKind::NotFound,
        ErrorKind::InvalidAmount,
        ErrorKind::InvalidArgument,
        ErrorKind::Internal,
    ];

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidAmount => "INVALID_AMOUNT",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Recover the kind from a message produced by [`ContractError::to_wire`].
    ///
    /// Returns `None` for messages that did not originate from this contract.
    pub fn from_wire(message: &str) -> Option<Self> {
        let (code, _) = message.split_once(": ")?;
        Self::from_code(code.trim())
    }

    /// Client-side mistake (bad input or state precondition) rather than a fault.
    pub fn is_client_error(self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }
}

impl ContractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContractError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ContractError::NotFound(_) => ErrorKind::NotFound,
            ContractError::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            ContractError::IncorrectArgs { .. } | ContractError::UnknownFunction(_) => {
                ErrorKind::InvalidArgument
            }
            ContractError::Ledger(StubError::EmptyKey) => ErrorKind::InvalidArgument,
            ContractError::Decode(_) | ContractError::Ledger(_) => ErrorKind::Internal,
        }
    }

    /// Message returned to the peer: `"<CODE>: <description>"`.
    pub fn to_wire(&self) -> String {
        format!("{}: {self}", self.kind().code())
    }
}
