//! Account registry — ledger-resident contract for dealer accounts.
//!
//! Each account lives under its MSISDN. The contract enforces the
//! existence rules of the CRUD operations (create only when absent, update and
//! delete only when present) and rebuilds per-key change history from the
//! ledger's append-only log.
//!
//! Existence checks are plain reads in the same simulation as the write.
//! Two concurrent transactions on one key can both pass the check; the
//! ledger's multi-version concurrency control invalidates the later one at
//! commit, so the contract takes no locks of its own.

#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod stub;
mod types;

pub use stub::{ChaincodeStub, KeyModification, KeyValue, StubError, ValidationCode};
pub use types::{parse_amount, Account, ContractError, ErrorKind, HistoryRecord, ACCOUNT_ARG_COUNT};

pub const CREATE_ASSET: &str = "CreateAsset";
pub const READ_ASSET: &str = "ReadAsset";
pub const UPDATE_ASSET: &str = "UpdateAsset";
pub const DELETE_ASSET: &str = "DeleteAsset";
pub const GET_ALL_ASSETS: &str = "GetAllAssets";
pub const GET_ASSET_HISTORY: &str = "GetAssetHistory";

pub struct AccountContract;

impl AccountContract {
    /// Transaction entry point: route `function` with its positional `args`.
    ///
    /// Returns the JSON-encoded result, or an empty payload for operations
    /// that return nothing.
    pub fn invoke(
        stub: &mut impl ChaincodeStub,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>, ContractError> {
        tracing::debug!(tx_id = stub.tx_id(), function, args = args.len(), "Invoking");

        match function {
            CREATE_ASSET => {
                Self::create_asset(stub, args)?;
                Ok(Vec::new())
            }
            UPDATE_ASSET => {
                Self::update_asset(stub, args)?;
                Ok(Vec::new())
            }
            READ_ASSET => {
                let [msisdn] = expect_args::<1>(function, args)?;
                encode(&Self::read_asset(stub, msisdn)?)
            }
            DELETE_ASSET => {
                let [msisdn] = expect_args::<1>(function, args)?;
                Self::delete_asset(stub, msisdn)?;
                Ok(Vec::new())
            }
            GET_ALL_ASSETS => {
                expect_args::<0>(function, args)?;
                encode(&Self::get_all_assets(stub)?)
            }
            GET_ASSET_HISTORY => {
                let [msisdn] = expect_args::<1>(function, args)?;
                encode(&Self::get_asset_history(stub, msisdn)?)
            }
            other => Err(ContractError::UnknownFunction(other.to_string())),
        }
    }

    /// `args`: `dealerID, msisdn, mpin, balance, status, transAmount, transType, remarks`.
    ///
    /// The existence check runs before the amounts are parsed.
    pub fn create_asset(
        stub: &mut impl ChaincodeStub,
        args: &[String],
    ) -> Result<(), ContractError> {
        let fields = expect_args::<ACCOUNT_ARG_COUNT>(CREATE_ASSET, args)?;
        let msisdn = fields[1];
        if Self::asset_exists(stub, msisdn)? {
            return Err(ContractError::AlreadyExists(msisdn.to_string()));
        }
        let account = Account::from_args(CREATE_ASSET, args)?;
        Self::put_account(stub, &account)
    }

    pub fn read_asset(
        stub: &mut impl ChaincodeStub,
        msisdn: &str,
    ) -> Result<Account, ContractError> {
        let raw = stub
            .get_state(msisdn)?
            .ok_or_else(|| ContractError::NotFound(msisdn.to_string()))?;
        decode(&raw)
    }

    /// Full overwrite: every field of the stored record is replaced, so
    /// callers resupply unchanged fields too.
    pub fn update_asset(
        stub: &mut impl ChaincodeStub,
        args: &[String],
    ) -> Result<(), ContractError> {
        let fields = expect_args::<ACCOUNT_ARG_COUNT>(UPDATE_ASSET, args)?;
        let msisdn = fields[1];
        if !Self::asset_exists(stub, msisdn)? {
            return Err(ContractError::NotFound(msisdn.to_string()));
        }
        let account = Account::from_args(UPDATE_ASSET, args)?;
        Self::put_account(stub, &account)
    }

    pub fn delete_asset(stub: &mut impl ChaincodeStub, msisdn: &str) -> Result<(), ContractError> {
        if !Self::asset_exists(stub, msisdn)? {
            return Err(ContractError::NotFound(msisdn.to_string()));
        }
        stub.del_state(msisdn)?;
        Ok(())
    }

    pub fn get_all_assets(stub: &mut impl ChaincodeStub) -> Result<Vec<Account>, ContractError> {
        stub.get_state_by_range("", "")?
            .iter()
            .map(|kv| decode(&kv.value))
            .collect()
    }

    pub fn get_asset_history(
        stub: &mut impl ChaincodeStub,
        msisdn: &str,
    ) -> Result<Vec<HistoryRecord>, ContractError> {
        stub.get_history_for_key(msisdn)?
            .into_iter()
            .map(|modification| {
                let value = if modification.is_delete || modification.value.is_empty() {
                    None
                } else {
                    Some(decode(&modification.value)?)
                };
                Ok(HistoryRecord {
                    tx_id: modification.tx_id,
                    value,
                    is_delete: modification.is_delete,
                    timestamp: modification.timestamp,
                })
            })
            .collect()
    }

    fn asset_exists(stub: &mut impl ChaincodeStub, msisdn: &str) -> Result<bool, ContractError> {
        Ok(stub.get_state(msisdn)?.is_some())
    }

    fn put_account(stub: &mut impl ChaincodeStub, account: &Account) -> Result<(), ContractError> {
        let raw = encode(account)?;
        stub.put_state(&account.msisdn, raw)?;
        Ok(())
    }
}

fn expect_args<'a, const N: usize>(
    function: &str,
    args: &'a [String],
) -> Result<[&'a str; N], ContractError> {
    let exact: &[String; N] = args.try_into().map_err(|_| ContractError::IncorrectArgs {
        function: function.to_string(),
        expected: N,
        got: args.len(),
    })?;
    Ok(exact.each_ref().map(String::as_str))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ContractError> {
    serde_json::to_vec(value).map_err(|e| ContractError::Decode(e.to_string()))
}

fn decode(raw: &[u8]) -> Result<Account, ContractError> {
    serde_json::from_slice(raw).map_err(|e| ContractError::Decode(e.to_string()))
}
