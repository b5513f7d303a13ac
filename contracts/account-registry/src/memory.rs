//! In-memory ledger with multi-version concurrency control.
//!
//! Transactions run in two steps like on a real peer:
//!
//! 1. [`MemoryLedger::simulate`] hands out a [`TxSimulator`] that reads the
//!    committed state and records the version of every key it reads, while
//!    buffering writes into a [`ReadWriteSet`].
//! 2. [`MemoryLedger::commit`] re-checks every recorded read version against
//!    the current state. A stale read marks the transaction
//!    [`ValidationCode::MvccReadConflict`] and its writes are dropped.
//!
//! Two creates of the same key simulated against the same state therefore
//! both pass the contract's existence check, and only the first to commit
//! takes effect.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use crate::stub::{ChaincodeStub, KeyModification, KeyValue, StubError, ValidationCode};
use crate::{AccountContract, ContractError};

/// Height at which a key was last written: block number and index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub block: u64,
    pub tx_num: u64,
}

#[derive(Debug, Clone)]
struct VersionedValue {
    value: Vec<u8>,
    version: Version,
}

/// Reads and buffered writes of one simulated transaction.
#[derive(Debug, Clone)]
pub struct ReadWriteSet {
    pub tx_id: String,
    pub timestamp: i64,
    /// Version observed for each key read; `None` when the key was absent.
    reads: BTreeMap<String, Option<Version>>,
    /// Pending value per key; `None` is a delete.
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl ReadWriteSet {
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn written_keys(&self) -> impl Iterator<Item = &str> {
        self.writes.keys().map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: BTreeMap<String, VersionedValue>,
    history: HashMap<String, Vec<KeyModification>>,
    committed_tx_ids: HashSet<String>,
    height: u64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed blocks. Every commit, valid or not, adds one.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Committed value of `key`, bypassing any simulation.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.state.get(key).map(|v| v.value.as_slice())
    }

    pub fn simulate(&self, tx_id: impl Into<String>, timestamp: i64) -> TxSimulator<'_> {
        TxSimulator {
            ledger: self,
            rwset: ReadWriteSet {
                tx_id: tx_id.into(),
                timestamp,
                reads: BTreeMap::new(),
                writes: BTreeMap::new(),
            },
        }
    }

    /// Validate and apply a transaction in a block of its own.
    pub fn commit(&mut self, rwset: ReadWriteSet) -> ValidationCode {
        self.height += 1;

        if !self.committed_tx_ids.insert(rwset.tx_id.clone()) {
            tracing::debug!(tx_id = %rwset.tx_id, "Duplicate transaction id");
            return ValidationCode::DuplicateTxid;
        }

        for (key, read_version) in &rwset.reads {
            let current = self.state.get(key).map(|v| v.version);
            if current != *read_version {
                tracing::debug!(
                    tx_id = %rwset.tx_id,
                    key = %key,
                    ?read_version,
                    ?current,
                    "Read version is stale"
                );
                return ValidationCode::MvccReadConflict;
            }
        }

        let version = Version {
            block: self.height,
            tx_num: 0,
        };
        for (key, write) in rwset.writes {
            let is_delete = write.is_none();
            let value = write.unwrap_or_default();
            self.history.entry(key.clone()).or_default().push(KeyModification {
                tx_id: rwset.tx_id.clone(),
                value: value.clone(),
                is_delete,
                timestamp: rwset.timestamp,
            });
            if is_delete {
                self.state.remove(&key);
            } else {
                self.state.insert(key, VersionedValue { value, version });
            }
        }

        ValidationCode::Valid
    }

    /// Simulate `function` through the account contract and, when it
    /// succeeds, commit the result immediately.
    pub fn execute(
        &mut self,
        tx_id: impl Into<String>,
        timestamp: i64,
        function: &str,
        args: &[String],
    ) -> Result<(Vec<u8>, ValidationCode), ContractError> {
        let mut simulator = self.simulate(tx_id, timestamp);
        let payload = AccountContract::invoke(&mut simulator, function, args)?;
        let rwset = simulator.into_rwset();
        Ok((payload, self.commit(rwset)))
    }
}

/// [`ChaincodeStub`] over a [`MemoryLedger`] snapshot.
///
/// Reads never observe the transaction's own pending writes.
pub struct TxSimulator<'a> {
    ledger: &'a MemoryLedger,
    rwset: ReadWriteSet,
}

impl TxSimulator<'_> {
    pub fn into_rwset(self) -> ReadWriteSet {
        self.rwset
    }

    fn record_read(&mut self, key: &str) -> Option<&VersionedValue> {
        let entry = self.ledger.state.get(key);
        self.rwset
            .reads
            .entry(key.to_string())
            .or_insert_with(|| entry.map(|v| v.version));
        entry
    }
}

fn check_key(key: &str) -> Result<(), StubError> {
    if key.is_empty() {
        return Err(StubError::EmptyKey);
    }
    Ok(())
}

impl ChaincodeStub for TxSimulator<'_> {
    fn tx_id(&self) -> &str {
        &self.rwset.tx_id
    }

    fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, StubError> {
        check_key(key)?;
        Ok(self.record_read(key).map(|v| v.value.clone()))
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), StubError> {
        check_key(key)?;
        self.rwset.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    fn del_state(&mut self, key: &str) -> Result<(), StubError> {
        check_key(key)?;
        self.rwset.writes.insert(key.to_string(), None);
        Ok(())
    }

    fn get_state_by_range(&mut self, start: &str, end: &str) -> Result<Vec<KeyValue>, StubError> {
        let lower = if start.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(start)
        };
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };

        let ledger = self.ledger;
        let mut out = Vec::new();
        for (key, entry) in ledger.state.range::<str, _>((lower, upper)) {
            self.rwset
                .reads
                .entry(key.clone())
                .or_insert(Some(entry.version));
            out.push(KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
            });
        }
        Ok(out)
    }

    fn get_history_for_key(&mut self, key: &str) -> Result<Vec<KeyModification>, StubError> {
        check_key(key)?;
        Ok(self.ledger.history.get(key).cloned().unwrap_or_default())
    }
}
