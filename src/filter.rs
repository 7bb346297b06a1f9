use std::collections::HashSet;

use crate::models::LedgerBatch;

/// Allow-list of contract ids, stored as lowercase hex.
#[derive(Clone, Debug, Default)]
pub struct ContractFilter {
    contracts: HashSet<String>,
}

impl ContractFilter {
    /// Entries may be hex contract ids or `C...` strkeys.
    pub fn new<I, S>(contracts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let contracts = contracts
            .into_iter()
            .map(|contract| normalize(contract.as_ref()))
            .filter(|contract| !contract.is_empty())
            .collect();

        Self { contracts }
    }

    /// Whether any contract is configured at all.
    pub fn is_active(&self) -> bool {
        !self.contracts.is_empty()
    }

    /// An empty address never identifies a contract and is always rejected.
    pub fn is_allowed(&self, address: &str) -> bool {
        if address.is_empty() {
            return false;
        }

        !self.is_active() || self.contracts.contains(&normalize(address))
    }

    /// Whether a record touching `address` (if any) is kept. Without a
    /// configured allow-list every record is kept.
    pub fn retains(&self, address: Option<&str>) -> bool {
        if !self.is_active() {
            return true;
        }

        address.map_or(false, |address| self.is_allowed(address))
    }

    /// Drops the operations and events of `batch` that touch no allowed
    /// contract. Ledger and transactions are kept as they are.
    pub fn apply(&self, batch: &mut LedgerBatch) {
        if !self.is_active() {
            return;
        }

        batch.operations.retain(|op| self.retains(op.contract_id.as_deref()));
        batch.events.retain(|event| self.retains(event.contract_id.as_deref()));
    }
}

fn normalize(contract: &str) -> String {
    let contract = contract.trim();
    match stellar_strkey::Contract::from_string(contract) {
        Ok(strkey) => hex::encode(strkey.0),
        Err(_) => contract.to_ascii_lowercase(),
    }
}
