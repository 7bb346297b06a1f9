//! Records produced from one ledger and the live message envelope.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// One closed ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub sequence: u32,
    pub hash: String,
    pub previous_hash: String,
    pub transaction_count: u32,
    pub operation_count: u32,
    pub closed_at: DateTime<Utc>,
    pub total_coins: i64,
    pub fee_pool: i64,
    pub base_fee: u32,
    pub base_reserve: u32,
    pub max_tx_set_size: u32,
    pub protocol_version: u32,
}

/// One transaction, `id` is `{ledger}-{index}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub hash: String,
    pub ledger: u32,
    /// 1-based position in the ledger's application order.
    pub index: u32,
    pub source_account: String,
    pub fee_paid: i64,
    pub operation_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memo_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memo_value: String,
    pub successful: bool,

    #[serde(skip)]
    pub envelope_xdr: Vec<u8>,
    #[serde(skip)]
    pub result_xdr: Vec<u8>,
    #[serde(skip)]
    pub result_meta_xdr: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    CreateAccount,
    Payment,
    ManageSellOffer,
    CreatePassiveSellOffer,
    SetOptions,
    ChangeTrust,
    AllowTrust,
    AccountMerge,
    ManageData,
    InvokeHostFunction,
    ExtendFootprintTtl,
    RestoreFootprint,
    /// Any other operation, carrying the XDR variant name.
    Other(&'static str),
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::CreateAccount => "create_account",
            OperationType::Payment => "payment",
            OperationType::ManageSellOffer => "manage_sell_offer",
            OperationType::CreatePassiveSellOffer => "create_passive_sell_offer",
            OperationType::SetOptions => "set_options",
            OperationType::ChangeTrust => "change_trust",
            OperationType::AllowTrust => "allow_trust",
            OperationType::AccountMerge => "account_merge",
            OperationType::ManageData => "manage_data",
            OperationType::InvokeHostFunction => "invoke_host_function",
            OperationType::ExtendFootprintTtl => "extend_footprint_ttl",
            OperationType::RestoreFootprint => "restore_footprint",
            OperationType::Other(name) => *name,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OperationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One operation, `id` is `{transaction_id}-{index}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Operation {
    pub id: String,
    pub transaction_id: String,
    pub index: u32,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Falls back to the transaction's source when the operation has none.
    pub source_account: String,
    /// Hex id of the contract an `invoke_host_function` calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    pub details: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Contract,
    System,
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Contract => "contract",
            EventType::System => "system",
            EventType::Unknown => "unknown",
        }
    }
}

/// One Soroban event, `id` is `{transaction_hash}-{event_index}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractEvent {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    pub ledger: u32,
    pub transaction_hash: String,
    pub event_type: EventType,
    pub topics: Vec<String>,
    pub data: Value,
    pub in_successful_tx: bool,
}

/// The single resumable checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionState {
    pub last_ledger: u32,
    pub updated_at: DateTime<Utc>,
}

/// Everything persisted for one ledger, in one atomic unit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LedgerBatch {
    pub ledger: Ledger,
    /// Ordered by `index`.
    pub transactions: Vec<Transaction>,
    pub operations: Vec<Operation>,
    pub events: Vec<ContractEvent>,
}

impl LedgerBatch {
    pub fn sequence(&self) -> u32 {
        self.ledger.sequence
    }

    /// Live messages for this batch: the ledger, then each transaction
    /// followed by its events.
    pub fn live_messages(&self) -> Vec<LiveMessage> {
        let mut messages = Vec::with_capacity(1 + self.transactions.len() + self.events.len());
        messages.push(LiveMessage::Ledger(self.ledger.clone()));

        for tx in &self.transactions {
            messages.push(LiveMessage::Transaction(tx.clone()));
            messages.extend(
                self.events
                    .iter()
                    .filter(|event| event.transaction_hash == tx.hash)
                    .cloned()
                    .map(LiveMessage::ContractEvent),
            );
        }

        messages
    }
}

/// Payload pushed to live subscribers, serialized as
/// `{"type": "...", "data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LiveMessage {
    Ledger(Ledger),
    Transaction(Transaction),
    ContractEvent(ContractEvent),
}
