//! Turns one `LedgerCloseMeta` into the records of a [`LedgerBatch`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{self as xdr, Limits, WriteXdr};

use crate::models::{ContractEvent, EventType, Ledger, LedgerBatch, Operation, OperationType, Transaction};
use crate::reader::{LedgerCloseMetaReader, ReaderError};
use crate::scval::{scval_to_json, scval_to_string};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("no envelope in the tx set for transaction {0}")]
    MissingEnvelope(String),

    #[error("cannot encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },
}

/// sha256 of a network passphrase, the domain separator of transaction hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkId(pub [u8; 32]);

impl NetworkId {
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self(Sha256::digest(passphrase.as_bytes()).into())
    }
}

/// Hash of `envelope` on `network`. V0 envelopes hash in their V1 form.
pub fn transaction_hash(envelope: &xdr::TransactionEnvelope, network: &NetworkId) -> Result<[u8; 32], ExtractError> {
    let tagged_transaction = match envelope {
        xdr::TransactionEnvelope::TxV0(v0) => {
            xdr::TransactionSignaturePayloadTaggedTransaction::Tx(v0_as_v1(&v0.tx))
        }
        xdr::TransactionEnvelope::Tx(v1) => xdr::TransactionSignaturePayloadTaggedTransaction::Tx(v1.tx.clone()),
        xdr::TransactionEnvelope::TxFeeBump(fee_bump) => {
            xdr::TransactionSignaturePayloadTaggedTransaction::TxFeeBump(fee_bump.tx.clone())
        }
    };

    let payload = xdr::TransactionSignaturePayload { network_id: xdr::Hash(network.0), tagged_transaction };
    let bytes = encode("transaction signature payload", &payload)?;

    Ok(Sha256::digest(bytes).into())
}

fn v0_as_v1(tx: &xdr::TransactionV0) -> xdr::Transaction {
    xdr::Transaction {
        source_account: xdr::MuxedAccount::Ed25519(tx.source_account_ed25519.clone()),
        fee: tx.fee,
        seq_num: tx.seq_num.clone(),
        cond: match &tx.time_bounds {
            Some(time_bounds) => xdr::Preconditions::Time(time_bounds.clone()),
            None => xdr::Preconditions::None,
        },
        memo: tx.memo.clone(),
        operations: tx.operations.clone(),
        ext: xdr::TransactionExt::V0,
    }
}

fn encode<T: WriteXdr>(what: &'static str, value: &T) -> Result<Vec<u8>, ExtractError> {
    value
        .to_xdr(Limits::none())
        .map_err(|err| ExtractError::Encode { what, reason: err.to_string() })
}

/// `G...` address of an ed25519 key.
pub fn ed25519_address(key: &xdr::Uint256) -> String {
    stellar_strkey::ed25519::PublicKey(key.0).to_string()
}

/// Muxed accounts are reduced to their underlying `G...` account.
pub fn muxed_address(account: &xdr::MuxedAccount) -> String {
    match account {
        xdr::MuxedAccount::Ed25519(key) => ed25519_address(key),
        xdr::MuxedAccount::MuxedEd25519(muxed) => ed25519_address(&muxed.ed25519),
    }
}

pub fn account_address(account: &xdr::AccountId) -> String {
    match &account.0 {
        xdr::PublicKey::PublicKeyTypeEd25519(key) => ed25519_address(key),
    }
}

/// Hex id of the contract a host function invokes, if it invokes one.
pub fn invoked_contract(host_function: &xdr::HostFunction) -> Option<String> {
    match host_function {
        xdr::HostFunction::InvokeContract(args) => contract_address_hex(&args.contract_address),
        _ => None,
    }
}

fn contract_address_hex(address: &xdr::ScAddress) -> Option<String> {
    match address {
        xdr::ScAddress::Contract(hash) => Some(hex::encode(hash.0)),
        _ => None,
    }
}

/// The fields of an envelope that describe the transaction itself. Fee
/// bumps are described by their inner transaction.
struct EnvelopeView<'a> {
    source_account: String,
    fee: u32,
    memo: &'a xdr::Memo,
    operations: &'a [xdr::Operation],
}

impl<'a> EnvelopeView<'a> {
    fn new(envelope: &'a xdr::TransactionEnvelope) -> Self {
        match envelope {
            xdr::TransactionEnvelope::TxV0(v0) => Self {
                source_account: ed25519_address(&v0.tx.source_account_ed25519),
                fee: v0.tx.fee,
                memo: &v0.tx.memo,
                operations: v0.tx.operations.as_slice(),
            },
            xdr::TransactionEnvelope::Tx(v1) => Self::from_v1(v1),
            xdr::TransactionEnvelope::TxFeeBump(fee_bump) => match &fee_bump.tx.inner_tx {
                xdr::FeeBumpTransactionInnerTx::Tx(inner) => Self::from_v1(inner),
            },
        }
    }

    fn from_v1(v1: &'a xdr::TransactionV1Envelope) -> Self {
        Self {
            source_account: muxed_address(&v1.tx.source_account),
            fee: v1.tx.fee,
            memo: &v1.tx.memo,
            operations: v1.tx.operations.as_slice(),
        }
    }
}

fn decode_memo(memo: &xdr::Memo) -> (String, String) {
    match memo {
        xdr::Memo::None => (String::new(), String::new()),
        xdr::Memo::Text(text) => ("text".to_string(), String::from_utf8_lossy(text.as_slice()).into_owned()),
        xdr::Memo::Id(id) => ("id".to_string(), id.to_string()),
        xdr::Memo::Hash(hash) => ("hash".to_string(), hex::encode(hash.0)),
        xdr::Memo::Return(hash) => ("return".to_string(), hex::encode(hash.0)),
    }
}

fn is_successful(result: &xdr::TransactionResult) -> bool {
    matches!(
        result.result,
        xdr::TransactionResultResult::TxSuccess(_) | xdr::TransactionResultResult::TxFeeBumpInnerSuccess(_)
    )
}

fn close_time(seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
        .unwrap_or_default()
}

/// Type tag, details and invoked contract of one operation. Operations
/// without modelled details carry an empty object.
fn describe_operation(body: &xdr::OperationBody) -> (OperationType, Value, Option<String>) {
    match body {
        xdr::OperationBody::CreateAccount(op) => (
            OperationType::CreateAccount,
            json!({
                "destination": account_address(&op.destination),
                "starting_balance": op.starting_balance,
            }),
            None,
        ),
        xdr::OperationBody::Payment(op) => (
            OperationType::Payment,
            json!({
                "destination": muxed_address(&op.destination),
                "amount": op.amount,
            }),
            None,
        ),
        xdr::OperationBody::ManageSellOffer(op) => {
            (OperationType::ManageSellOffer, json!({ "amount": op.amount }), None)
        }
        xdr::OperationBody::CreatePassiveSellOffer(op) => {
            (OperationType::CreatePassiveSellOffer, json!({ "amount": op.amount }), None)
        }
        xdr::OperationBody::SetOptions(_) => (OperationType::SetOptions, json!({}), None),
        xdr::OperationBody::ChangeTrust(_) => (OperationType::ChangeTrust, json!({}), None),
        xdr::OperationBody::AllowTrust(_) => (OperationType::AllowTrust, json!({}), None),
        xdr::OperationBody::AccountMerge(_) => (OperationType::AccountMerge, json!({}), None),
        xdr::OperationBody::ManageData(_) => (OperationType::ManageData, json!({}), None),
        xdr::OperationBody::InvokeHostFunction(op) => {
            let contract_id = invoked_contract(&op.host_function);
            let mut details = json!({ "function_type": op.host_function.name() });
            if let xdr::HostFunction::InvokeContract(args) = &op.host_function {
                let function = String::from_utf8_lossy(args.function_name.0.as_slice()).into_owned();
                details["function"] = Value::String(function);
                if let Some(contract_id) = &contract_id {
                    details["contract_id"] = Value::String(contract_id.clone());
                }
            }
            (OperationType::InvokeHostFunction, details, contract_id)
        }
        xdr::OperationBody::ExtendFootprintTtl(op) => {
            (OperationType::ExtendFootprintTtl, json!({ "extend_to": op.extend_to }), None)
        }
        xdr::OperationBody::RestoreFootprint(_) => (OperationType::RestoreFootprint, json!({}), None),
        other => (OperationType::Other(other.name()), json!({}), None),
    }
}

fn soroban_events(meta: &xdr::TransactionMeta) -> &[xdr::ContractEvent] {
    match meta {
        xdr::TransactionMeta::V3(v3) => v3
            .soroban_meta
            .as_ref()
            .map(|soroban| soroban.events.as_slice())
            .unwrap_or(&[]),
        _ => &[],
    }
}

fn event_record(ledger: u32, tx_hash: &str, index: usize, event: &xdr::ContractEvent) -> ContractEvent {
    let event_type = match event.type_ {
        xdr::ContractEventType::Contract => EventType::Contract,
        xdr::ContractEventType::System => EventType::System,
        _ => EventType::Unknown,
    };

    let (topics, data) = match &event.body {
        xdr::ContractEventBody::V0(body) => {
            (body.topics.iter().map(scval_to_string).collect(), scval_to_json(&body.data))
        }
    };

    ContractEvent {
        id: format!("{}-{}", tx_hash, index),
        contract_id: event.contract_id.as_ref().map(|id| hex::encode(id.0)),
        ledger,
        transaction_hash: tx_hash.to_string(),
        event_type,
        topics,
        data,
        in_successful_tx: true,
    }
}

/// Pure mapping from ledger close meta to records.
#[derive(Clone, Debug)]
pub struct LedgerExtractor {
    network: NetworkId,
}

impl LedgerExtractor {
    pub fn new(passphrase: &str) -> Self {
        Self { network: NetworkId::from_passphrase(passphrase) }
    }

    pub fn extract(&self, meta: &xdr::LedgerCloseMeta) -> Result<LedgerBatch, ExtractError> {
        let header_entry = LedgerCloseMetaReader::ledger_header(meta)?;
        let header = &header_entry.header;
        let sequence = header.ledger_seq;
        let closed_at = close_time(header.scp_value.close_time.0);

        let envelopes = LedgerCloseMetaReader::transaction_envelopes(meta)?;
        let results = LedgerCloseMetaReader::transaction_metas(meta)?;

        let mut by_hash = HashMap::with_capacity(envelopes.len());
        for envelope in &envelopes {
            by_hash.insert(transaction_hash(envelope, &self.network)?, *envelope);
        }

        let operation_count = envelopes
            .iter()
            .map(|envelope| EnvelopeView::new(envelope).operations.len() as u32)
            .sum();

        let mut batch = LedgerBatch {
            ledger: Ledger {
                sequence,
                hash: hex::encode(header_entry.hash.0),
                previous_hash: hex::encode(header.previous_ledger_hash.0),
                transaction_count: results.len() as u32,
                operation_count,
                closed_at,
                total_coins: header.total_coins,
                fee_pool: header.fee_pool,
                base_fee: header.base_fee,
                base_reserve: header.base_reserve,
                max_tx_set_size: header.max_tx_set_size,
                protocol_version: header.ledger_version,
            },
            transactions: Vec::with_capacity(results.len()),
            operations: Vec::new(),
            events: Vec::new(),
        };

        for (position, result_meta) in results.iter().enumerate() {
            let hash = result_meta.result.transaction_hash.0;
            let envelope = by_hash
                .get(&hash)
                .ok_or_else(|| ExtractError::MissingEnvelope(hex::encode(hash)))?;

            self.extract_transaction(&mut batch, position as u32 + 1, closed_at, envelope, result_meta)?;
        }

        Ok(batch)
    }

    fn extract_transaction(
        &self,
        batch: &mut LedgerBatch,
        index: u32,
        created_at: DateTime<Utc>,
        envelope: &xdr::TransactionEnvelope,
        result_meta: &xdr::TransactionResultMeta,
    ) -> Result<(), ExtractError> {
        let ledger = batch.ledger.sequence;
        let view = EnvelopeView::new(envelope);
        let hash = hex::encode(result_meta.result.transaction_hash.0);
        let successful = is_successful(&result_meta.result.result);
        let (memo_type, memo_value) = decode_memo(view.memo);

        let transaction = Transaction {
            id: format!("{}-{}", ledger, index),
            hash: hash.clone(),
            ledger,
            index,
            source_account: view.source_account.clone(),
            fee_paid: i64::from(view.fee),
            operation_count: view.operations.len() as u32,
            created_at,
            memo_type,
            memo_value,
            successful,
            envelope_xdr: encode("transaction envelope", envelope)?,
            result_xdr: encode("transaction result", &result_meta.result)?,
            result_meta_xdr: encode("transaction meta", &result_meta.tx_apply_processing)?,
        };

        for (op_index, op) in view.operations.iter().enumerate() {
            let (op_type, details, contract_id) = describe_operation(&op.body);
            batch.operations.push(Operation {
                id: format!("{}-{}", transaction.id, op_index),
                transaction_id: transaction.id.clone(),
                index: op_index as u32,
                op_type,
                source_account: op
                    .source_account
                    .as_ref()
                    .map(muxed_address)
                    .unwrap_or_else(|| view.source_account.clone()),
                contract_id,
                details,
            });
        }

        if successful {
            for (event_index, event) in soroban_events(&result_meta.tx_apply_processing).iter().enumerate() {
                batch.events.push(event_record(ledger, &hash, event_index, event));
            }
        }

        batch.transactions.push(transaction);
        Ok(())
    }
}
