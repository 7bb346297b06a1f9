//! Builders for synthetic ledgers used across the unit tests.

use stellar_xdr::curr::{self as xdr, Limits, VecM, WriteXdr};

use crate::extractor::{transaction_hash, NetworkId};

pub const TEST_PASSPHRASE: &str = "Test SDF Network ; September 2015";

pub fn sym(s: &str) -> xdr::ScVal {
    xdr::ScVal::Symbol(xdr::ScSymbol(s.try_into().unwrap()))
}

fn muxed(seed: u8) -> xdr::MuxedAccount {
    xdr::MuxedAccount::Ed25519(xdr::Uint256([seed; 32]))
}

/// One transaction of a synthetic ledger, sourced by the account `[seed; 32]`.
#[derive(Clone)]
pub struct TxBuilder {
    seed: u8,
    memo: xdr::Memo,
    operations: Vec<xdr::Operation>,
    events: Vec<xdr::ContractEvent>,
    failed: bool,
    fee_source: Option<u8>,
    legacy: bool,
    soroban: bool,
}

impl TxBuilder {
    pub fn new(seed: u8) -> Self {
        Self {
            seed,
            memo: xdr::Memo::None,
            operations: Vec::new(),
            events: Vec::new(),
            failed: false,
            fee_source: None,
            legacy: false,
            soroban: false,
        }
    }

    pub fn payment(mut self, destination: u8, amount: i64) -> Self {
        self.operations.push(xdr::Operation {
            source_account: None,
            body: xdr::OperationBody::Payment(xdr::PaymentOp {
                destination: muxed(destination),
                asset: xdr::Asset::Native,
                amount,
            }),
        });
        self
    }

    pub fn invoke(mut self, contract: [u8; 32], function: &str) -> Self {
        self.operations.push(xdr::Operation {
            source_account: None,
            body: xdr::OperationBody::InvokeHostFunction(xdr::InvokeHostFunctionOp {
                host_function: xdr::HostFunction::InvokeContract(xdr::InvokeContractArgs {
                    contract_address: xdr::ScAddress::Contract(xdr::Hash(contract)),
                    function_name: xdr::ScSymbol(function.try_into().unwrap()),
                    args: VecM::default(),
                }),
                auth: VecM::default(),
            }),
        });
        self.soroban = true;
        self
    }

    pub fn event(self, contract: Option<[u8; 32]>, topics: Vec<xdr::ScVal>, data: xdr::ScVal) -> Self {
        self.event_of(xdr::ContractEventType::Contract, contract, topics, data)
    }

    pub fn event_of(
        mut self,
        type_: xdr::ContractEventType,
        contract: Option<[u8; 32]>,
        topics: Vec<xdr::ScVal>,
        data: xdr::ScVal,
    ) -> Self {
        self.events.push(xdr::ContractEvent {
            ext: xdr::ExtensionPoint::V0,
            contract_id: contract.map(xdr::Hash),
            type_,
            body: xdr::ContractEventBody::V0(xdr::ContractEventV0 {
                topics: topics.try_into().unwrap(),
                data,
            }),
        });
        self
    }

    pub fn memo(mut self, memo: xdr::Memo) -> Self {
        self.memo = memo;
        self
    }

    pub fn failed(mut self) -> Self {
        self.failed = true;
        self
    }

    /// Wraps the transaction in a fee bump paid by `[fee_source; 32]`.
    pub fn fee_bump(mut self, fee_source: u8) -> Self {
        self.fee_source = Some(fee_source);
        self
    }

    /// Sends the transaction as a pre-protocol-13 `TxV0` envelope.
    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }

    pub fn envelope(&self) -> xdr::TransactionEnvelope {
        if self.legacy {
            return xdr::TransactionEnvelope::TxV0(xdr::TransactionV0Envelope {
                tx: xdr::TransactionV0 {
                    source_account_ed25519: xdr::Uint256([self.seed; 32]),
                    fee: 100,
                    seq_num: xdr::SequenceNumber(1),
                    time_bounds: None,
                    memo: self.memo.clone(),
                    operations: self.operations.clone().try_into().unwrap(),
                    ext: xdr::TransactionV0Ext::V0,
                },
                signatures: VecM::default(),
            });
        }

        let inner = xdr::TransactionV1Envelope {
            tx: xdr::Transaction {
                source_account: muxed(self.seed),
                fee: 100,
                seq_num: xdr::SequenceNumber(1),
                cond: xdr::Preconditions::None,
                memo: self.memo.clone(),
                operations: self.operations.clone().try_into().unwrap(),
                ext: xdr::TransactionExt::V0,
            },
            signatures: VecM::default(),
        };

        match self.fee_source {
            None => xdr::TransactionEnvelope::Tx(inner),
            Some(fee_source) => xdr::TransactionEnvelope::TxFeeBump(xdr::FeeBumpTransactionEnvelope {
                tx: xdr::FeeBumpTransaction {
                    fee_source: muxed(fee_source),
                    fee: 400,
                    inner_tx: xdr::FeeBumpTransactionInnerTx::Tx(inner),
                    ext: xdr::FeeBumpTransactionExt::V0,
                },
                signatures: VecM::default(),
            }),
        }
    }

    fn result_meta(&self, hash: [u8; 32]) -> xdr::TransactionResultMeta {
        let result = match (self.failed, self.fee_source) {
            (true, _) => xdr::TransactionResultResult::TxFailed(VecM::default()),
            (false, None) => xdr::TransactionResultResult::TxSuccess(VecM::default()),
            (false, Some(_)) => xdr::TransactionResultResult::TxFeeBumpInnerSuccess(xdr::InnerTransactionResultPair {
                transaction_hash: xdr::Hash([0; 32]),
                result: xdr::InnerTransactionResult {
                    fee_charged: 100,
                    result: xdr::InnerTransactionResultResult::TxSuccess(VecM::default()),
                    ext: xdr::InnerTransactionResultExt::V0,
                },
            }),
        };

        let soroban_meta = (!self.events.is_empty()).then(|| xdr::SorobanTransactionMeta {
            ext: xdr::SorobanTransactionMetaExt::V0,
            events: self.events.clone().try_into().unwrap(),
            return_value: xdr::ScVal::Void,
            diagnostic_events: VecM::default(),
        });

        xdr::TransactionResultMeta {
            result: xdr::TransactionResultPair {
                transaction_hash: xdr::Hash(hash),
                result: xdr::TransactionResult {
                    fee_charged: 100,
                    result,
                    ext: xdr::TransactionResultExt::V0,
                },
            },
            fee_processing: xdr::LedgerEntryChanges(VecM::default()),
            tx_apply_processing: xdr::TransactionMeta::V3(xdr::TransactionMetaV3 {
                ext: xdr::ExtensionPoint::V0,
                tx_changes_before: xdr::LedgerEntryChanges(VecM::default()),
                operations: VecM::default(),
                tx_changes_after: xdr::LedgerEntryChanges(VecM::default()),
                soroban_meta,
            }),
        }
    }
}

/// Synthetic close meta for one sequence on [`TEST_PASSPHRASE`].
pub struct LedgerBuilder {
    sequence: u32,
    close_time: u64,
    transactions: Vec<TxBuilder>,
    reverse_tx_set: bool,
}

impl LedgerBuilder {
    pub fn new(sequence: u32) -> Self {
        Self {
            sequence,
            close_time: 1_700_000_000 + u64::from(sequence) * 5,
            transactions: Vec::new(),
            reverse_tx_set: false,
        }
    }

    pub fn hash_of(sequence: u32) -> [u8; 32] {
        let mut hash = [0xee; 32];
        hash[..4].copy_from_slice(&sequence.to_be_bytes());
        hash
    }

    pub fn close_time(mut self, close_time: u64) -> Self {
        self.close_time = close_time;
        self
    }

    pub fn transaction(mut self, tx: TxBuilder) -> Self {
        self.transactions.push(tx);
        self
    }

    /// Stores envelopes in the tx set in reverse application order.
    pub fn reverse_tx_set(mut self) -> Self {
        self.reverse_tx_set = true;
        self
    }

    /// Envelopes in tx set order, each marked when it carries a host
    /// function call, and the results in application order.
    fn processed(&self) -> (Vec<(bool, xdr::TransactionEnvelope)>, Vec<xdr::TransactionResultMeta>) {
        let network = NetworkId::from_passphrase(TEST_PASSPHRASE);

        let mut envelopes = Vec::with_capacity(self.transactions.len());
        let mut tx_processing = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            let envelope = tx.envelope();
            let hash = transaction_hash(&envelope, &network).unwrap();
            tx_processing.push(tx.result_meta(hash));
            envelopes.push((tx.soroban, envelope));
        }
        if self.reverse_tx_set {
            envelopes.reverse();
        }

        (envelopes, tx_processing)
    }

    fn header_entry(&self) -> xdr::LedgerHeaderHistoryEntry {
        let header = xdr::LedgerHeader {
            ledger_version: 21,
            previous_ledger_hash: xdr::Hash(Self::hash_of(self.sequence.saturating_sub(1))),
            scp_value: xdr::StellarValue {
                tx_set_hash: xdr::Hash([0; 32]),
                close_time: xdr::TimePoint(self.close_time),
                upgrades: VecM::default(),
                ext: xdr::StellarValueExt::Basic,
            },
            tx_set_result_hash: xdr::Hash([0; 32]),
            bucket_list_hash: xdr::Hash([0; 32]),
            ledger_seq: self.sequence,
            total_coins: 1_000_000_000_000,
            fee_pool: 12_345,
            inflation_seq: 0,
            id_pool: 0,
            base_fee: 100,
            base_reserve: 5_000_000,
            max_tx_set_size: 1_000,
            skip_list: [xdr::Hash([0; 32]), xdr::Hash([0; 32]), xdr::Hash([0; 32]), xdr::Hash([0; 32])],
            ext: xdr::LedgerHeaderExt::V0,
        };

        xdr::LedgerHeaderHistoryEntry {
            hash: xdr::Hash(Self::hash_of(self.sequence)),
            header,
            ext: xdr::LedgerHeaderHistoryEntryExt::V0,
        }
    }

    pub fn build(self) -> xdr::LedgerCloseMeta {
        let (envelopes, tx_processing) = self.processed();
        let txs: Vec<xdr::TransactionEnvelope> = envelopes.into_iter().map(|(_, envelope)| envelope).collect();

        xdr::LedgerCloseMeta::V0(xdr::LedgerCloseMetaV0 {
            ledger_header: self.header_entry(),
            tx_set: xdr::TransactionSet {
                previous_ledger_hash: xdr::Hash(Self::hash_of(self.sequence.saturating_sub(1))),
                txs: txs.try_into().unwrap(),
            },
            tx_processing: tx_processing.try_into().unwrap(),
            upgrades_processing: VecM::default(),
            scp_info: VecM::default(),
        })
    }

    /// A `LedgerCloseMeta::V1` with a generalized tx set: a classic phase,
    /// then a Soroban phase holding the transactions that call a contract.
    pub fn build_v1(self) -> xdr::LedgerCloseMeta {
        let (envelopes, tx_processing) = self.processed();
        let (soroban, classic): (Vec<_>, Vec<_>) = envelopes.into_iter().partition(|(soroban, _)| *soroban);

        let phase = |base_fee: Option<i64>, txs: Vec<(bool, xdr::TransactionEnvelope)>| {
            let txs: Vec<xdr::TransactionEnvelope> = txs.into_iter().map(|(_, envelope)| envelope).collect();
            let txs = xdr::TxSetComponentTxsMaybeDiscountedFee { base_fee, txs: txs.try_into().unwrap() };
            let component = xdr::TxSetComponent::TxsetCompTxsMaybeDiscountedFee(txs);
            xdr::TransactionPhase::V0(vec![component].try_into().unwrap())
        };
        let phases = vec![phase(None, classic), phase(Some(100), soroban)];

        xdr::LedgerCloseMeta::V1(xdr::LedgerCloseMetaV1 {
            ext: xdr::LedgerCloseMetaExt::V0,
            ledger_header: self.header_entry(),
            tx_set: xdr::GeneralizedTransactionSet::V1(xdr::TransactionSetV1 {
                previous_ledger_hash: xdr::Hash(Self::hash_of(self.sequence.saturating_sub(1))),
                phases: phases.try_into().unwrap(),
            }),
            tx_processing: tx_processing.try_into().unwrap(),
            upgrades_processing: VecM::default(),
            scp_info: VecM::default(),
            total_byte_size_of_bucket_list: 0,
            evicted_temporary_ledger_keys: VecM::default(),
            evicted_persistent_ledger_entries: VecM::default(),
        })
    }
}

/// `meta` encoded as one record-marked frame of the meta pipe.
pub fn framed(meta: &xdr::LedgerCloseMeta) -> Vec<u8> {
    let body = meta.to_xdr(Limits::none()).unwrap();
    let mark = body.len() as u32 | 0x8000_0000;

    let mut frame = mark.to_be_bytes().to_vec();
    frame.extend(body);
    frame
}
