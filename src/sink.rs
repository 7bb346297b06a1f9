//! Storage side of the ingester.
//!
//! A sink writes every record of one ledger together with the checkpoint in
//! a single atomic unit. Writing a record whose id is already stored is a
//! no-op, so a ledger can be persisted again after a crash.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{ContractEvent, IngestionState, Ledger, LedgerBatch, Operation, Transaction};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("sink state poisoned by a panicked writer")]
    Poisoned,
}

#[async_trait]
pub trait LedgerSink: Send + Sync {
    /// Last fully persisted ledger, 0 when nothing was persisted yet.
    async fn load_checkpoint(&self) -> Result<u32, SinkError>;

    /// Upserts the records of `batch` and moves the checkpoint to its
    /// sequence. Either all of it is stored or none of it.
    async fn persist(&self, batch: &LedgerBatch) -> Result<(), SinkError>;
}

#[derive(Default)]
struct MemoryState {
    ledgers: BTreeMap<u32, Ledger>,
    transactions: HashMap<String, Transaction>,
    operations: HashMap<String, Operation>,
    events: HashMap<String, ContractEvent>,
    checkpoint: Option<IngestionState>,
    checkpoint_history: Vec<u32>,
}

/// In-process sink.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that already holds a checkpoint at `last_ledger`.
    pub fn with_checkpoint(last_ledger: u32) -> Self {
        let sink = Self::default();
        sink.state().checkpoint = Some(IngestionState { last_ledger, updated_at: Utc::now() });
        sink
    }

    fn write(&self) -> Result<MutexGuard<'_, MemoryState>, SinkError> {
        self.state.lock().map_err(|_| SinkError::Poisoned)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn checkpoint(&self) -> Option<IngestionState> {
        self.state().checkpoint
    }

    /// Every checkpoint value written, in write order.
    pub fn checkpoint_history(&self) -> Vec<u32> {
        self.state().checkpoint_history.clone()
    }

    pub fn ledger(&self, sequence: u32) -> Option<Ledger> {
        self.state().ledgers.get(&sequence).cloned()
    }

    pub fn ledger_count(&self) -> usize {
        self.state().ledgers.len()
    }

    pub fn transaction(&self, id: &str) -> Option<Transaction> {
        self.state().transactions.get(id).cloned()
    }

    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }

    /// Stored operations ordered by id.
    pub fn operations(&self) -> Vec<Operation> {
        let mut operations: Vec<Operation> = self.state().operations.values().cloned().collect();
        operations.sort_by(|a, b| a.id.cmp(&b.id));
        operations
    }

    /// Stored events ordered by id.
    pub fn events(&self) -> Vec<ContractEvent> {
        let mut events: Vec<ContractEvent> = self.state().events.values().cloned().collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        events
    }
}

#[async_trait]
impl LedgerSink for MemorySink {
    async fn load_checkpoint(&self) -> Result<u32, SinkError> {
        Ok(self.write()?.checkpoint.map_or(0, |state| state.last_ledger))
    }

    async fn persist(&self, batch: &LedgerBatch) -> Result<(), SinkError> {
        let mut state = self.write()?;
        let state = &mut *state;

        state.ledgers.entry(batch.sequence()).or_insert_with(|| batch.ledger.clone());
        for tx in &batch.transactions {
            state.transactions.entry(tx.id.clone()).or_insert_with(|| tx.clone());
        }
        for op in &batch.operations {
            state.operations.entry(op.id.clone()).or_insert_with(|| op.clone());
        }
        for event in &batch.events {
            state.events.entry(event.id.clone()).or_insert_with(|| event.clone());
        }

        state.checkpoint = Some(IngestionState { last_ledger: batch.sequence(), updated_at: Utc::now() });
        state.checkpoint_history.push(batch.sequence());

        log::debug!("stored ledger {} in memory", batch.sequence());
        Ok(())
    }
}
