//! The ingestion loop.
//!
//! One ledger at a time: fetch, extract, filter, persist together with the
//! checkpoint, then report and publish. A ledger is retried until it is
//! persisted, the cursor never moves past a ledger that was not committed.

use std::sync::Arc;
use std::time::Duration;

use stellar_xdr::curr::LedgerCloseMeta;
use tokio_util::sync::CancellationToken;

use crate::extractor::{ExtractError, LedgerExtractor};
use crate::filter::ContractFilter;
use crate::hub::HubHandle;
use crate::models::LedgerBatch;
use crate::sink::{LedgerSink, SinkError};
use crate::source::{LedgerSource, Range, SourceError};
use crate::stats::StatsAggregator;
use crate::{ConfigError, IngestionConfig};

/// Backoff applied before a ledger is requested again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The source has not produced the ledger yet.
    pub end_of_stream: Duration,

    /// Fetching, extracting or persisting failed.
    pub error: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            end_of_stream: Duration::from_millis(2000),
            error: Duration::from_millis(5000),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngesterState {
    Idle,
    /// Looking up the checkpoint, carrying the configured start.
    Resolving(u32),
    Preparing(Range),
    Streaming,
    Stopped,
}

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot prepare ledger source: {0}")]
    Prepare(#[source] SourceError),
}

/// Failure of a single ledger after it was fetched. Always retried.
#[derive(thiserror::Error, Debug)]
enum LedgerError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("cannot extract records: {0}")]
    Extract(#[from] ExtractError),

    #[error("cannot persist records: {0}")]
    Persist(#[from] SinkError),
}

pub struct Ingester {
    source: Option<Box<dyn LedgerSource>>,
    sink: Arc<dyn LedgerSink>,
    extractor: LedgerExtractor,
    filter: ContractFilter,
    hub: Option<HubHandle>,
    stats: Arc<StatsAggregator>,
    retry: RetryPolicy,
    start_ledger: u32,
    end_ledger: Option<u32>,
    stats_interval: Duration,
    state: IngesterState,
}

impl Ingester {
    pub fn new(config: &IngestionConfig, sink: Arc<dyn LedgerSink>) -> Result<Self, IngestError> {
        config.validate()?;

        Ok(Self {
            source: None,
            sink,
            extractor: LedgerExtractor::new(config.passphrase()),
            filter: ContractFilter::new(&config.filter_contracts),
            hub: None,
            stats: Arc::new(StatsAggregator::new()),
            retry: config.retry,
            start_ledger: config.start_ledger,
            end_ledger: config.end_ledger,
            stats_interval: config.stats_interval,
            state: IngesterState::Idle,
        })
    }

    pub fn with_source(mut self, source: Box<dyn LedgerSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Publishes the records of every persisted ledger to `hub`.
    pub fn with_hub(mut self, hub: HubHandle) -> Self {
        self.stats.attach_hub(&hub);
        self.hub = Some(hub);
        self
    }

    pub fn stats(&self) -> Arc<StatsAggregator> {
        self.stats.clone()
    }

    pub fn state(&self) -> IngesterState {
        self.state
    }

    /// Ingests until the end ledger is persisted or `cancel` fires.
    ///
    /// Only fatal startup problems are returned. Failures of individual
    /// ledgers are logged and retried.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), IngestError> {
        let mut source = match self.source.take() {
            Some(source) => source,
            None => {
                log::warn!("no ledger source configured, nothing to ingest");
                self.state = IngesterState::Stopped;
                return Ok(());
            }
        };

        let ticker_cancel = cancel.child_token();
        let _ticker_guard = ticker_cancel.clone().drop_guard();
        self.stats.spawn_ticker(self.stats_interval, ticker_cancel);

        let result = self.run_with(source.as_mut(), &cancel).await;

        self.source = Some(source);
        self.state = IngesterState::Stopped;
        log::info!("ingestion stopped");
        result
    }

    async fn run_with(&mut self, source: &mut dyn LedgerSource, cancel: &CancellationToken) -> Result<(), IngestError> {
        let start = self.resolve_start().await;
        if let Some(end) = self.end_ledger {
            if start > end {
                log::info!("ledgers up to {} are already ingested", end);
                return Ok(());
            }
        }

        let range = Range::new(start, self.end_ledger);
        self.state = IngesterState::Preparing(range);
        log::info!("preparing ledger source for {:?}", range);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            prepared = source.prepare(range) => prepared.map_err(IngestError::Prepare)?,
        }

        self.state = IngesterState::Streaming;
        let mut next = start;
        let mut needs_prepare = false;
        loop {
            if cancel.is_cancelled() {
                log::info!("ingestion cancelled before ledger {}", next);
                return Ok(());
            }
            if let Some(end) = self.end_ledger {
                if next > end {
                    log::info!("reached end ledger {}", end);
                    return Ok(());
                }
            }

            if needs_prepare {
                let range = Range::new(next, self.end_ledger);
                self.state = IngesterState::Preparing(range);
                let prepared = tokio::select! {
                    _ = cancel.cancelled() => continue,
                    prepared = source.prepare(range) => prepared,
                };
                if let Err(err) = prepared {
                    log::warn!("cannot prepare ledger source again for {:?}: {}", range, err);
                    backoff(self.retry.error, cancel).await;
                    continue;
                }

                needs_prepare = false;
                self.state = IngesterState::Streaming;
            }

            let fetched = tokio::select! {
                _ = cancel.cancelled() => None,
                fetched = source.get_ledger(next) => Some(fetched),
            };
            let meta = match fetched {
                None => continue,
                Some(Ok(meta)) => meta,
                Some(Err(SourceError::EndOfStream(_))) => {
                    log::debug!("ledger {} not available yet", next);
                    backoff(self.retry.end_of_stream, cancel).await;
                    continue;
                }
                Some(Err(SourceError::Closed)) => {
                    log::warn!("ledger source closed while waiting for ledger {}, preparing it again", next);
                    needs_prepare = true;
                    backoff(self.retry.error, cancel).await;
                    continue;
                }
                Some(Err(err)) => {
                    log::warn!("failed to fetch ledger {}: {}", next, err);
                    backoff(self.retry.error, cancel).await;
                    continue;
                }
            };

            match self.ingest_ledger(next, &meta).await {
                Ok(batch) => {
                    self.report(&batch);
                    self.publish(&batch).await;
                    next += 1;
                }
                Err(LedgerError::Source(err)) => {
                    log::warn!("discarding ledger: {}", err);
                    backoff(self.retry.error, cancel).await;
                }
                Err(err) => {
                    log::error!("ledger {}: {}", next, err);
                    backoff(self.retry.error, cancel).await;
                }
            }
        }
    }

    /// Ledger after the checkpoint, or the configured start without one.
    async fn resolve_start(&mut self) -> u32 {
        self.state = IngesterState::Resolving(self.start_ledger);

        match self.sink.load_checkpoint().await {
            Ok(0) => self.start_ledger,
            Ok(last_ledger) => {
                log::info!("resuming after checkpoint {}", last_ledger);
                last_ledger.saturating_add(1)
            }
            Err(err) => {
                log::warn!("cannot load checkpoint, starting at {}: {}", self.start_ledger, err);
                self.start_ledger
            }
        }
    }

    async fn ingest_ledger(&mut self, sequence: u32, meta: &LedgerCloseMeta) -> Result<LedgerBatch, LedgerError> {
        let mut batch = self.extractor.extract(meta)?;
        if batch.sequence() != sequence {
            return Err(SourceError::UnexpectedSequence { requested: sequence, received: batch.sequence() }.into());
        }

        self.filter.apply(&mut batch);
        self.sink.persist(&batch).await?;

        Ok(batch)
    }

    fn report(&mut self, batch: &LedgerBatch) {
        self.stats.set_current_ledger(batch.sequence());
        self.stats.increment_transactions(batch.transactions.len() as u64);
        self.stats.increment_operations(batch.operations.len() as u64);
        self.stats.increment_events(batch.events.len() as u64);
        self.stats.increment_ledgers_processed();

        log::info!(
            "ingested ledger {}: {} transactions, {} operations, {} events",
            batch.sequence(),
            batch.transactions.len(),
            batch.operations.len(),
            batch.events.len()
        );
    }

    async fn publish(&mut self, batch: &LedgerBatch) {
        let hub = match &self.hub {
            Some(hub) => hub,
            None => return,
        };

        for message in batch.live_messages() {
            if hub.publish(message).await.is_err() {
                log::debug!("broadcast hub stopped, live messages of ledger {} dropped", batch.sequence());
                return;
            }
        }
    }
}

async fn backoff(delay: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}
