use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, TryRecvError};

use async_trait::async_trait;
use stellar_xdr::curr::LedgerCloseMeta;

use crate::toml::{prepare_core_cfg, CoreConfigError};
use crate::{
    BoundedRange, IngestionConfig, LedgerCloseMetaReader, LedgerSource, MetaResult, Range, RunnerError,
    RunnerStatus, SourceError, StellarCoreRunner,
};

/// [`LedgerSource`] backed by a captive stellar-core process.
pub struct CaptiveCore {
    /// Lent to a blocking task while core starts up.
    runner: Option<StellarCoreRunner>,

    ledgers: Option<Receiver<MetaResult>>,

    /// Ledgers read ahead of the one requested.
    pending: BTreeMap<u32, LedgerCloseMeta>,
}

impl CaptiveCore {
    pub fn new(config: &IngestionConfig) -> Result<Self, CoreConfigError> {
        let config_path = prepare_core_cfg(config)?;

        Ok(Self {
            runner: Some(StellarCoreRunner::new(config, config_path)),
            ledgers: None,
            pending: BTreeMap::new(),
        })
    }

    pub fn close(&mut self) -> Result<(), RunnerError> {
        // the reader thread may be blocked on a full channel
        self.ledgers = None;
        self.pending.clear();

        match self.runner.as_mut() {
            Some(runner) if runner.status() != RunnerStatus::Closed => runner.close(),
            _ => Ok(()),
        }
    }

    fn start(runner: &mut StellarCoreRunner, range: Range) -> Result<Receiver<MetaResult>, RunnerError> {
        match range {
            Range::Bounded(BoundedRange(from, to)) => runner.catchup(from, to),
            Range::Unbounded(start) => runner.run_from(start),
        }
    }
}

#[async_trait]
impl LedgerSource for CaptiveCore {
    async fn prepare(&mut self, range: Range) -> Result<(), SourceError> {
        self.close()?;

        let mut runner = self.runner.take().ok_or(SourceError::Closed)?;
        let (runner, started) = tokio::task::spawn_blocking(move || {
            let started = Self::start(&mut runner, range);
            (runner, started)
        })
        .await
        .map_err(|err| SourceError::Backend(format!("captive core startup task failed: {}", err)))?;

        self.runner = Some(runner);
        self.ledgers = Some(started?);

        log::info!("captive core prepared {:?}", range);
        Ok(())
    }

    async fn get_ledger(&mut self, sequence: u32) -> Result<LedgerCloseMeta, SourceError> {
        self.pending = self.pending.split_off(&sequence);
        if let Some(meta) = self.pending.remove(&sequence) {
            return Ok(meta);
        }

        // not running until prepared again
        let ledgers = self.ledgers.as_ref().ok_or(SourceError::Closed)?;

        loop {
            match ledgers.try_recv() {
                Ok(Ok(meta)) => {
                    let received = LedgerCloseMetaReader::ledger_sequence(&meta)
                        .map_err(|err| SourceError::Backend(err.to_string()))?;

                    if received == sequence {
                        return Ok(meta);
                    }
                    if received > sequence {
                        self.pending.insert(received, meta);
                    }
                }
                Ok(Err(err)) => return Err(RunnerError::MetaReader(err).into()),
                Err(TryRecvError::Empty) => return Err(SourceError::EndOfStream(sequence)),
                Err(TryRecvError::Disconnected) => return Err(SourceError::Closed),
            }
        }
    }
}

impl Drop for CaptiveCore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to close captive core: {}", err);
        }
    }
}
