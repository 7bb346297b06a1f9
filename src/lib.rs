mod buffered_ledger_meta_reader;
mod captive_core;
mod core_runner;
mod ingestion_config;
mod reader;
mod source;
mod toml;

pub mod extractor;
pub mod filter;
pub mod hub;
pub mod ingester;
pub mod models;
pub mod scval;
pub mod sink;
pub mod stats;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(test)]
mod test_support;

pub use buffered_ledger_meta_reader::*;
pub use captive_core::*;
pub use core_runner::*;
pub use ingestion_config::*;
pub use reader::*;
pub use source::*;
pub use toml::{prepare_core_cfg, CoreConfigError};

pub use extractor::{ExtractError, LedgerExtractor};
pub use filter::ContractFilter;
pub use hub::{BroadcastHub, HubError, HubHandle, Subscription};
pub use ingester::{IngestError, Ingester, IngesterState, RetryPolicy};
pub use sink::{LedgerSink, MemorySink, SinkError};
pub use stats::{Stats, StatsAggregator};
