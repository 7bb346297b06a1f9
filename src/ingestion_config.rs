use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::RetryPolicy;

const FUTURENET_PASSPHRASE: &str = "Test SDF Future Network ; October 2022";
const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";
const PUBNET_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown network {0}, choose one of futurenet, testnet, pubnet")]
    UnknownNetwork(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("end ledger {end} is lower than start ledger {start}")]
    InvertedRange { start: u32, end: u32 },

    #[error("network {0} has no predefined captive core config, set CAPTIVE_CORE_CONFIG_PATH")]
    MissingCoreConfig(&'static str),
}

/// Context path object.
#[derive(Clone, Debug)]
pub struct ContextPath(pub String);

impl Default for ContextPath {
    fn default() -> Self {
        Self("/tmp/rs_ingestion_temp".to_string())
    }
}

/// Enum describing the network to ingest from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SupportedNetwork {
    /// Ingest on futurenet.
    Futurenet,

    /// Ingest on testnet.
    Testnet,

    /// Ingest on pubnet.
    Pubnet,
}

impl SupportedNetwork {
    pub fn passphrase(&self) -> &'static str {
        match self {
            SupportedNetwork::Futurenet => FUTURENET_PASSPHRASE,
            SupportedNetwork::Testnet => TESTNET_PASSPHRASE,
            SupportedNetwork::Pubnet => PUBNET_PASSPHRASE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SupportedNetwork::Futurenet => "futurenet",
            SupportedNetwork::Testnet => "testnet",
            SupportedNetwork::Pubnet => "pubnet",
        }
    }
}

impl FromStr for SupportedNetwork {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "futurenet" => Ok(SupportedNetwork::Futurenet),
            "testnet" | "development" => Ok(SupportedNetwork::Testnet),
            "pubnet" | "mainnet" | "production" => Ok(SupportedNetwork::Pubnet),
            other => Err(ConfigError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Configuration settings
#[derive(Clone, Debug)]
pub struct IngestionConfig {
    /// Path to the stellar-core executable.
    pub executable_path: String,

    /// Path to the context directory.
    /// The context directory is where temporary buckets
    /// database, and toml configuration are stored.
    pub context_path: ContextPath,

    /// Externally managed captive core config. When unset a
    /// predefined config for `network` is written to the context path.
    pub core_config_path: Option<PathBuf>,

    /// Network to ingest from.
    pub network: SupportedNetwork,

    /// Overrides the passphrase of `network` when hashing transactions.
    pub network_passphrase: Option<String>,

    /// First ledger to ingest when no checkpoint exists.
    pub start_ledger: u32,

    /// Last ledger to ingest. `None` streams forever.
    pub end_ledger: Option<u32>,

    /// Contract allow-list, hex ids or `C...` strkeys. Empty keeps everything.
    pub filter_contracts: Vec<String>,

    /// Whether processed records are published to live subscribers.
    pub enable_live_stream: bool,

    /// Capacity of each subscriber's delivery queue.
    pub subscriber_buffer: usize,

    /// Capacity of the hub's inbound command queue.
    pub hub_queue: usize,

    /// How often the stats liveness timestamp is refreshed.
    pub stats_interval: Duration,

    pub retry: RetryPolicy,

    pub log_level: Option<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            executable_path: "/usr/local/bin/stellar-core".to_string(),
            context_path: ContextPath::default(),
            core_config_path: None,
            network: SupportedNetwork::Testnet,
            network_passphrase: None,
            start_ledger: 2,
            end_ledger: None,
            filter_contracts: Vec::new(),
            enable_live_stream: true,
            subscriber_buffer: 256,
            hub_queue: 256,
            stats_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            log_level: None,
        }
    }
}

impl IngestionConfig {
    /// Builds a config from the process environment, falling back to
    /// [`IngestionConfig::default`] for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(network) = get("NETWORK") {
            config.network = network.parse()?;
        }
        config.network_passphrase = get("NETWORK_PASSPHRASE");
        if let Some(path) = get("CAPTIVE_CORE_BINARY_PATH") {
            config.executable_path = path;
        }
        config.core_config_path = get("CAPTIVE_CORE_CONFIG_PATH").map(PathBuf::from);
        if let Some(path) = get("CONTEXT_PATH") {
            config.context_path = ContextPath(path);
        }
        if let Some(start) = get("START_LEDGER") {
            config.start_ledger = parse_value("START_LEDGER", &start)?;
        }
        if let Some(end) = get("END_LEDGER") {
            // 0 means continuous streaming.
            let end: u32 = parse_value("END_LEDGER", &end)?;
            config.end_ledger = (end > 0).then_some(end);
        }
        if let Some(contracts) = get("FILTER_CONTRACTS") {
            config.filter_contracts = contracts
                .split(',')
                .map(str::trim)
                .filter(|contract| !contract.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(enabled) = get("ENABLE_WEBSOCKET") {
            config.enable_live_stream = parse_value("ENABLE_WEBSOCKET", &enabled)?;
        }
        if let Some(size) = get("SUBSCRIBER_BUFFER") {
            config.subscriber_buffer = parse_value("SUBSCRIBER_BUFFER", &size)?;
        }
        if let Some(size) = get("HUB_QUEUE") {
            config.hub_queue = parse_value("HUB_QUEUE", &size)?;
        }
        if let Some(secs) = get("STATS_INTERVAL_SECS") {
            config.stats_interval = Duration::from_secs(parse_value("STATS_INTERVAL_SECS", &secs)?);
        }
        if let Some(ms) = get("EOF_BACKOFF_MS") {
            config.retry.end_of_stream = Duration::from_millis(parse_value("EOF_BACKOFF_MS", &ms)?);
        }
        if let Some(ms) = get("ERROR_BACKOFF_MS") {
            config.retry.error = Duration::from_millis(parse_value("ERROR_BACKOFF_MS", &ms)?);
        }
        config.log_level = get("LOG_LEVEL");

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(end) = self.end_ledger {
            if end < self.start_ledger {
                return Err(ConfigError::InvertedRange { start: self.start_ledger, end });
            }
        }

        for (key, value) in [("SUBSCRIBER_BUFFER", self.subscriber_buffer), ("HUB_QUEUE", self.hub_queue)] {
            if value == 0 {
                return Err(ConfigError::InvalidValue { key, value: value.to_string() });
            }
        }

        if self.stats_interval.is_zero() {
            return Err(ConfigError::InvalidValue { key: "STATS_INTERVAL_SECS", value: "0".to_string() });
        }

        Ok(())
    }

    /// Passphrase used to derive the network id for transaction hashing.
    pub fn passphrase(&self) -> &str {
        self.network_passphrase.as_deref().unwrap_or(self.network.passphrase())
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value: value.to_string() })
}
