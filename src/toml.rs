use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{ConfigError, IngestionConfig, SupportedNetwork};

const CORE_CONFIG_FILE: &str = "stellar-core.cfg";

const PREDEFINED_FUTURENET_CONFIG: &str = r#"
# captive core config for futurenet
LOG_COLOR=true
LOG_FILE_PATH=""
HTTP_PORT=0
PUBLIC_HTTP_PORT=false

NETWORK_PASSPHRASE="Test SDF Future Network ; October 2022"

DATABASE="sqlite3://stellar.db"
PEER_PORT=11725

UNSAFE_QUORUM=true

# Stellar Futurenet validators
[[HOME_DOMAINS]]
HOME_DOMAIN="futurenet.stellar.org"
QUALITY="MEDIUM"

[[VALIDATORS]]
NAME="sdf_futurenet_1"
HOME_DOMAIN="futurenet.stellar.org"
PUBLIC_KEY="GBRIF2N52GVN3EXBBICD5F4L5VUFXK6S6VOUCF6T2DWPLOLGWEPPYZTF"
ADDRESS="core-live-futurenet.stellar.org"
HISTORY="curl -sf http://history-futurenet.stellar.org/{0} -o {1}"
"#;

const PREDEFINED_TESTNET_CONFIG: &str = r#"
# captive core config for testnet
LOG_FILE_PATH=""
HTTP_PORT=0
PUBLIC_HTTP_PORT=false

NETWORK_PASSPHRASE="Test SDF Network ; September 2015"

DATABASE="sqlite3://stellar.db"
PEER_PORT=11725

UNSAFE_QUORUM=true
FAILURE_SAFETY=1

[[HOME_DOMAINS]]
HOME_DOMAIN="testnet.stellar.org"
QUALITY="HIGH"

[[VALIDATORS]]
NAME="sdf_testnet_1"
HOME_DOMAIN="testnet.stellar.org"
PUBLIC_KEY="GDKXE2OZMJIPOSLNA6N6F2BVCI3O777I2OOC4BV7VOYUEHYX7RTRYA7Y"
ADDRESS="core-testnet1.stellar.org"
HISTORY="curl -sf http://history.stellar.org/prd/core-testnet/core_testnet_001/{0} -o {1}"

[[VALIDATORS]]
NAME="sdf_testnet_2"
HOME_DOMAIN="testnet.stellar.org"
PUBLIC_KEY="GCUCJTIYXSOXKBSNFGNFWW5MUQ54HKRPGJUTQFJ5RQXZXNOLNXYDHRAP"
ADDRESS="core-testnet2.stellar.org"
HISTORY="curl -sf http://history.stellar.org/prd/core-testnet/core_testnet_002/{0} -o {1}"

[[VALIDATORS]]
NAME="sdf_testnet_3"
HOME_DOMAIN="testnet.stellar.org"
PUBLIC_KEY="GC2V2EFSXN6SQTWVYA5EPJPBWWIMSD2XQNKUOHGEKB535AQE2I6IXV2Z"
ADDRESS="core-testnet3.stellar.org"
HISTORY="curl -sf http://history.stellar.org/prd/core-testnet/core_testnet_003/{0} -o {1}"
"#;

#[derive(thiserror::Error, Debug)]
pub enum CoreConfigError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot write captive core config: {0}")]
    Io(#[from] std::io::Error),
}

fn predefined_cfg(network: SupportedNetwork) -> Option<&'static str> {
    match network {
        SupportedNetwork::Futurenet => Some(PREDEFINED_FUTURENET_CONFIG),
        SupportedNetwork::Testnet => Some(PREDEFINED_TESTNET_CONFIG),
        // Pubnet quorum sets change too often to ship one.
        SupportedNetwork::Pubnet => None,
    }
}

/// Returns the captive core config path for `config`, writing the
/// predefined one into the context directory when none was supplied.
pub fn prepare_core_cfg(config: &IngestionConfig) -> Result<PathBuf, CoreConfigError> {
    if let Some(path) = &config.core_config_path {
        return Ok(path.clone());
    }

    let contents = predefined_cfg(config.network)
        .ok_or(ConfigError::MissingCoreConfig(config.network.name()))?;

    write_cfg(Path::new(&config.context_path.0), contents)
}

fn write_cfg(dir: &Path, contents: &str) -> Result<PathBuf, CoreConfigError> {
    fs::create_dir_all(dir)?;

    let path = dir.join(CORE_CONFIG_FILE);
    let mut cfg = File::create(&path)?;
    cfg.write_all(contents.as_bytes())?;
    log::debug!("wrote captive core config to {}", path.display());

    Ok(path)
}
