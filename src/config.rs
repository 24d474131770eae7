use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::blockchain::GenesisConfig;
use crate::state::Account;
use crate::wallet::{checksum_address, is_valid_address};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: `{value}`")]
    Invalid { var: &'static str, value: String },
    #[error("{0} must be set when IS_MINER=1")]
    Missing(&'static str),
    #[error("cannot read genesis accounts from {path}: {reason}")]
    GenesisAccounts { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbKind {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub pool_url: String,
    pub miner_address: String,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db: DbKind,
    /// Set when the process runs as a miner instead of a pool.
    pub miner: Option<MinerConfig>,
    pub genesis: GenesisConfig,
}

impl Config {
    /// Read the process environment. Call `dotenvy::dotenv()` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&var, "PORT", 3666u16)?;

        let db = match var("DB").as_deref() {
            None | Some("memory") => DbKind::Memory,
            Some("file") => DbKind::File(
                var("DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data")),
            ),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "DB",
                    value: other.to_string(),
                });
            }
        };

        let miner = if parse_or(&var, "IS_MINER", 0u8)? == 1 {
            let miner_address = var("MINER_ADDRESS").ok_or(ConfigError::Missing("MINER_ADDRESS"))?;
            if !is_valid_address(&miner_address) {
                return Err(ConfigError::Invalid {
                    var: "MINER_ADDRESS",
                    value: miner_address,
                });
            }
            Some(MinerConfig {
                pool_url: var("POOL_URL")
                    .unwrap_or_else(|| format!("http://{host}:{port}"))
                    .trim_end_matches('/')
                    .to_string(),
                miner_address,
                retry_delay: Duration::from_millis(parse_or(&var, "RETRY_DELAY_MS", 1_000u64)?),
                max_retries: parse_or(&var, "MAX_RETRIES", 5u32)?,
            })
        } else {
            None
        };

        let genesis = GenesisConfig {
            accounts: match var("GENESIS_ACCOUNTS") {
                Some(path) => load_genesis_accounts(&path)?,
                None => Vec::new(),
            },
            ..GenesisConfig::default()
        };

        Ok(Self {
            host,
            port,
            db,
            miner,
            genesis,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: key,
            value: raw,
        }),
    }
}

/// JSON array of `{ "address", "balance", "nonce"? }`. Addresses may be in any case.
fn load_genesis_accounts(path: &str) -> Result<Vec<Account>, ConfigError> {
    let fail = |reason: String| ConfigError::GenesisAccounts {
        path: path.to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let accounts: Vec<Account> = serde_json::from_str(&raw).map_err(|e| fail(e.to_string()))?;
    accounts
        .into_iter()
        .map(|account| {
            let address = checksum_address(&account.address)
                .map_err(|_| fail(format!("`{}` is not an address", account.address)))?;
            Ok(Account { address, ..account })
        })
        .collect()
}
