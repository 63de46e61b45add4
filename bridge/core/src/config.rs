// Copyright (c) 2024 The Botho Foundation

//! Bridge configuration types.

use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{
    error::{BridgeError, BridgeResult},
    price::UsdPrice,
    token::{parse_evm_address, Asset, NEXTEP_CONTRACT, REVO_DECIMALS},
};

/// Main bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Source chain (nxchain) configuration
    pub source: SourceConfig,

    /// Destination chain (REVO) configuration
    pub destination: DestinationConfig,

    /// Price configuration
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Loop, persistence and retry settings
    #[serde(default)]
    pub bridge: BridgeSettings,
}

/// Source chain connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// EVM JSON-RPC URL
    pub rpc_url: String,

    /// Address users deposit CXS and NEXTEP to
    pub bridge_address: String,

    /// NEXTEP ERC-20 contract address
    #[serde(default = "default_nextep_contract")]
    pub nextep_contract: String,

    /// Blocks past a deposit's height before it counts as final
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// Maximum number of blocks scanned in one cycle
    #[serde(default = "default_max_blocks")]
    pub max_blocks_per_cycle: u64,

    /// Height to start from when no state file exists yet
    #[serde(default)]
    pub start_height: Option<u64>,
}

fn default_nextep_contract() -> String {
    NEXTEP_CONTRACT.to_string()
}

fn default_confirmations() -> u64 {
    12
}

fn default_max_blocks() -> u64 {
    100
}

/// Destination chain connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Tendermint RPC URL passed to the chain binary as `--node`
    pub rpc_url: String,

    /// REST API URL for account, transaction and memo queries
    pub api_url: String,

    /// Chain ID
    pub chain_id: String,

    /// Chain binary used to sign and broadcast
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Keyring entry holding the minting key
    pub minter_key: String,

    /// Address of the minting account
    pub minter_address: String,

    /// Keyring backend (os, file, test)
    #[serde(default = "default_keyring_backend")]
    pub keyring_backend: String,

    /// Optional keyring directory
    #[serde(default)]
    pub keyring_dir: Option<PathBuf>,

    /// Denomination of the minted token's smallest unit
    #[serde(default = "default_denom")]
    pub denom: String,

    /// Decimals of the destination token
    #[serde(default = "default_revo_decimals")]
    pub decimals: u8,

    /// Gas prices passed to the chain binary
    #[serde(default = "default_gas_prices")]
    pub gas_prices: String,

    /// Multiplier applied to simulated gas
    #[serde(default = "default_gas_adjustment")]
    pub gas_adjustment: f64,

    /// How long to wait for a broadcast transaction to land in a block
    #[serde(default = "default_inclusion_timeout")]
    pub inclusion_timeout_secs: u64,
}

fn default_binary() -> String {
    "revod".to_string()
}

fn default_keyring_backend() -> String {
    "test".to_string()
}

fn default_denom() -> String {
    "arevo".to_string()
}

fn default_revo_decimals() -> u8 {
    REVO_DECIMALS
}

fn default_gas_prices() -> String {
    "0.025arevo".to_string()
}

fn default_gas_adjustment() -> f64 {
    1.4
}

fn default_inclusion_timeout() -> u64 {
    30
}

/// Price configuration.
///
/// Static prices take precedence over the remote feed. The REVO price has no
/// public market yet and is normally static.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfig {
    /// REVO price in USD
    #[serde(default)]
    pub revo_price: Option<UsdPrice>,

    /// CXS price override in USD
    #[serde(default)]
    pub cxs_price: Option<UsdPrice>,

    /// NEXTEP price override in USD
    #[serde(default)]
    pub nextep_price: Option<UsdPrice>,

    /// Remote price feed URL used for assets without a static price
    #[serde(default)]
    pub feed_url: Option<String>,

    /// Timeout for a single feed request
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_secs: u64,
}

fn default_feed_timeout() -> u64 {
    15
}

impl PricingConfig {
    /// Statically configured price for an asset.
    pub fn static_price(&self, asset: Asset) -> Option<UsdPrice> {
        match asset {
            Asset::Cxs => self.cxs_price,
            Asset::Nextep => self.nextep_price,
            Asset::Revo => self.revo_price,
        }
    }
}

/// Bridge loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Path to the JSON state file
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Optional JSON-lines audit journal of completed mints
    #[serde(default)]
    pub journal_file: Option<PathBuf>,

    /// Seconds between cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum delay between two external RPC calls
    #[serde(default = "default_rpc_min_interval")]
    pub rpc_min_interval_ms: u64,

    /// Number of retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles on every attempt
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single retry delay
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("bridge_state.json")
}

fn default_poll_interval() -> u64 {
    60
}

fn default_rpc_min_interval() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1_000
}

fn default_retry_max_delay() -> u64 {
    30_000
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            journal_file: None,
            poll_interval_secs: default_poll_interval(),
            rpc_min_interval_ms: default_rpc_min_interval(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> BridgeResult<Self> {
        toml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration.
    ///
    /// Price problems are reported as `InvalidPrice`, everything else as
    /// `Config`.
    pub fn validate(&self) -> BridgeResult<()> {
        let bridge_address = self.bridge_address()?;
        if bridge_address == Address::ZERO {
            return Err(BridgeError::Config(
                "bridge_address must not be the zero address".to_string(),
            ));
        }
        self.nextep_contract()?;

        if self.source.rpc_url.is_empty() {
            return Err(BridgeError::Config("source.rpc_url is required".to_string()));
        }
        if self.source.max_blocks_per_cycle == 0 {
            return Err(BridgeError::Config(
                "max_blocks_per_cycle must be at least 1".to_string(),
            ));
        }

        let dest = &self.destination;
        for (name, value) in [
            ("destination.rpc_url", &dest.rpc_url),
            ("destination.api_url", &dest.api_url),
            ("destination.chain_id", &dest.chain_id),
            ("destination.minter_key", &dest.minter_key),
            ("destination.minter_address", &dest.minter_address),
            ("destination.denom", &dest.denom),
        ] {
            if value.trim().is_empty() {
                return Err(BridgeError::Config(format!("{} is required", name)));
            }
        }
        if dest.gas_adjustment <= 0.0 {
            return Err(BridgeError::Config(
                "gas_adjustment must be positive".to_string(),
            ));
        }

        match self.pricing.revo_price {
            Some(price) => price.ensure_positive("revo_price")?,
            None if self.pricing.feed_url.is_none() => {
                return Err(BridgeError::InvalidPrice(
                    "revo_price is required when no price feed is configured".to_string(),
                ))
            }
            None => {}
        }
        for asset in [Asset::Cxs, Asset::Nextep] {
            match self.pricing.static_price(asset) {
                Some(price) => price.ensure_positive(asset.symbol())?,
                None if self.pricing.feed_url.is_none() => {
                    return Err(BridgeError::PriceUnavailable(format!(
                        "no {} price override and no price feed configured",
                        asset
                    )))
                }
                None => {}
            }
        }

        if self.bridge.poll_interval_secs == 0 {
            return Err(BridgeError::Config(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.bridge.retry_max_delay_ms < self.bridge.retry_base_delay_ms {
            return Err(BridgeError::Config(
                "retry_max_delay_ms must be >= retry_base_delay_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed bridge deposit address.
    pub fn bridge_address(&self) -> BridgeResult<Address> {
        parse_evm_address(&self.source.bridge_address)
            .map_err(|e| BridgeError::Config(format!("bridge_address: {}", e)))
    }

    /// Parsed NEXTEP contract address.
    pub fn nextep_contract(&self) -> BridgeResult<Address> {
        parse_evm_address(&self.source.nextep_contract)
            .map_err(|e| BridgeError::Config(format!("nextep_contract: {}", e)))
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                rpc_url: "http://localhost:8545".to_string(),
                bridge_address: "0x0000000000000000000000000000000000000000".to_string(),
                nextep_contract: default_nextep_contract(),
                confirmations: default_confirmations(),
                max_blocks_per_cycle: default_max_blocks(),
                start_height: None,
            },
            destination: DestinationConfig {
                rpc_url: "tcp://localhost:26657".to_string(),
                api_url: "http://localhost:1317".to_string(),
                chain_id: "revo_7000-1".to_string(),
                binary: default_binary(),
                minter_key: "minter".to_string(),
                minter_address: String::new(),
                keyring_backend: default_keyring_backend(),
                keyring_dir: None,
                denom: default_denom(),
                decimals: default_revo_decimals(),
                gas_prices: default_gas_prices(),
                gas_adjustment: default_gas_adjustment(),
                inclusion_timeout_secs: default_inclusion_timeout(),
            },
            pricing: PricingConfig::default(),
            bridge: BridgeSettings::default(),
        }
    }
}
