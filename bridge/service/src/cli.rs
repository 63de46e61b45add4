// Copyright (c) 2024 The Botho Foundation

//! Command-line overrides layered over the TOML configuration.

use std::path::PathBuf;

use clap::Args;
use revo_bridge_core::{BridgeConfig, BridgeResult, UsdPrice};

/// Flags that override individual configuration fields.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Bridge deposit address on nxchain
    #[arg(long, global = true)]
    pub bridge_address: Option<String>,

    /// Keyring entry of the minting key on the REVO chain
    #[arg(long, global = true)]
    pub minter_key: Option<String>,

    /// nxchain JSON-RPC URL
    #[arg(long, global = true)]
    pub source_rpc: Option<String>,

    /// REVO chain Tendermint RPC URL
    #[arg(long, global = true)]
    pub destination_rpc: Option<String>,

    /// REVO chain REST API URL
    #[arg(long, global = true)]
    pub destination_api: Option<String>,

    /// REVO price in USD
    #[arg(long, global = true)]
    pub revo_price: Option<String>,

    /// CXS price override in USD
    #[arg(long, global = true)]
    pub cxs_price: Option<String>,

    /// NEXTEP price override in USD
    #[arg(long, global = true)]
    pub nextep_price: Option<String>,

    /// Seconds between polling cycles
    #[arg(long, global = true)]
    pub poll_interval: Option<u64>,

    /// Confirmations required before a deposit is processed
    #[arg(long, global = true)]
    pub confirmations: Option<u64>,

    /// Maximum blocks scanned per cycle
    #[arg(long, global = true)]
    pub max_blocks: Option<u64>,

    /// Path to the bridge state file
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Apply every flag that was given. Prices are parsed exactly and must be
    /// positive.
    pub fn apply(&self, config: &mut BridgeConfig) -> BridgeResult<()> {
        if let Some(address) = &self.bridge_address {
            config.source.bridge_address = address.clone();
        }
        if let Some(key) = &self.minter_key {
            config.destination.minter_key = key.clone();
        }
        if let Some(url) = &self.source_rpc {
            config.source.rpc_url = url.clone();
        }
        if let Some(url) = &self.destination_rpc {
            config.destination.rpc_url = url.clone();
        }
        if let Some(url) = &self.destination_api {
            config.destination.api_url = url.clone();
        }

        if let Some(price) = &self.revo_price {
            config.pricing.revo_price = Some(UsdPrice::parse_positive(price)?);
        }
        if let Some(price) = &self.cxs_price {
            config.pricing.cxs_price = Some(UsdPrice::parse_positive(price)?);
        }
        if let Some(price) = &self.nextep_price {
            config.pricing.nextep_price = Some(UsdPrice::parse_positive(price)?);
        }

        if let Some(secs) = self.poll_interval {
            config.bridge.poll_interval_secs = secs;
        }
        if let Some(confirmations) = self.confirmations {
            config.source.confirmations = confirmations;
        }
        if let Some(max_blocks) = self.max_blocks {
            config.source.max_blocks_per_cycle = max_blocks;
        }
        if let Some(path) = &self.state_file {
            config.bridge.state_file = path.clone();
        }

        Ok(())
    }
}
