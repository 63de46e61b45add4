// Copyright (c) 2024 The Botho Foundation

//! Bridged assets and address handling.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Decimals of the native CXS coin on nxchain.
pub const CXS_DECIMALS: u8 = 18;

/// Decimals of the NEXTEP ERC-20 token.
pub const NEXTEP_DECIMALS: u8 = 18;

/// Decimals of the REVO native token.
pub const REVO_DECIMALS: u8 = 18;

/// Mainnet address of the NEXTEP token contract on nxchain.
pub const NEXTEP_CONTRACT: &str = "0x432e4997060f2385bdb32cdc8be815c6b22a8a61";

/// Legacy tokens accepted by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceToken {
    /// Native coin of the source chain, sent as plain value transfers
    Cxs,
    /// ERC-20 token, sent via `transfer(address,uint256)`
    Nextep,
}

impl SourceToken {
    /// Number of decimals of the token's smallest unit.
    pub fn decimals(&self) -> u8 {
        match self {
            SourceToken::Cxs => CXS_DECIMALS,
            SourceToken::Nextep => NEXTEP_DECIMALS,
        }
    }

    /// Ticker symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            SourceToken::Cxs => "CXS",
            SourceToken::Nextep => "NEXTEP",
        }
    }
}

impl std::fmt::Display for SourceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl std::str::FromStr for SourceToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cxs" => Ok(SourceToken::Cxs),
            "nextep" => Ok(SourceToken::Nextep),
            _ => Err(format!("Unknown token: {}", s)),
        }
    }
}

/// Anything the price oracle can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Asset {
    Cxs,
    Nextep,
    /// The destination chain's native token
    Revo,
}

impl Asset {
    pub const ALL: [Asset; 3] = [Asset::Cxs, Asset::Nextep, Asset::Revo];

    pub fn symbol(&self) -> &'static str {
        match self {
            Asset::Cxs => "CXS",
            Asset::Nextep => "NEXTEP",
            Asset::Revo => "REVO",
        }
    }
}

impl From<SourceToken> for Asset {
    fn from(token: SourceToken) -> Self {
        match token {
            SourceToken::Cxs => Asset::Cxs,
            SourceToken::Nextep => Asset::Nextep,
        }
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Parse a 0x-prefixed 20-byte EVM address.
///
/// Checksums are not enforced; nxchain explorers emit lowercase addresses.
pub fn parse_evm_address(s: &str) -> Result<Address, String> {
    let trimmed = s.trim();
    if !trimmed.starts_with("0x") {
        return Err("EVM address must start with 0x".to_string());
    }
    if trimmed.len() != 42 {
        return Err(format!(
            "EVM address must be 42 characters, got {}",
            trimmed.len()
        ));
    }
    trimmed
        .parse::<Address>()
        .map_err(|e| format!("Invalid EVM address {}: {}", trimmed, e))
}

/// Lowercase 0x-prefixed rendering, the form used for recipients and logs.
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}
