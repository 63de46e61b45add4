// Copyright (c) 2024 The Botho Foundation

//! Deposits observed on the source chain and the mints they turn into.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::{format_address, SourceToken};

/// A confirmed transfer of a legacy token to the bridge address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Source transaction hash (0x-prefixed lowercase hex), unique per deposit
    pub source_tx_id: String,

    /// Height of the block containing the transaction
    pub block_height: u64,

    /// Position of the transaction within its block
    pub tx_index: u64,

    /// Which legacy token was deposited
    pub source_token: SourceToken,

    /// Depositor; also the recipient of the mint
    pub sender: Address,

    /// Amount in the token's smallest unit, as transferred on chain
    #[serde(with = "u256_string")]
    pub amount: U256,

    /// Timestamp of the containing block
    pub observed_at: DateTime<Utc>,
}

impl Deposit {
    /// Sort key giving block order, then transaction order within a block.
    pub fn chain_position(&self) -> (u64, u64) {
        (self.block_height, self.tx_index)
    }

    /// The mint that settles this deposit.
    pub fn mint_request(&self, destination_amount: u128) -> MintRequest {
        MintRequest {
            recipient: format_address(&self.sender),
            amount: destination_amount,
            idempotency_key: self.source_tx_id.clone(),
        }
    }
}

impl std::fmt::Display for Deposit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} from {} at height {} (tx {})",
            self.amount,
            self.source_token,
            format_address(&self.sender),
            self.block_height,
            self.source_tx_id
        )
    }
}

/// A request to mint REVO on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    /// Destination-chain recipient
    pub recipient: String,

    /// Amount in REVO smallest units
    #[serde(with = "u128_string")]
    pub amount: u128,

    /// Source transaction id; at most one mint may ever carry it
    pub idempotency_key: String,
}

/// How a dispatch was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MintOutcome {
    /// A new transaction was submitted and included
    Submitted,
    /// A transaction carrying the key was already on chain
    Recovered,
    /// The state store already lists the key as processed
    AlreadyProcessed,
}

impl std::fmt::Display for MintOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MintOutcome::Submitted => write!(f, "submitted"),
            MintOutcome::Recovered => write!(f, "recovered"),
            MintOutcome::AlreadyProcessed => write!(f, "already_processed"),
        }
    }
}

/// Receipt for a dispatched mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Destination transaction hash, if a transaction is known
    pub tx_hash: Option<String>,

    /// Destination block height, if known
    pub height: Option<u64>,

    pub outcome: MintOutcome,
}

impl TxReceipt {
    pub fn submitted(tx_hash: impl Into<String>, height: Option<u64>) -> Self {
        Self {
            tx_hash: Some(tx_hash.into()),
            height,
            outcome: MintOutcome::Submitted,
        }
    }

    pub fn recovered(tx_hash: impl Into<String>, height: Option<u64>) -> Self {
        Self {
            tx_hash: Some(tx_hash.into()),
            height,
            outcome: MintOutcome::Recovered,
        }
    }

    pub fn already_processed() -> Self {
        Self {
            tx_hash: None,
            height: None,
            outcome: MintOutcome::AlreadyProcessed,
        }
    }
}

/// u128 does not survive every JSON consumer as a number; store as a string.
pub(crate) mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// On-chain amounts, stored as decimal strings like the u128 fields.
pub(crate) mod u256_string {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
    }
}
