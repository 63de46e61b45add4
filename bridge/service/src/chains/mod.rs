// Copyright (c) 2024 The Botho Foundation

//! Chain clients: the nxchain source the bridge watches and the REVO chain it
//! mints on.
//!
//! The bridge only talks to chains through [`SourceChain`] and
//! [`DestinationChain`], so tests drive the whole pipeline with in-memory
//! fakes.

mod nxchain;
mod revo;

use async_trait::async_trait;
use revo_bridge_core::{BridgeResult, Deposit, MintRequest, TxReceipt};

pub use nxchain::{classify_transaction, http_provider, NxchainClient};
pub use revo::{classify_broadcast_code, classify_cli_failure, RevoChainClient};

/// Read access to the chain deposits arrive on.
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Current head height.
    async fn head_height(&self) -> BridgeResult<u64>;

    /// All deposits to the bridge in the block at `height`, in transaction
    /// order. Reverted transactions are excluded.
    async fn deposits_at(&self, height: u64) -> BridgeResult<Vec<Deposit>>;
}

/// Write access to the chain REVO is minted on.
#[async_trait]
pub trait DestinationChain: Send + Sync {
    /// Next sequence number of the minting account.
    async fn account_sequence(&self) -> BridgeResult<u64>;

    /// Look for a committed mint carrying the request's idempotency key.
    async fn find_mint(&self, request: &MintRequest) -> BridgeResult<Option<TxReceipt>>;

    /// Sign and broadcast the mint with `sequence`, returning once it is
    /// committed.
    async fn submit(&self, request: &MintRequest, sequence: u64) -> BridgeResult<TxReceipt>;
}
