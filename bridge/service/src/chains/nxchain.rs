// Copyright (c) 2024 The Botho Foundation

//! nxchain source client on an alloy provider.
//!
//! CXS deposits are plain value transfers to the bridge address. NEXTEP
//! deposits are `transfer(address,uint256)` calls on the NEXTEP contract whose
//! recipient is the bridge address. Both are only counted when the receipt
//! reports success.

use std::sync::Arc;

use alloy::{
    consensus::Transaction as _,
    eips::BlockNumberOrTag,
    network::TransactionResponse as _,
    primitives::{Address, TxHash, U256},
    providers::{Provider, ProviderBuilder},
    sol,
    sol_types::SolCall,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revo_bridge_core::{BridgeError, BridgeResult, Deposit, SourceToken};
use tracing::{debug, trace};

use super::SourceChain;
use crate::rpc::RpcThrottle;

sol! {
    function transfer(address to, uint256 amount) external returns (bool);
}

/// Decide whether a call is a bridge deposit.
///
/// Returns the token and amount for deposits and `None` for anything else,
/// including zero-value transfers and contract creations. Amounts are not
/// bounded here; a deposit too large to convert still has to reach the
/// controller so it can be parked.
pub fn classify_transaction(
    to: Option<Address>,
    value: U256,
    input: &[u8],
    bridge: &Address,
    nextep_contract: &Address,
) -> Option<(SourceToken, U256)> {
    let to = to?;
    if &to == bridge {
        return (!value.is_zero()).then_some((SourceToken::Cxs, value));
    }
    if &to != nextep_contract {
        return None;
    }

    let call = transferCall::abi_decode(input).ok()?;
    (&call.to == bridge && !call.amount.is_zero()).then_some((SourceToken::Nextep, call.amount))
}

/// Connect to an nxchain JSON-RPC endpoint over HTTP.
pub fn http_provider(rpc_url: &str) -> BridgeResult<impl Provider + Clone> {
    let url = rpc_url
        .parse()
        .map_err(|e| BridgeError::Config(format!("Invalid nxchain RPC URL {}: {}", rpc_url, e)))?;
    Ok(ProviderBuilder::new().connect_http(url))
}

fn rpc_failure(method: &'static str) -> impl Fn(alloy::transports::TransportError) -> BridgeError {
    move |e| BridgeError::RpcUnavailable(format!("{} failed: {}", method, e))
}

/// Source chain client for nxchain.
pub struct NxchainClient<P> {
    provider: P,
    bridge_address: Address,
    nextep_contract: Address,
    throttle: Arc<RpcThrottle>,
}

impl<P: Provider> NxchainClient<P> {
    pub fn new(
        provider: P,
        bridge_address: Address,
        nextep_contract: Address,
        throttle: Arc<RpcThrottle>,
    ) -> Self {
        Self {
            provider,
            bridge_address,
            nextep_contract,
            throttle,
        }
    }

    pub fn bridge_address(&self) -> &Address {
        &self.bridge_address
    }

    async fn receipt_succeeded(&self, tx_hash: TxHash) -> BridgeResult<bool> {
        self.throttle.wait().await;
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(rpc_failure("eth_getTransactionReceipt"))?
            .ok_or_else(|| {
                BridgeError::RpcUnavailable(format!("No receipt yet for {:#x}", tx_hash))
            })?;
        Ok(receipt.status())
    }
}

#[async_trait]
impl<P: Provider> SourceChain for NxchainClient<P> {
    async fn head_height(&self) -> BridgeResult<u64> {
        self.throttle.wait().await;
        self.provider
            .get_block_number()
            .await
            .map_err(rpc_failure("eth_blockNumber"))
    }

    async fn deposits_at(&self, height: u64) -> BridgeResult<Vec<Deposit>> {
        self.throttle.wait().await;
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .full()
            .await
            .map_err(rpc_failure("eth_getBlockByNumber"))?
            .ok_or_else(|| {
                BridgeError::RpcUnavailable(format!("Block {} not available", height))
            })?;

        let observed_at = i64::try_from(block.header.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        let transactions = block.transactions.as_transactions().ok_or_else(|| {
            BridgeError::RpcUnavailable(format!("Block {} returned without bodies", height))
        })?;

        let mut deposits = Vec::new();
        for (position, tx) in transactions.iter().enumerate() {
            let Some((source_token, amount)) = classify_transaction(
                tx.to(),
                tx.value(),
                tx.input(),
                &self.bridge_address,
                &self.nextep_contract,
            ) else {
                continue;
            };

            let tx_hash = tx.tx_hash();
            if !self.receipt_succeeded(tx_hash).await? {
                debug!("Skipping reverted {} transfer {:#x}", source_token, tx_hash);
                continue;
            }

            trace!("Deposit {:#x} at height {}", tx_hash, height);
            deposits.push(Deposit {
                source_tx_id: format!("{:#x}", tx_hash),
                block_height: height,
                tx_index: tx.transaction_index.unwrap_or(position as u64),
                source_token,
                sender: tx.from(),
                amount,
                observed_at,
            });
        }

        deposits.sort_by_key(|d| d.tx_index);
        Ok(deposits)
    }
}
