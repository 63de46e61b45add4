// Copyright (c) 2024 The Botho Foundation

//! Ledger scanner: turns confirmed source blocks into ordered deposit batches.

use backon::{ExponentialBuilder, Retryable};
use revo_bridge_core::{BridgeError, BridgeResult, Deposit};
use tracing::debug;

use crate::{chains::SourceChain, retry::log_retry};

/// Deposits found in a contiguous range of confirmed blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBatch {
    /// First height scanned
    pub from_height: u64,
    /// Last height scanned (inclusive)
    pub to_height: u64,
    /// Chain head when the batch was taken
    pub head: u64,
    /// Deposits in block order, then transaction order
    pub deposits: Vec<Deposit>,
}

/// Polls a [`SourceChain`] for deposits past the confirmation depth.
pub struct LedgerScanner<S> {
    source: S,
    confirmations: u64,
    max_blocks: u64,
    backoff: ExponentialBuilder,
}

impl<S: SourceChain> LedgerScanner<S> {
    pub fn new(
        source: S,
        confirmations: u64,
        max_blocks: u64,
        backoff: ExponentialBuilder,
    ) -> Self {
        Self {
            source,
            confirmations,
            max_blocks: max_blocks.max(1),
            backoff,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// Highest height that is deep enough to trust, if any.
    pub fn confirmed_tip(head: u64, confirmations: u64) -> Option<u64> {
        head.checked_sub(confirmations)
    }

    /// Scan the next batch starting at `from_height`.
    ///
    /// Returns `None` when no confirmed block is waiting. Any RPC failure that
    /// survives the retry policy fails the whole batch so no height is
    /// skipped.
    pub async fn next_batch(&self, from_height: u64) -> BridgeResult<Option<ScanBatch>> {
        let head = (|| self.source.head_height())
            .retry(self.backoff)
            .when(BridgeError::is_retryable)
            .notify(log_retry("head height"))
            .await?;

        let Some(tip) = Self::confirmed_tip(head, self.confirmations) else {
            debug!(
                "Head {} is shallower than {} confirmations",
                head, self.confirmations
            );
            return Ok(None);
        };
        if from_height > tip {
            debug!("Caught up: next height {}, confirmed tip {}", from_height, tip);
            return Ok(None);
        }

        let to_height = tip.min(from_height.saturating_add(self.max_blocks - 1));
        debug!(
            "Scanning blocks {} to {} (head {})",
            from_height, to_height, head
        );

        let mut deposits = Vec::new();
        for height in from_height..=to_height {
            let what = format!("deposits at {}", height);
            let mut found = (|| self.source.deposits_at(height))
                .retry(self.backoff)
                .when(BridgeError::is_retryable)
                .notify(log_retry(&what))
                .await?;
            deposits.append(&mut found);
        }
        deposits.sort_by_key(Deposit::chain_position);

        Ok(Some(ScanBatch {
            from_height,
            to_height,
            head,
            deposits,
        }))
    }
}
