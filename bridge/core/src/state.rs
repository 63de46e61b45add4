// Copyright (c) 2024 The Botho Foundation

//! The bridge's durable progress record.
//!
//! Serialized as `{"last_height": .., "processed": [..], "pending": [..]}`.
//! Unknown fields are ignored and `pending` may be absent, so state files
//! written by older or newer releases still load.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::deposit::Deposit;

/// A deposit whose mint failed and which will be retried on later cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeposit {
    pub deposit: Deposit,

    /// Number of failed dispatch attempts so far
    pub attempts: u32,

    /// Most recent failure, for operators reading the state file
    pub last_error: String,
}

/// Progress of the bridge: scan height, processed deposits and parked ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeState {
    /// Highest source block whose deposits have all been handled
    #[serde(default)]
    pub last_height: u64,

    /// Source transaction ids that have been minted (or recorded as dust)
    #[serde(default)]
    pub processed: BTreeSet<String>,

    /// Deposits waiting for another dispatch attempt, oldest first
    #[serde(default)]
    pub pending: Vec<PendingDeposit>,
}

impl BridgeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State that will start scanning at `height`.
    pub fn starting_at(height: u64) -> Self {
        Self {
            last_height: height.saturating_sub(1),
            ..Self::default()
        }
    }

    pub fn is_processed(&self, tx_id: &str) -> bool {
        self.processed.contains(tx_id)
    }

    pub fn is_pending(&self, tx_id: &str) -> bool {
        self.pending.iter().any(|p| p.deposit.source_tx_id == tx_id)
    }

    /// First height not yet scanned.
    pub fn next_scan_height(&self) -> u64 {
        self.last_height + 1
    }

    /// Raise the scan height; never lowers it.
    pub fn advance_height(&mut self, height: u64) {
        self.last_height = self.last_height.max(height);
    }

    /// Record a processed deposit and drop it from the pending list.
    pub fn record_processed(&mut self, tx_id: &str, height: u64) {
        self.processed.insert(tx_id.to_string());
        self.pending.retain(|p| p.deposit.source_tx_id != tx_id);
        self.advance_height(height);
    }

    /// Park a failed deposit, or bump the attempt count if already parked.
    pub fn record_pending(&mut self, deposit: &Deposit, error: &str, height: u64) {
        match self
            .pending
            .iter_mut()
            .find(|p| p.deposit.source_tx_id == deposit.source_tx_id)
        {
            Some(existing) => {
                existing.attempts += 1;
                existing.last_error = error.to_string();
            }
            None => {
                self.pending.push(PendingDeposit {
                    deposit: deposit.clone(),
                    attempts: 1,
                    last_error: error.to_string(),
                });
                self.pending.sort_by_key(|p| p.deposit.chain_position());
            }
        }
        self.advance_height(height);
    }

    /// Human-readable summary for the `status` command.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Bridge State:\n  Last scanned height: {}\n  Next scan height: {}\n  Processed deposits: {}\n  Pending deposits: {}",
            self.last_height,
            self.next_scan_height(),
            self.processed.len(),
            self.pending.len()
        );
        for p in &self.pending {
            out.push_str(&format!(
                "\n    {} (attempts: {}, last error: {})",
                p.deposit, p.attempts, p.last_error
            ));
        }
        out
    }
}
