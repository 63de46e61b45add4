// Copyright (c) 2024 The Botho Foundation

//! Idempotent mint dispatch.
//!
//! Before every attempt the dispatcher consults the state store and then the
//! destination chain for an earlier mint carrying the same key. A mint is
//! only submitted when both come up empty.

use backon::{ExponentialBuilder, Retryable};
use revo_bridge_core::{BridgeError, BridgeResult, MintRequest, TxReceipt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{chains::DestinationChain, store::BridgeStateStore};

/// Submits mints and manages the minting account's sequence.
pub struct MintDispatcher<D> {
    chain: D,
    backoff: ExponentialBuilder,
    /// Next sequence to use; `None` forces a refetch
    sequence: Mutex<Option<u64>>,
}

impl<D: DestinationChain> MintDispatcher<D> {
    pub fn new(chain: D, backoff: ExponentialBuilder) -> Self {
        Self {
            chain,
            backoff,
            sequence: Mutex::new(None),
        }
    }

    pub fn chain(&self) -> &D {
        &self.chain
    }

    /// The cached sequence, if any.
    pub async fn cached_sequence(&self) -> Option<u64> {
        *self.sequence.lock().await
    }

    /// Dispatch `request`, retrying transient failures with backoff.
    ///
    /// Safe to call repeatedly with the same idempotency key.
    pub async fn dispatch(
        &self,
        request: &MintRequest,
        store: &BridgeStateStore,
    ) -> BridgeResult<TxReceipt> {
        if request.amount == 0 {
            return Err(BridgeError::SubmissionFatal(format!(
                "Refusing zero-amount mint for {}",
                request.idempotency_key
            )));
        }

        (|| self.attempt(request, store))
            .retry(self.backoff)
            .when(BridgeError::is_retryable)
            .notify(|err, delay| {
                warn!(
                    "Mint for {} failed ({}), retrying in {:?}",
                    request.idempotency_key, err, delay
                )
            })
            .await
    }

    async fn attempt(
        &self,
        request: &MintRequest,
        store: &BridgeStateStore,
    ) -> BridgeResult<TxReceipt> {
        if store.is_processed(&request.idempotency_key) {
            debug!("{} already processed", request.idempotency_key);
            return Ok(TxReceipt::already_processed());
        }

        if let Some(receipt) = self.chain.find_mint(request).await? {
            info!(
                "Found existing mint {:?} for {}",
                receipt.tx_hash, request.idempotency_key
            );
            return Ok(receipt);
        }

        let mut cached = self.sequence.lock().await;
        let sequence = match *cached {
            Some(sequence) => sequence,
            None => {
                let sequence = self.chain.account_sequence().await?;
                debug!("Synced minter sequence: {}", sequence);
                sequence
            }
        };

        match self.chain.submit(request, sequence).await {
            Ok(receipt) => {
                *cached = Some(sequence + 1);
                Ok(receipt)
            }
            Err(e) => {
                // Whether the sequence was consumed is unknown; refetch it.
                *cached = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{collections::VecDeque, sync::Mutex, time::Duration};
    use tempfile::tempdir;

    #[derive(Default)]
    struct ScriptedChain {
        chain_sequence: Mutex<u64>,
        existing: Mutex<Vec<String>>,
        /// Errors returned by the next submits, in order
        failures: Mutex<VecDeque<BridgeError>>,
        submitted: Mutex<Vec<(String, u64)>>,
        sequence_queries: Mutex<u32>,
    }

    #[async_trait]
    impl DestinationChain for ScriptedChain {
        async fn account_sequence(&self) -> BridgeResult<u64> {
            *self.sequence_queries.lock().unwrap() += 1;
            Ok(*self.chain_sequence.lock().unwrap())
        }

        async fn find_mint(&self, request: &MintRequest) -> BridgeResult<Option<TxReceipt>> {
            let existing = self.existing.lock().unwrap();
            Ok(existing
                .contains(&request.idempotency_key)
                .then(|| TxReceipt::recovered(format!("TX-{}", request.idempotency_key), None)))
        }

        async fn submit(&self, request: &MintRequest, sequence: u64) -> BridgeResult<TxReceipt> {
            if let Some(e) = self.failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            *self.chain_sequence.lock().unwrap() = sequence + 1;
            self.submitted
                .lock()
                .unwrap()
                .push((request.idempotency_key.clone(), sequence));
            self.existing
                .lock()
                .unwrap()
                .push(request.idempotency_key.clone());
            Ok(TxReceipt::submitted(
                format!("TX-{}", request.idempotency_key),
                Some(1),
            ))
        }
    }

    fn request(key: &str) -> MintRequest {
        MintRequest {
            recipient: "0x5555555555555555555555555555555555555555".to_string(),
            amount: 10,
            idempotency_key: key.to_string(),
        }
    }

    fn fast(max_retries: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(1))
            .with_max_times(max_retries)
    }

    fn store() -> (tempfile::TempDir, BridgeStateStore) {
        let dir = tempdir().unwrap();
        let store = BridgeStateStore::load(dir.path().join("state.json")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_sequence_is_cached_between_mints() {
        let (_dir, store) = store();
        let chain = ScriptedChain::default();
        *chain.chain_sequence.lock().unwrap() = 7;
        let dispatcher = MintDispatcher::new(chain, fast(0));

        dispatcher.dispatch(&request("a"), &store).await.unwrap();
        dispatcher.dispatch(&request("b"), &store).await.unwrap();

        let submitted = dispatcher.chain().submitted.lock().unwrap().clone();
        assert_eq!(submitted, vec![("a".to_string(), 7), ("b".to_string(), 8)]);
        assert_eq!(*dispatcher.chain().sequence_queries.lock().unwrap(), 1);
        assert_eq!(dispatcher.cached_sequence().await, Some(9));
    }

    #[tokio::test]
    async fn test_processed_key_short_circuits() {
        let (_dir, mut store) = store();
        store.mark_processed("a", 1).unwrap();
        let dispatcher = MintDispatcher::new(ScriptedChain::default(), fast(0));

        let receipt = dispatcher.dispatch(&request("a"), &store).await.unwrap();
        assert_eq!(receipt, TxReceipt::already_processed());
        assert!(dispatcher.chain().submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_mint_is_recovered_not_resubmitted() {
        let (_dir, store) = store();
        let chain = ScriptedChain::default();
        chain.existing.lock().unwrap().push("a".to_string());
        let dispatcher = MintDispatcher::new(chain, fast(0));

        let receipt = dispatcher.dispatch(&request("a"), &store).await.unwrap();
        assert_eq!(receipt.outcome, revo_bridge_core::MintOutcome::Recovered);
        assert!(dispatcher.chain().submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sequence_conflict_resyncs_and_retries() {
        let (_dir, store) = store();
        let chain = ScriptedChain::default();
        *chain.chain_sequence.lock().unwrap() = 3;
        chain
            .failures
            .lock()
            .unwrap()
            .push_back(BridgeError::sequence_conflict("expected 4, got 3"));
        let dispatcher = MintDispatcher::new(chain, fast(2));

        let receipt = dispatcher.dispatch(&request("a"), &store).await.unwrap();
        assert_eq!(receipt.outcome, revo_bridge_core::MintOutcome::Submitted);
        assert_eq!(*dispatcher.chain().sequence_queries.lock().unwrap(), 2);
        assert_eq!(dispatcher.chain().submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let (_dir, store) = store();
        let chain = ScriptedChain::default();
        chain
            .failures
            .lock()
            .unwrap()
            .push_back(BridgeError::SubmissionFatal("insufficient funds".into()));
        let dispatcher = MintDispatcher::new(chain, fast(5));

        let err = dispatcher.dispatch(&request("a"), &store).await.unwrap_err();
        assert!(matches!(err, BridgeError::SubmissionFatal(_)));
        assert!(dispatcher.chain().submitted.lock().unwrap().is_empty());
        assert_eq!(dispatcher.cached_sequence().await, None);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_retries() {
        let (_dir, store) = store();
        let chain = ScriptedChain::default();
        for _ in 0..3 {
            chain
                .failures
                .lock()
                .unwrap()
                .push_back(BridgeError::transient("mempool is full"));
        }
        let dispatcher = MintDispatcher::new(chain, fast(2));

        assert!(matches!(
            dispatcher.dispatch(&request("a"), &store).await,
            Err(BridgeError::SubmissionTransient { .. })
        ));
        assert!(dispatcher.chain().failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_amount_refused() {
        let (_dir, store) = store();
        let dispatcher = MintDispatcher::new(ScriptedChain::default(), fast(0));
        let mut zero = request("a");
        zero.amount = 0;
        assert!(matches!(
            dispatcher.dispatch(&zero, &store).await,
            Err(BridgeError::SubmissionFatal(_))
        ));
    }
}
