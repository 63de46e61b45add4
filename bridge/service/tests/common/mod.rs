// Copyright (c) 2024 The Botho Foundation

//! In-memory chains for driving the bridge end to end.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Utc;
use revo_bridge_core::{
    Asset, BridgeError, BridgeResult, BridgeState, Deposit, MintRequest, SourceToken, TxReceipt,
    UsdPrice,
};
use revo_bridge_service::{
    chains::{DestinationChain, SourceChain},
    oracle::PriceTable,
    BridgeController, BridgeStateStore, LedgerScanner, MintDispatcher, PriceOracle,
    ShutdownSignal, StaticPriceProvider,
};
use backon::ExponentialBuilder;
use tokio::sync::broadcast;

pub const TOKEN: u128 = 1_000_000_000_000_000_000;

#[derive(Default)]
struct SourceInner {
    head: u64,
    blocks: BTreeMap<u64, Vec<Deposit>>,
    failing: BTreeSet<u64>,
}

/// A source chain whose head and blocks the test controls.
#[derive(Clone, Default)]
pub struct FakeSource {
    inner: Arc<Mutex<SourceInner>>,
}

impl FakeSource {
    pub fn with_head(head: u64) -> Self {
        let source = Self::default();
        source.set_head(head);
        source
    }

    pub fn set_head(&self, head: u64) {
        self.inner.lock().unwrap().head = head;
    }

    pub fn add_deposit(
        &self,
        height: u64,
        tx_index: u64,
        token: SourceToken,
        amount: u128,
    ) -> Deposit {
        self.add_raw_deposit(height, tx_index, token, U256::from(amount))
    }

    /// Add a deposit with an on-chain amount that may not fit 128 bits.
    pub fn add_raw_deposit(
        &self,
        height: u64,
        tx_index: u64,
        token: SourceToken,
        amount: U256,
    ) -> Deposit {
        let deposit = Deposit {
            source_tx_id: format!("0x{:060x}{:04x}", height, tx_index),
            block_height: height,
            tx_index,
            source_token: token,
            sender: Address::repeat_byte(height as u8),
            amount,
            observed_at: Utc::now(),
        };
        self.inner
            .lock()
            .unwrap()
            .blocks
            .entry(height)
            .or_default()
            .push(deposit.clone());
        deposit
    }

    pub fn fail_at(&self, height: u64) {
        self.inner.lock().unwrap().failing.insert(height);
    }

    pub fn heal(&self) {
        self.inner.lock().unwrap().failing.clear();
    }
}

#[async_trait]
impl SourceChain for FakeSource {
    async fn head_height(&self) -> BridgeResult<u64> {
        Ok(self.inner.lock().unwrap().head)
    }

    async fn deposits_at(&self, height: u64) -> BridgeResult<Vec<Deposit>> {
        let inner = self.inner.lock().unwrap();
        if inner.failing.contains(&height) {
            return Err(BridgeError::RpcUnavailable(format!("block {} unavailable", height)));
        }
        Ok(inner.blocks.get(&height).cloned().unwrap_or_default())
    }
}

/// A mint the fake destination committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mint {
    pub key: String,
    pub recipient: String,
    pub amount: u128,
    pub tx_hash: String,
    pub sequence: u64,
}

#[derive(Default)]
struct DestinationInner {
    sequence: u64,
    mints: Vec<Mint>,
    rejected_keys: BTreeSet<String>,
    watched_state: Option<PathBuf>,
    states_at_submit: Vec<Option<BridgeState>>,
}

/// A destination chain that records every committed mint.
#[derive(Clone, Default)]
pub struct FakeDestination {
    inner: Arc<Mutex<DestinationInner>>,
}

impl FakeDestination {
    pub fn mints(&self) -> Vec<Mint> {
        self.inner.lock().unwrap().mints.clone()
    }

    pub fn mints_for(&self, key: &str) -> usize {
        self.mints().iter().filter(|m| m.key == key).count()
    }

    /// Reject submissions for `key` as if the minter lacked funds.
    pub fn reject(&self, key: &str) {
        self.inner
            .lock()
            .unwrap()
            .rejected_keys
            .insert(key.to_string());
    }

    pub fn accept_all(&self) {
        self.inner.lock().unwrap().rejected_keys.clear();
    }

    /// Read the state file at every submission, as a crash there would find it.
    pub fn watch_state(&self, path: &Path) {
        self.inner.lock().unwrap().watched_state = Some(path.to_path_buf());
    }

    /// State file contents seen by each submission, `None` if not yet written.
    pub fn states_at_submit(&self) -> Vec<Option<BridgeState>> {
        self.inner.lock().unwrap().states_at_submit.clone()
    }
}

#[async_trait]
impl DestinationChain for FakeDestination {
    async fn account_sequence(&self) -> BridgeResult<u64> {
        Ok(self.inner.lock().unwrap().sequence)
    }

    async fn find_mint(&self, request: &MintRequest) -> BridgeResult<Option<TxReceipt>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .mints
            .iter()
            .find(|m| m.key == request.idempotency_key)
            .map(|m| TxReceipt::recovered(m.tx_hash.clone(), Some(m.sequence + 1))))
    }

    async fn submit(&self, request: &MintRequest, sequence: u64) -> BridgeResult<TxReceipt> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(path) = inner.watched_state.clone() {
            let state = std::fs::read_to_string(&path)
                .ok()
                .map(|text| serde_json::from_str(&text).unwrap());
            inner.states_at_submit.push(state);
        }
        if inner.rejected_keys.contains(&request.idempotency_key) {
            return Err(BridgeError::SubmissionFatal(
                "code 5 (sdk): insufficient funds".to_string(),
            ));
        }
        if sequence != inner.sequence {
            return Err(BridgeError::sequence_conflict(format!(
                "expected {}, got {}",
                inner.sequence, sequence
            )));
        }

        let tx_hash = format!("MINT{:04}", inner.mints.len());
        inner.mints.push(Mint {
            key: request.idempotency_key.clone(),
            recipient: request.recipient.clone(),
            amount: request.amount,
            tx_hash: tx_hash.clone(),
            sequence,
        });
        inner.sequence += 1;
        Ok(TxReceipt::submitted(tx_hash, Some(sequence + 1)))
    }
}

pub fn price(s: &str) -> UsdPrice {
    UsdPrice::parse(s).unwrap()
}

/// CXS $0.50, NEXTEP $0.20, REVO $0.10.
pub fn default_prices() -> PriceTable {
    [
        (Asset::Cxs, price("0.5")),
        (Asset::Nextep, price("0.2")),
        (Asset::Revo, price("0.1")),
    ]
    .into_iter()
    .collect()
}

pub fn fast_retry() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(2))
        .with_max_times(2)
}

pub struct Harness {
    pub controller: BridgeController<FakeSource, FakeDestination>,
    pub shutdown: broadcast::Sender<()>,
}

pub fn harness(
    source: &FakeSource,
    destination: &FakeDestination,
    state_file: &Path,
    prices: PriceTable,
    confirmations: u64,
    max_blocks: u64,
) -> Harness {
    let (shutdown, rx) = broadcast::channel(1);
    let controller = BridgeController::new(
        LedgerScanner::new(source.clone(), confirmations, max_blocks, fast_retry()),
        PriceOracle::new(StaticPriceProvider::new(prices), None),
        MintDispatcher::new(destination.clone(), fast_retry()),
        BridgeStateStore::load(state_file).unwrap(),
        ShutdownSignal::new(rx),
    )
    .with_poll_interval(Duration::from_millis(10));

    Harness {
        controller,
        shutdown,
    }
}
