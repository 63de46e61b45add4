// Copyright (c) 2024 The Botho Foundation

//! Bridge controller - drives the scan, convert, dispatch, persist loop.

use std::time::Duration;

use revo_bridge_core::{
    convert_deposit, BridgeError, BridgeResult, Deposit, MintOutcome, PriceSnapshot,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::{
    chains::{DestinationChain, SourceChain},
    dispatcher::MintDispatcher,
    journal::{JournalEntry, MintJournal},
    oracle::PriceOracle,
    scanner::LedgerScanner,
    store::BridgeStateStore,
};

/// Latched shutdown signal.
///
/// Once a shutdown message arrives (or every sender is gone) it stays
/// requested.
pub struct ShutdownSignal {
    rx: broadcast::Receiver<()>,
    requested: bool,
}

impl ShutdownSignal {
    pub fn new(rx: broadcast::Receiver<()>) -> Self {
        Self {
            rx,
            requested: false,
        }
    }

    /// Check without waiting.
    pub fn is_requested(&mut self) -> bool {
        if !self.requested {
            match self.rx.try_recv() {
                Ok(()) | Err(TryRecvError::Closed) | Err(TryRecvError::Lagged(_)) => {
                    self.requested = true;
                }
                Err(TryRecvError::Empty) => {}
            }
        }
        self.requested
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&mut self) {
        if !self.requested {
            let _ = self.rx.recv().await;
            self.requested = true;
        }
    }
}

/// Where the controller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Scanning,
    Converting,
    Dispatching,
    Persisting,
    ShuttingDown,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::Scanning => "scanning",
            ControllerState::Converting => "converting",
            ControllerState::Dispatching => "dispatching",
            ControllerState::Persisting => "persisting",
            ControllerState::ShuttingDown => "shutting down",
        };
        write!(f, "{}", name)
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Heights scanned, if a batch was taken
    pub scanned: Option<(u64, u64)>,
    /// Deposits seen in the batch plus parked deposits retried
    pub deposits: usize,
    /// Mints submitted or recovered
    pub minted: usize,
    /// Deposits already processed
    pub skipped: usize,
    /// Deposits worth less than one destination unit
    pub dust: usize,
    /// Deposits parked after a failed dispatch
    pub parked: usize,
    /// Shutdown arrived before the batch was finished
    pub interrupted: bool,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scanned {
            Some((from, to)) => write!(f, "blocks {}-{}", from, to)?,
            None => write!(f, "no new blocks")?,
        }
        write!(
            f,
            ": {} deposits, {} minted, {} skipped, {} dust, {} parked",
            self.deposits, self.minted, self.skipped, self.dust, self.parked
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

enum DepositOutcome {
    Minted,
    Skipped,
    Dust,
    Parked,
}

/// Owns the state store and drives every other component.
pub struct BridgeController<S, D> {
    scanner: LedgerScanner<S>,
    oracle: PriceOracle,
    dispatcher: MintDispatcher<D>,
    store: BridgeStateStore,
    journal: Option<MintJournal>,
    destination_decimals: u8,
    poll_interval: Duration,
    state: ControllerState,
    shutdown: ShutdownSignal,
}

impl<S: SourceChain, D: DestinationChain> BridgeController<S, D> {
    pub fn new(
        scanner: LedgerScanner<S>,
        oracle: PriceOracle,
        dispatcher: MintDispatcher<D>,
        store: BridgeStateStore,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            scanner,
            oracle,
            dispatcher,
            store,
            journal: None,
            destination_decimals: revo_bridge_core::token::REVO_DECIMALS,
            poll_interval: Duration::from_secs(60),
            state: ControllerState::Idle,
            shutdown,
        }
    }

    pub fn with_journal(mut self, journal: MintJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_destination_decimals(mut self, decimals: u8) -> Self {
        self.destination_decimals = decimals;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn store(&self) -> &BridgeStateStore {
        &self.store
    }

    pub fn scanner(&self) -> &LedgerScanner<S> {
        &self.scanner
    }

    pub fn dispatcher(&self) -> &MintDispatcher<D> {
        &self.dispatcher
    }

    fn transition(&mut self, next: ControllerState) {
        if self.state != next {
            debug!("Controller {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Run cycles until shutdown. Returns an error only when state can no
    /// longer be persisted.
    pub async fn run(mut self) -> BridgeResult<()> {
        info!(
            "Bridge controller starting at height {}",
            self.store.next_scan_height()
        );

        loop {
            if self.shutdown.is_requested() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) => info!("Cycle complete: {}", report),
                Err(e) if e.is_fatal_to_process() => {
                    error!("Stopping bridge: {}", e);
                    self.transition(ControllerState::ShuttingDown);
                    return Err(e);
                }
                Err(BridgeError::PriceUnavailable(reason)) => {
                    warn!("Skipping cycle, prices unavailable: {}", reason)
                }
                Err(e) => warn!("Cycle failed, will retry: {}", e),
            }

            if self.shutdown.is_requested() {
                break;
            }
            self.transition(ControllerState::Idle);
            let poll_interval = self.poll_interval;
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = self.shutdown.wait() => {}
            }
        }

        self.transition(ControllerState::ShuttingDown);
        info!(
            "Bridge controller stopped at height {}",
            self.store.last_height()
        );
        Ok(())
    }

    /// Run one scan, convert, dispatch, persist cycle.
    ///
    /// Errors leave the scan height where it was, apart from progress already
    /// persisted for individual deposits.
    pub async fn run_cycle(&mut self) -> BridgeResult<CycleReport> {
        let mut report = CycleReport::default();

        self.transition(ControllerState::Scanning);
        let batch = match self.scanner.next_batch(self.store.next_scan_height()).await {
            Ok(batch) => batch,
            Err(e) => {
                self.transition(ControllerState::Idle);
                return Err(e);
            }
        };

        let parked = self.store.pending_deposits();
        let fresh: Vec<Deposit> = batch
            .as_ref()
            .map(|b| {
                b.deposits
                    .iter()
                    .filter(|d| !self.store.is_pending(&d.source_tx_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let target_height = batch.as_ref().map(|b| b.to_height);
        report.scanned = batch.as_ref().map(|b| (b.from_height, b.to_height));
        report.deposits = parked.len() + fresh.len();

        if parked.is_empty() && fresh.is_empty() {
            if let Some(height) = target_height {
                self.transition(ControllerState::Persisting);
                self.store.advance_height(height)?;
            }
            self.transition(ControllerState::Idle);
            return Ok(report);
        }

        self.transition(ControllerState::Converting);
        let prices = match self.oracle.snapshot().await {
            Ok(prices) => prices,
            Err(e) => {
                self.transition(ControllerState::Idle);
                return Err(e);
            }
        };

        if !parked.is_empty() {
            info!("Retrying {} parked deposits", parked.len());
        }
        let retry_height = self.store.last_height();
        for deposit in &parked {
            if self.shutdown.is_requested() {
                report.interrupted = true;
                self.transition(ControllerState::Idle);
                return Ok(report);
            }
            let outcome = self.process_deposit(deposit, &prices, retry_height).await?;
            report.record(outcome);
        }

        for (position, deposit) in fresh.iter().enumerate() {
            if self.shutdown.is_requested() {
                report.interrupted = true;
                self.transition(ControllerState::Persisting);
                self.store
                    .advance_height(deposit.block_height.saturating_sub(1))?;
                self.transition(ControllerState::Idle);
                return Ok(report);
            }
            // Once this deposit is handled, everything below the next one is.
            let handled_through = match fresh.get(position + 1) {
                Some(next) => next.block_height.saturating_sub(1),
                None => target_height.unwrap_or(deposit.block_height),
            };
            let outcome = self
                .process_deposit(deposit, &prices, handled_through)
                .await?;
            report.record(outcome);
        }

        if let Some(height) = target_height {
            self.transition(ControllerState::Persisting);
            self.store.advance_height(height)?;
        }
        self.transition(ControllerState::Idle);
        Ok(report)
    }

    /// Take one deposit through conversion, dispatch and persistence.
    ///
    /// Only persistence failures are returned as errors; everything else ends
    /// with the deposit processed or parked.
    async fn process_deposit(
        &mut self,
        deposit: &Deposit,
        prices: &PriceSnapshot,
        handled_through: u64,
    ) -> BridgeResult<DepositOutcome> {
        if self.store.is_processed(&deposit.source_tx_id) {
            debug!("Skipping processed deposit {}", deposit.source_tx_id);
            return Ok(DepositOutcome::Skipped);
        }

        self.transition(ControllerState::Converting);
        let conversion = match convert_deposit(deposit, prices, self.destination_decimals) {
            Ok(conversion) => conversion,
            Err(e) => {
                error!("Cannot convert deposit {}: {}", deposit, e);
                self.transition(ControllerState::Persisting);
                self.store.park(deposit, &e.to_string(), handled_through)?;
                return Ok(DepositOutcome::Parked);
            }
        };

        if conversion.is_dust() {
            warn!(
                "Deposit {} is worth {} USD, below one REVO unit; recording without a mint",
                deposit, conversion.usd_value
            );
            self.transition(ControllerState::Persisting);
            self.store
                .mark_processed(&deposit.source_tx_id, handled_through)?;
            return Ok(DepositOutcome::Dust);
        }

        let request = deposit.mint_request(conversion.destination_amount);
        self.transition(ControllerState::Dispatching);
        match self.dispatcher.dispatch(&request, &self.store).await {
            Ok(receipt) => {
                self.transition(ControllerState::Persisting);
                self.store
                    .mark_processed(&deposit.source_tx_id, handled_through)?;
                info!(
                    "Minted {} REVO units for {} ({}, tx {:?})",
                    request.amount, deposit, receipt.outcome, receipt.tx_hash
                );

                if receipt.outcome != MintOutcome::AlreadyProcessed {
                    if let Some(journal) = &self.journal {
                        if let Err(e) = journal.append(&JournalEntry::new(&conversion, &receipt)) {
                            warn!(
                                "Failed to journal mint for {}: {}",
                                deposit.source_tx_id, e
                            );
                        }
                    }
                }
                Ok(DepositOutcome::Minted)
            }
            Err(e) => {
                error!("Mint failed for deposit {}: {}", deposit, e);
                self.transition(ControllerState::Persisting);
                self.store.park(deposit, &e.to_string(), handled_through)?;
                Ok(DepositOutcome::Parked)
            }
        }
    }
}

impl CycleReport {
    fn record(&mut self, outcome: DepositOutcome) {
        match outcome {
            DepositOutcome::Minted => self.minted += 1,
            DepositOutcome::Skipped => self.skipped += 1,
            DepositOutcome::Dust => self.dust += 1,
            DepositOutcome::Parked => self.parked += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_latches() {
        let (tx, rx) = broadcast::channel(1);
        let mut signal = ShutdownSignal::new(rx);
        assert!(!signal.is_requested());
        tx.send(()).unwrap();
        assert!(signal.is_requested());
        assert!(signal.is_requested());
    }

    #[test]
    fn test_dropped_sender_counts_as_shutdown() {
        let (tx, rx) = broadcast::channel::<()>(1);
        let mut signal = ShutdownSignal::new(rx);
        drop(tx);
        assert!(signal.is_requested());
    }

    #[tokio::test]
    async fn test_wait_returns_after_send() {
        let (tx, rx) = broadcast::channel(1);
        let mut signal = ShutdownSignal::new(rx);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(());
        });
        signal.wait().await;
        assert!(signal.is_requested());
    }

    #[test]
    fn test_report_display() {
        let report = CycleReport {
            scanned: Some((10, 19)),
            deposits: 3,
            minted: 1,
            skipped: 1,
            dust: 0,
            parked: 1,
            interrupted: true,
        };
        assert_eq!(
            report.to_string(),
            "blocks 10-19: 3 deposits, 1 minted, 1 skipped, 0 dust, 1 parked (interrupted)"
        );
        assert_eq!(
            CycleReport::default().to_string(),
            "no new blocks: 0 deposits, 0 minted, 0 skipped, 0 dust, 0 parked"
        );
    }
}
