// Copyright (c) 2024 The Botho Foundation

//! File-backed bridge state.
//!
//! Every mutation is applied to a copy of the state, written to a temporary
//! file, fsynced and renamed over the old file. Only then is the copy
//! swapped into memory, so memory never runs ahead of disk.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use revo_bridge_core::{BridgeError, BridgeResult, BridgeState, Deposit};
use tracing::{debug, info};

/// Durable record of scan progress and processed deposits.
#[derive(Debug)]
pub struct BridgeStateStore {
    path: PathBuf,
    state: BridgeState,
}

impl BridgeStateStore {
    /// Load state from `path`, starting empty if the file does not exist.
    ///
    /// A file that exists but cannot be parsed is an error: starting over
    /// would re-mint every deposit.
    pub fn load(path: impl Into<PathBuf>) -> BridgeResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                BridgeError::StatePersistence(format!(
                    "Failed to read state {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let state: BridgeState = serde_json::from_str(&content).map_err(|e| {
                BridgeError::StatePersistence(format!(
                    "Corrupt state file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            info!(
                "Loaded bridge state from {}: height {}, {} processed, {} pending",
                path.display(),
                state.last_height,
                state.processed.len(),
                state.pending.len()
            );
            state
        } else {
            info!("No state at {}, starting fresh", path.display());
            BridgeState::new()
        };

        Ok(Self { path, state })
    }

    /// Load state and, if nothing has been scanned yet, start at
    /// `start_height`.
    pub fn load_or_start_at(path: impl Into<PathBuf>, start_height: Option<u64>) -> BridgeResult<Self> {
        let mut store = Self::load(path)?;
        if let Some(height) = start_height {
            if store.state.last_height == 0 && store.state.processed.is_empty() {
                info!("Fresh state, scanning from height {}", height);
                store.state = BridgeState::starting_at(height);
            }
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    /// The idempotency oracle consulted before every dispatch.
    pub fn is_processed(&self, tx_id: &str) -> bool {
        self.state.is_processed(tx_id)
    }

    pub fn is_pending(&self, tx_id: &str) -> bool {
        self.state.is_pending(tx_id)
    }

    pub fn last_height(&self) -> u64 {
        self.state.last_height
    }

    pub fn next_scan_height(&self) -> u64 {
        self.state.next_scan_height()
    }

    /// Deposits parked by earlier cycles, in chain order.
    pub fn pending_deposits(&self) -> Vec<Deposit> {
        self.state.pending.iter().map(|p| p.deposit.clone()).collect()
    }

    /// Record `tx_id` as processed and raise the height to `new_height`, in
    /// one write.
    pub fn mark_processed(&mut self, tx_id: &str, new_height: u64) -> BridgeResult<()> {
        let mut next = self.state.clone();
        next.record_processed(tx_id, new_height);
        self.commit(next)
    }

    /// Park a deposit whose dispatch failed and raise the height to
    /// `new_height`, in one write.
    pub fn park(&mut self, deposit: &Deposit, error: &str, new_height: u64) -> BridgeResult<()> {
        let mut next = self.state.clone();
        next.record_pending(deposit, error, new_height);
        self.commit(next)
    }

    /// Raise the scan height. Never lowers it; a no-op skips the write.
    pub fn advance_height(&mut self, new_height: u64) -> BridgeResult<()> {
        if new_height <= self.state.last_height {
            return Ok(());
        }
        let mut next = self.state.clone();
        next.advance_height(new_height);
        self.commit(next)
    }

    fn commit(&mut self, next: BridgeState) -> BridgeResult<()> {
        write_atomic(&self.path, &next)?;
        debug!("Persisted state at height {}", next.last_height);
        self.state = next;
        Ok(())
    }
}

fn write_atomic(path: &Path, state: &BridgeState) -> BridgeResult<()> {
    let persist_err = |what: &str, e: std::io::Error| {
        BridgeError::StatePersistence(format!("{} {}: {}", what, path.display(), e))
    };

    let content = serde_json::to_vec_pretty(state)
        .map_err(|e| BridgeError::StatePersistence(format!("Failed to serialize state: {}", e)))?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp_path).map_err(|e| persist_err("Failed to create temp for", e))?;
    file.write_all(&content)
        .map_err(|e| persist_err("Failed to write temp for", e))?;
    file.sync_all()
        .map_err(|e| persist_err("Failed to sync temp for", e))?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(|e| persist_err("Failed to replace", e))?;
    sync_parent_dir(path).map_err(|e| persist_err("Failed to sync directory of", e))
}

/// Make the rename itself durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use chrono::Utc;
    use revo_bridge_core::SourceToken;
    use tempfile::tempdir;

    fn deposit(tx: &str, height: u64) -> Deposit {
        Deposit {
            source_tx_id: tx.to_string(),
            block_height: height,
            tx_index: 0,
            source_token: SourceToken::Nextep,
            sender: Address::repeat_byte(0x33),
            amount: U256::from(42u8),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let store = BridgeStateStore::load(dir.path().join("state.json")).unwrap();
        assert_eq!(store.last_height(), 0);
        assert_eq!(store.next_scan_height(), 1);
    }

    #[test]
    fn test_mark_processed_persists_both_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = BridgeStateStore::load(&path).unwrap();
        store.mark_processed("0xaa", 99).unwrap();
        assert!(store.is_processed("0xaa"));

        let reloaded = BridgeStateStore::load(&path).unwrap();
        assert!(reloaded.is_processed("0xaa"));
        assert_eq!(reloaded.last_height(), 99);
        assert_eq!(reloaded.next_scan_height(), 100);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_height_never_decreases() {
        let dir = tempdir().unwrap();
        let mut store = BridgeStateStore::load(dir.path().join("state.json")).unwrap();
        store.advance_height(50).unwrap();
        store.advance_height(10).unwrap();
        store.mark_processed("0xbb", 20).unwrap();
        assert_eq!(store.last_height(), 50);
    }

    #[test]
    fn test_park_then_process_clears_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = BridgeStateStore::load(&path).unwrap();

        let d = deposit("0xcc", 7);
        store.park(&d, "insufficient funds", 6).unwrap();
        store.park(&d, "insufficient funds", 6).unwrap();
        assert!(store.is_pending("0xcc"));
        assert_eq!(store.state().pending[0].attempts, 2);

        let reloaded = BridgeStateStore::load(&path).unwrap();
        assert_eq!(reloaded.pending_deposits(), vec![d.clone()]);

        store.mark_processed("0xcc", 6).unwrap();
        assert!(!store.is_pending("0xcc"));
        assert!(BridgeStateStore::load(&path).unwrap().state().pending.is_empty());
    }

    #[test]
    fn test_failed_write_leaves_memory_and_disk_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = BridgeStateStore::load(&path).unwrap();
        store.mark_processed("0x01", 5).unwrap();

        // Make the temp path a directory so the write fails
        std::fs::create_dir(dir.path().join("state.json.tmp")).unwrap();

        let err = store.mark_processed("0x02", 6).unwrap_err();
        assert!(matches!(err, BridgeError::StatePersistence(_)));
        assert!(!store.is_processed("0x02"));
        assert_eq!(store.last_height(), 5);

        std::fs::remove_dir(dir.path().join("state.json.tmp")).unwrap();
        let reloaded = BridgeStateStore::load(&path).unwrap();
        assert!(reloaded.is_processed("0x01"));
        assert!(!reloaded.is_processed("0x02"));
    }

    #[test]
    fn test_corrupt_file_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            BridgeStateStore::load(&path),
            Err(BridgeError::StatePersistence(_))
        ));
    }

    #[test]
    fn test_legacy_state_without_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"last_height": 1234, "processed": ["0xabc"], "last_run": "2024-01-01"}"#,
        )
        .unwrap();

        let store = BridgeStateStore::load(&path).unwrap();
        assert_eq!(store.last_height(), 1234);
        assert!(store.is_processed("0xabc"));
        assert!(store.state().pending.is_empty());
    }

    #[test]
    fn test_start_height_only_applies_to_fresh_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = BridgeStateStore::load_or_start_at(&path, Some(500)).unwrap();
        assert_eq!(store.next_scan_height(), 500);
        store.advance_height(600).unwrap();

        let store = BridgeStateStore::load_or_start_at(&path, Some(500)).unwrap();
        assert_eq!(store.next_scan_height(), 601);
    }
}
