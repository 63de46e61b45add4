// Copyright (c) 2024 The Botho Foundation

//! Append-only JSON-lines journal of completed mints.
//!
//! The journal is for operators and auditors. The bridge never reads it back;
//! idempotency rests on the state store alone.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use revo_bridge_core::{
    token::format_address, ConversionResult, MintOutcome, SourceToken, TxReceipt, UsdPrice,
};
use serde::{Deserialize, Serialize};

/// One completed mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub source_tx_id: String,
    pub block_height: u64,
    pub source_token: SourceToken,
    pub sender: String,
    /// Deposited amount in the token's smallest unit
    pub amount: String,
    pub usd_value: UsdPrice,
    pub token_price: UsdPrice,
    pub revo_price: UsdPrice,
    /// Minted amount in the destination's smallest unit
    pub revo_amount: String,
    pub mint_tx: Option<String>,
    pub outcome: MintOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn new(conversion: &ConversionResult<'_>, receipt: &TxReceipt) -> Self {
        let deposit = conversion.deposit;
        Self {
            source_tx_id: deposit.source_tx_id.clone(),
            block_height: deposit.block_height,
            source_token: deposit.source_token,
            sender: format_address(&deposit.sender),
            amount: deposit.amount.to_string(),
            usd_value: conversion.usd_value,
            token_price: conversion.token_price,
            revo_price: conversion.destination_price,
            revo_amount: conversion.destination_amount.to_string(),
            mint_tx: receipt.tx_hash.clone(),
            outcome: receipt.outcome,
            recorded_at: Utc::now(),
        }
    }
}

/// Writer for the mint journal.
#[derive(Debug, Clone)]
pub struct MintJournal {
    path: PathBuf,
}

impl MintJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single line.
    pub fn append(&self, entry: &JournalEntry) -> io::Result<()> {
        let mut line = serde_json::to_string(entry).map_err(io::Error::other)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}
