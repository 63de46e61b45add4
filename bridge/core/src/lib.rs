// Copyright (c) 2024 The Botho Foundation

//! Core types and logic for the REVO bridge.
//!
//! This crate holds the I/O-free parts of the bridge that moves CXS and
//! NEXTEP deposits on nxchain into REVO on the new chain:
//!
//! - Bridged tokens and address handling
//! - Deposits, mint requests and receipts
//! - Fixed-point USD prices and the conversion engine
//! - The durable bridge state record
//! - Configuration structures and the error taxonomy

pub mod config;
pub mod conversion;
pub mod deposit;
pub mod error;
pub mod price;
pub mod state;
pub mod token;

pub use config::{BridgeConfig, BridgeSettings, DestinationConfig, PricingConfig, SourceConfig};
pub use conversion::{convert, convert_deposit, ConversionResult};
pub use deposit::{Deposit, MintOutcome, MintRequest, TxReceipt};
pub use error::{BridgeError, BridgeResult};
pub use price::{PriceSnapshot, UsdPrice};
pub use state::{BridgeState, PendingDeposit};
pub use token::{Asset, SourceToken};
