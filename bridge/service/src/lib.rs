// Copyright (c) 2024 The Botho Foundation

//! REVO bridge service.
//!
//! Watches nxchain for CXS and NEXTEP deposits to the bridge address and
//! mints the USD-equivalent amount of REVO to each depositor, exactly once
//! per deposit.

pub mod chains;
pub mod cli;
pub mod controller;
pub mod dispatcher;
pub mod journal;
pub mod oracle;
pub mod retry;
pub mod rpc;
pub mod scanner;
pub mod store;

pub use controller::{BridgeController, ControllerState, CycleReport, ShutdownSignal};
pub use dispatcher::MintDispatcher;
pub use oracle::{PriceOracle, PriceProvider, RemotePriceProvider, StaticPriceProvider};
pub use scanner::{LedgerScanner, ScanBatch};
pub use store::BridgeStateStore;
