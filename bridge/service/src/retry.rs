// Copyright (c) 2024 The Botho Foundation

//! Backoff used around every external call.
//!
//! Callers wrap an operation with `backon`'s [`Retryable`](backon::Retryable)
//! and retry only errors for which [`BridgeError::is_retryable`] holds.

use std::time::Duration;

use backon::ExponentialBuilder;
use revo_bridge_core::{BridgeError, BridgeSettings};
use tracing::warn;

/// Exponential backoff built from the `[bridge]` retry settings.
pub fn backoff_from_settings(settings: &BridgeSettings) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(settings.retry_base_delay_ms))
        .with_max_delay(Duration::from_millis(settings.retry_max_delay_ms))
        .with_max_times(settings.max_retries as usize)
}

/// A single attempt.
pub fn no_retry() -> ExponentialBuilder {
    ExponentialBuilder::default().with_max_times(0)
}

/// Retry notification that logs what is being retried.
pub fn log_retry(what: &str) -> impl FnMut(&BridgeError, Duration) + '_ {
    move |err, delay| warn!("{} failed ({}), retrying in {:?}", what, err, delay)
}
