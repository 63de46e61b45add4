// Copyright (c) 2024 The Botho Foundation

//! Error types for the REVO bridge.

use thiserror::Error;

/// Errors that can occur anywhere in the bridge pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A chain RPC endpoint could not be reached or returned garbage.
    #[error("RPC unavailable: {0}")]
    RpcUnavailable(String),

    /// No price could be resolved for an asset.
    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),

    /// A configured or fetched price is zero, negative or malformed.
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// The destination chain rejected a submission for a reason that may
    /// clear up on retry.
    #[error("Transient submission failure: {reason}")]
    SubmissionTransient {
        reason: String,
        /// The cached account sequence is stale and must be refetched
        resync_sequence: bool,
    },

    /// The destination chain rejected a submission permanently.
    #[error("Fatal submission failure: {0}")]
    SubmissionFatal(String),

    /// Bridge state could not be written to disk.
    #[error("State persistence failure: {0}")]
    StatePersistence(String),

    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A conversion result does not fit the destination amount type.
    #[error("Conversion overflow: {0}")]
    ConversionOverflow(String),
}

impl BridgeError {
    /// Shorthand for a transient submission failure.
    pub fn transient(reason: impl Into<String>) -> Self {
        BridgeError::SubmissionTransient {
            reason: reason.into(),
            resync_sequence: false,
        }
    }

    /// Shorthand for a sequence conflict, which is transient but
    /// invalidates the cached sequence.
    pub fn sequence_conflict(reason: impl Into<String>) -> Self {
        BridgeError::SubmissionTransient {
            reason: reason.into(),
            resync_sequence: true,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::RpcUnavailable(_)
                | BridgeError::PriceUnavailable(_)
                | BridgeError::SubmissionTransient { .. }
        )
    }

    /// Whether the process must stop rather than continue to the next cycle.
    pub fn is_fatal_to_process(&self) -> bool {
        matches!(self, BridgeError::StatePersistence(_))
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
