//! Error types for the steward relayer

use thiserror::Error;

/// Main error type for the transaction sender
#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Chain I/O error: {0}")]
    ChainIo(String),

    #[error("Gas estimation error: {0}")]
    Estimation(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Nonce error: {0}")]
    Nonce(String),

    #[error("Cannot bump {component}: escalated value would not exceed the previous attempt")]
    CannotBump { component: &'static str },

    #[error("Replacement transaction underpriced")]
    Underpriced,

    #[error("Transaction {hash} not found")]
    TxNotFound { hash: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: &'static str, to: &'static str },
}

impl SenderError {
    /// Check if the error resolves itself on a later check tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SenderError::ChainIo(_) | SenderError::CannotBump { .. } | SenderError::Underpriced
        )
    }

    /// Classify a raw-broadcast failure coming back from the node.
    ///
    /// geth rejects a same-nonce replacement whose fees grow by less than its
    /// price-bump threshold with "replacement transaction underpriced"; that
    /// rejection aborts the resubmit instead of being retried verbatim.
    pub fn from_broadcast<E: std::fmt::Display>(err: E) -> Self {
        let msg = err.to_string();
        if msg.contains("underpriced") {
            SenderError::Underpriced
        } else {
            SenderError::ChainIo(msg)
        }
    }
}

/// Result type for sender operations
pub type SenderResult<T> = Result<T, SenderError>;
