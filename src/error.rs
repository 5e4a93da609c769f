//! Error types for the HTLC relayer

use crate::address::ChainFamily;
use crate::timelock::{EscrowAction, EscrowWindow, Side};

use ethers::types::H256;
use thiserror::Error;

/// Main error type for swap orchestration
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Invalid {family} address format: {input}")]
    InvalidAddressFormat { family: ChainFamily, input: String },

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid amount for {field}: must be greater than zero")]
    InvalidAmount { field: &'static str },

    #[error("Invalid timelock schedule: {0}")]
    InvalidTimelockSchedule(String),

    #[error("Contract not found at {address} on chain {chain_id}")]
    ContractNotFound { chain_id: u64, address: String },

    #[error("Submission failed on chain {chain_id}: {message}")]
    SubmissionFailed {
        chain_id: u64,
        message: String,
        /// Set when the transaction reached the network before the failure
        tx_hash: Option<H256>,
    },

    #[error("Transaction {tx_hash:?} reverted on chain {chain_id}")]
    TransactionReverted { chain_id: u64, tx_hash: H256 },

    #[error("Escrow creation not observed for tx {tx_hash:?} after {polls} polls")]
    EscrowCreationTimeout { tx_hash: H256, polls: u32 },

    #[error("Secret does not match the escrow hash lock")]
    SecretMismatch,

    #[error("{action} not permitted on {side} escrow during {window}")]
    ActionNotPermitted {
        side: Side,
        action: EscrowAction,
        window: EscrowWindow,
    },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Event decoding error: {0}")]
    EventDecoding(String),

    #[error("Chain {chain_id} request failed: {message}")]
    ChainRequest { chain_id: u64, message: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Journal error: {0}")]
    Journal(#[from] std::io::Error),

    #[error("Operation aborted")]
    Aborted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwapError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwapError::SubmissionFailed { .. }
                | SwapError::EscrowCreationTimeout { .. }
                | SwapError::ChainRequest { .. }
        )
    }

    /// Failures known to have happened before the transaction left the
    /// process; the only submissions that may be sent again
    pub fn failed_before_broadcast(&self) -> bool {
        matches!(self, SwapError::SubmissionFailed { tx_hash: None, .. })
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            SwapError::ContractNotFound { .. } | SwapError::InvalidSignature(_)
        )
    }

    /// Hash of a transaction that reached the network before the error, if any
    pub fn broadcast_tx(&self) -> Option<H256> {
        match self {
            SwapError::SubmissionFailed { tx_hash, .. } => *tx_hash,
            SwapError::EscrowCreationTimeout { tx_hash, .. } => Some(*tx_hash),
            SwapError::TransactionReverted { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, SwapError>;
