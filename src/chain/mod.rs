//! Chain module - transport capabilities consumed by the swap core
//!
//! This module provides:
//! - The `ChainClient` capability (code reads, calls, submissions, receipt logs)
//! - EVM JSON-RPC client with multi-RPC failover
//! - Tron client over the TronGrid HTTP API
//! - Bounded polling for escrow-creation events

pub mod evm;
pub mod tron;
pub mod watcher;

pub use evm::EvmClient;
pub use tron::TronClient;
pub use watcher::{Confirmed, EscrowWatcher};

use crate::address::{CanonicalAddress, ChainFamily};
use crate::error::RelayerResult;

use async_trait::async_trait;
use ethers::types::{Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// Chain-neutral event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub address: CanonicalAddress,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

/// Contract call or transaction to submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: CanonicalAddress,
    pub data: Bytes,
    /// Native value attached to the call
    pub value: U256,
}

/// A transaction included in a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTx {
    pub tx_hash: H256,
    pub block_hash: H256,
    pub block_number: u64,
    /// Unix seconds
    pub block_timestamp: u64,
}

/// Receipt view of an included transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxLogs {
    pub tx: SubmittedTx,
    /// False when execution reverted
    pub success: bool,
    pub logs: Vec<LogRecord>,
}

/// Transport capability for one chain.
///
/// `send_transaction` is not idempotent. Once a transaction may have reached
/// the network, failures carry its hash and must not be resubmitted blindly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    fn family(&self) -> ChainFamily;

    /// Account that signs submitted transactions
    fn sender(&self) -> CanonicalAddress;

    async fn code_at(&self, address: CanonicalAddress) -> RelayerResult<Bytes>;

    async fn call(&self, request: TxRequest) -> RelayerResult<Bytes>;

    /// Submit, then wait for inclusion
    async fn send_transaction(&self, request: TxRequest) -> RelayerResult<SubmittedTx>;

    /// Logs of an included transaction; `None` while it is still pending
    async fn transaction_logs(&self, tx_hash: H256) -> RelayerResult<Option<TxLogs>>;
}
