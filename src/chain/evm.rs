//! EVM chain client with multi-RPC support and automatic failover

use super::{ChainClient, LogRecord, SubmittedTx, TxLogs, TxRequest};
use crate::address::{CanonicalAddress, ChainFamily};
use crate::error::{RelayerResult, SwapError};

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionRequest, H256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on waiting for a submitted transaction's receipt
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// JSON-RPC client over a list of HTTP endpoints
pub struct EvmClient {
    chain_id: u64,
    /// HTTP providers (multiple for failover)
    providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    wallet: LocalWallet,
    confirmations: usize,
    receipt_timeout: Duration,
}

impl EvmClient {
    /// Create a client; invalid URLs are skipped, at least one must remain
    pub fn new(
        chain_id: u64,
        rpc_urls: &[String],
        wallet: LocalWallet,
        confirmations: usize,
    ) -> RelayerResult<Self> {
        let mut providers = Vec::new();

        for url in rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    providers.push(provider.interval(Duration::from_millis(500)));
                    debug!("Added HTTP provider for chain {}: {}", chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(SwapError::ChainRequest {
                chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain_id,
            providers,
            current_provider: AtomicUsize::new(0),
            wallet: wallet.with_chain_id(chain_id),
            confirmations,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        })
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    fn request_error(&self, message: impl Into<String>) -> SwapError {
        SwapError::ChainRequest {
            chain_id: self.chain_id,
            message: message.into(),
        }
    }

    fn typed(request: &TxRequest) -> TypedTransaction {
        TransactionRequest::new()
            .to(request.to.h160())
            .data(request.data.clone())
            .value(request.value)
            .into()
    }

    async fn block_timestamp(&self, block_hash: H256) -> RelayerResult<u64> {
        for _ in 0..self.providers.len() {
            match self.http().get_block(block_hash).await {
                Ok(Some(block)) => return Ok(block.timestamp.as_u64()),
                Ok(None) => return Err(self.request_error(format!("block {:?} not found", block_hash))),
                Err(e) => {
                    warn!("Failed to get block from chain {}: {}", self.chain_id, e);
                    self.failover();
                }
            }
        }
        Err(self.request_error("All providers failed to get block"))
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn sender(&self) -> CanonicalAddress {
        self.wallet.address().into()
    }

    async fn code_at(&self, address: CanonicalAddress) -> RelayerResult<Bytes> {
        for _ in 0..self.providers.len() {
            match self.http().get_code(address.h160(), None).await {
                Ok(code) => return Ok(code),
                Err(e) => {
                    warn!("Failed to get code from chain {}: {}", self.chain_id, e);
                    self.failover();
                }
            }
        }
        Err(self.request_error("All providers failed to get code"))
    }

    async fn call(&self, request: TxRequest) -> RelayerResult<Bytes> {
        let tx = Self::typed(&request);
        for _ in 0..self.providers.len() {
            match self.http().call(&tx, None).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!("Call to {} failed on chain {}: {}", request.to, self.chain_id, e);
                    self.failover();
                }
            }
        }
        Err(self.request_error(format!("All providers failed to call {}", request.to)))
    }

    async fn send_transaction(&self, request: TxRequest) -> RelayerResult<SubmittedTx> {
        // Submissions go to one provider only; no failover once signed
        let client = SignerMiddleware::new(self.http().clone(), self.wallet.clone());
        let pending = client
            .send_transaction(Self::typed(&request), None)
            .await
            .map_err(|e| SwapError::SubmissionFailed {
                chain_id: self.chain_id,
                message: e.to_string(),
                tx_hash: None,
            })?;
        let tx_hash = *pending;
        info!("Chain {}: submitted tx {:?} to {}", self.chain_id, tx_hash, request.to);

        // From here on the transaction may be on chain; every failure carries its hash
        let broadcast = |message: String| SwapError::SubmissionFailed {
            chain_id: self.chain_id,
            message,
            tx_hash: Some(tx_hash),
        };

        let receipt = tokio::time::timeout(
            self.receipt_timeout,
            pending.confirmations(self.confirmations),
        )
        .await
        .map_err(|_| broadcast(format!("no receipt after {:?}", self.receipt_timeout)))?
        .map_err(|e| broadcast(e.to_string()))?
        .ok_or_else(|| broadcast("transaction dropped from mempool".to_string()))?;

        if receipt.status.map_or(false, |status| status.is_zero()) {
            return Err(SwapError::TransactionReverted {
                chain_id: self.chain_id,
                tx_hash,
            });
        }

        let block_hash = receipt
            .block_hash
            .ok_or_else(|| broadcast("receipt without block hash".to_string()))?;
        let block_number = receipt.block_number.map(|n| n.as_u64()).unwrap_or_default();
        let block_timestamp = self
            .block_timestamp(block_hash)
            .await
            .map_err(|e| broadcast(e.to_string()))?;

        Ok(SubmittedTx {
            tx_hash,
            block_hash,
            block_number,
            block_timestamp,
        })
    }

    async fn transaction_logs(&self, tx_hash: H256) -> RelayerResult<Option<TxLogs>> {
        let receipt = self
            .http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| {
                self.failover();
                self.request_error(e.to_string())
            })?;

        let receipt = match receipt {
            Some(receipt) => receipt,
            None => return Ok(None),
        };
        let block_hash = match receipt.block_hash {
            Some(hash) => hash,
            None => return Ok(None),
        };
        let block_timestamp = self.block_timestamp(block_hash).await?;

        Ok(Some(TxLogs {
            tx: SubmittedTx {
                tx_hash,
                block_hash,
                block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
                block_timestamp,
            },
            success: receipt.status.map_or(true, |status| !status.is_zero()),
            logs: receipt
                .logs
                .into_iter()
                .map(|log| LogRecord {
                    address: log.address.into(),
                    topics: log.topics,
                    data: log.data,
                })
                .collect(),
        }))
    }
}
