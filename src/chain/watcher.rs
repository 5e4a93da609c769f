//! Bounded polling for escrow-creation events

use super::{ChainClient, LogRecord, SubmittedTx, TxLogs};
use crate::error::{RelayerResult, SwapError};
use crate::events::{DstEscrowCreated, EscrowEventDecoder, SrcEscrowCreated};

use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// An event together with the transaction that emitted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed<T> {
    pub event: T,
    pub tx: SubmittedTx,
}

/// Watches one chain's transaction receipts for escrow factory events
pub struct EscrowWatcher {
    client: Arc<dyn ChainClient>,
    decoder: EscrowEventDecoder,
    poll_interval: Duration,
    timeout: Duration,
}

impl EscrowWatcher {
    pub fn new(client: Arc<dyn ChainClient>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            client,
            decoder: EscrowEventDecoder::new(),
            poll_interval,
            timeout,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.client.chain_id()
    }

    /// Wait for the `SrcEscrowCreated` emitted by an order fill
    pub async fn wait_for_src_escrow_created(
        &self,
        tx_hash: H256,
        cancel: &CancellationToken,
    ) -> RelayerResult<Confirmed<SrcEscrowCreated>> {
        self.wait_for(tx_hash, cancel, |decoder, logs| {
            decoder.find_src_escrow_created(logs)
        })
        .await
    }

    /// Wait for the `DstEscrowCreated` emitted by a destination deploy
    pub async fn wait_for_dst_escrow_created(
        &self,
        tx_hash: H256,
        cancel: &CancellationToken,
    ) -> RelayerResult<Confirmed<DstEscrowCreated>> {
        self.wait_for(tx_hash, cancel, |decoder, logs| {
            decoder.find_dst_escrow_created(logs)
        })
        .await
    }

    /// Wait until a broadcast transaction is included
    pub async fn wait_for_inclusion(
        &self,
        tx_hash: H256,
        cancel: &CancellationToken,
    ) -> RelayerResult<SubmittedTx> {
        let confirmed = self.wait_for(tx_hash, cancel, |_, _| Some(())).await?;
        Ok(confirmed.tx)
    }

    async fn wait_for<T>(
        &self,
        tx_hash: H256,
        cancel: &CancellationToken,
        select: impl Fn(&EscrowEventDecoder, &[LogRecord]) -> Option<T>,
    ) -> RelayerResult<Confirmed<T>> {
        let chain_id = self.client.chain_id();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Chain {}: stopped waiting for {:?}", chain_id, tx_hash);
                    return Err(SwapError::Aborted);
                }
                _ = &mut deadline => {
                    return Err(SwapError::EscrowCreationTimeout { tx_hash, polls });
                }
                _ = ticker.tick() => {}
            }

            polls += 1;
            crate::metrics::record_watcher_poll(chain_id);

            // A hung lookup must not outlive the deadline or the token
            let lookup = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Chain {}: stopped waiting for {:?}", chain_id, tx_hash);
                    return Err(SwapError::Aborted);
                }
                _ = &mut deadline => {
                    return Err(SwapError::EscrowCreationTimeout { tx_hash, polls });
                }
                lookup = self.client.transaction_logs(tx_hash) => lookup,
            };

            match lookup {
                Ok(Some(TxLogs { tx, success, logs })) => {
                    if !success {
                        return Err(SwapError::TransactionReverted { chain_id, tx_hash });
                    }
                    if let Some(event) = select(&self.decoder, &logs) {
                        debug!("Chain {}: escrow event found after {} polls", chain_id, polls);
                        return Ok(Confirmed { event, tx });
                    }
                    debug!(
                        "Chain {}: receipt for {:?} has no matching event ({} logs)",
                        chain_id,
                        tx_hash,
                        logs.len()
                    );
                }
                Ok(None) => {
                    debug!("Chain {}: {:?} not yet mined (poll {})", chain_id, tx_hash, polls);
                }
                Err(e) => {
                    warn!("Chain {}: receipt lookup for {:?} failed: {}", chain_id, tx_hash, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::CanonicalAddress;
    use crate::chain::MockChainClient;
    use crate::events::topics;
    use ethers::abi::{encode, Token};
    use ethers::types::Bytes;

    fn included(tx_hash: H256, success: bool, logs: Vec<LogRecord>) -> TxLogs {
        TxLogs {
            tx: SubmittedTx {
                tx_hash,
                block_hash: H256::repeat_byte(0xbb),
                block_number: 42,
                block_timestamp: 1_700_000_000,
            },
            success,
            logs,
        }
    }

    fn dst_created_log(escrow: CanonicalAddress) -> LogRecord {
        LogRecord {
            address: CanonicalAddress::from_bytes([0xfb; 20]),
            topics: vec![*topics::DST_ESCROW_CREATED],
            data: Bytes::from(encode(&[
                Token::Address(escrow.h160()),
                Token::FixedBytes(vec![0x0b; 32]),
                Token::Uint(CanonicalAddress::from_bytes([0x02; 20]).to_word()),
            ])),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_finds_event_once_mined() {
        let escrow = CanonicalAddress::from_bytes([0x44; 20]);
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(84_532u64);

        let mut calls = 0;
        client.expect_transaction_logs().returning(move |hash| {
            calls += 1;
            match calls {
                1 => Ok(None),
                2 => Err(SwapError::ChainRequest {
                    chain_id: 84_532,
                    message: "503".to_string(),
                }),
                3 => Ok(Some(included(hash, true, vec![]))),
                _ => Ok(Some(included(hash, true, vec![dst_created_log(escrow)]))),
            }
        });

        let watcher = EscrowWatcher::new(
            Arc::new(client),
            Duration::from_secs(1),
            Duration::from_secs(30),
        );
        let created = watcher
            .wait_for_dst_escrow_created(H256::repeat_byte(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(created.event.escrow, escrow);
        assert_eq!(created.tx.block_timestamp, 1_700_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_receipt_fails_fast() {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(7u64);
        client
            .expect_transaction_logs()
            .returning(|hash| Ok(Some(included(hash, false, vec![]))));

        let watcher = EscrowWatcher::new(
            Arc::new(client),
            Duration::from_secs(1),
            Duration::from_secs(30),
        );
        let err = watcher
            .wait_for_src_escrow_created(H256::repeat_byte(9), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::TransactionReverted { chain_id: 7, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inclusion_ignores_log_contents() {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(7u64);
        client
            .expect_transaction_logs()
            .returning(|hash| Ok(Some(included(hash, true, vec![]))));

        let watcher = EscrowWatcher::new(
            Arc::new(client),
            Duration::from_secs(1),
            Duration::from_secs(30),
        );
        let tx = watcher
            .wait_for_inclusion(H256::repeat_byte(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(tx.tx_hash, H256::repeat_byte(5));
        assert_eq!(tx.block_number, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_bounded_polls() {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(1u64);
        client.expect_transaction_logs().returning(|_| Ok(None));

        let watcher = EscrowWatcher::new(
            Arc::new(client),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        let tx_hash = H256::repeat_byte(2);
        let err = watcher
            .wait_for_src_escrow_created(tx_hash, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            SwapError::EscrowCreationTimeout { tx_hash: hash, polls } => {
                assert_eq!(hash, tx_hash);
                assert!((4..=6).contains(&polls), "polls = {}", polls);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts() {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(1u64);
        client.expect_transaction_logs().returning(|_| Ok(None));

        let watcher = EscrowWatcher::new(
            Arc::new(client),
            Duration::from_secs(1),
            Duration::from_secs(600),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let err = watcher
            .wait_for_src_escrow_created(H256::repeat_byte(3), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::Aborted));
    }

    /// Node that accepts receipt requests and never answers
    struct StalledNode;

    #[async_trait::async_trait]
    impl ChainClient for StalledNode {
        fn chain_id(&self) -> u64 {
            84_532
        }

        fn family(&self) -> crate::address::ChainFamily {
            crate::address::ChainFamily::Evm
        }

        fn sender(&self) -> CanonicalAddress {
            CanonicalAddress::ZERO
        }

        async fn code_at(&self, _address: CanonicalAddress) -> RelayerResult<Bytes> {
            Ok(Bytes::new())
        }

        async fn call(&self, _request: crate::chain::TxRequest) -> RelayerResult<Bytes> {
            Ok(Bytes::new())
        }

        async fn send_transaction(&self, _request: crate::chain::TxRequest) -> RelayerResult<SubmittedTx> {
            std::future::pending().await
        }

        async fn transaction_logs(&self, _tx_hash: H256) -> RelayerResult<Option<TxLogs>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_lookup_still_times_out() {
        let watcher = EscrowWatcher::new(
            Arc::new(StalledNode),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        let started = tokio::time::Instant::now();
        let err = watcher
            .wait_for_dst_escrow_created(H256::repeat_byte(6), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SwapError::EscrowCreationTimeout { polls: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_lookup_observes_cancellation() {
        let watcher = EscrowWatcher::new(
            Arc::new(StalledNode),
            Duration::from_secs(1),
            Duration::from_secs(600),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let err = watcher
            .wait_for_inclusion(H256::repeat_byte(7), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::Aborted));
    }
}
