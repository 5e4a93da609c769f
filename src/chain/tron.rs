//! Tron chain client over the TronGrid HTTP API
//!
//! Addresses go over the wire in 21-byte hex form (`41` + 20 bytes).
//! Transactions are built by the node (`triggersmartcontract`), signed
//! locally over their `txID`, then broadcast. Receipt logs come back with
//! 20-byte hex addresses and unprefixed hex topics, and are normalized into
//! [`LogRecord`]s.

use super::{ChainClient, LogRecord, SubmittedTx, TxLogs, TxRequest};
use crate::address::codec::to_tron_hex;
use crate::address::{CanonicalAddress, ChainFamily};
use crate::error::{RelayerResult, SwapError};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Bytes, H256};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the TronGrid API key
const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";

/// Connection and submission settings for a Tron node
#[derive(Debug, Clone)]
pub struct TronClientConfig {
    pub chain_id: u64,
    /// e.g. `https://nile.trongrid.io`
    pub base_url: String,
    pub api_key: Option<String>,
    /// Energy fee limit in SUN
    pub fee_limit: u64,
    pub receipt_poll_interval: Duration,
    pub receipt_max_polls: u32,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

pub struct TronClient {
    config: TronClientConfig,
    http: reqwest::Client,
    wallet: LocalWallet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TriggerResult {
    result: bool,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TriggerResponse {
    result: TriggerResult,
    constant_result: Vec<String>,
    transaction: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BroadcastResponse {
    result: bool,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TronLog {
    address: String,
    topics: Vec<String>,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TronReceipt {
    result: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TransactionInfo {
    id: Option<String>,
    block_number: u64,
    block_time_stamp: u64,
    receipt: TronReceipt,
    log: Vec<TronLog>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BlockResponse {
    #[serde(rename = "blockID")]
    block_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContractResponse {
    bytecode: String,
}

impl TronClient {
    pub fn new(config: TronClientConfig, wallet: LocalWallet) -> RelayerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SwapError::Config(format!("tron http client: {}", e)))?;
        Ok(Self {
            config,
            http,
            wallet,
        })
    }

    fn request_error(&self, message: impl Into<String>) -> SwapError {
        SwapError::ChainRequest {
            chain_id: self.config.chain_id,
            message: message.into(),
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(&self, path: &str, body: &Value) -> RelayerResult<T> {
        let url = format!("{}/wallet/{}", self.config.base_url.trim_end_matches('/'), path);
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.request_error(format!("{}: {}", path, e)))?;
        response
            .json::<T>()
            .await
            .map_err(|e| self.request_error(format!("{}: invalid response: {}", path, e)))
    }

    fn owner_hex(&self) -> String {
        to_tron_hex(&self.sender())
    }

    async fn transaction_info(&self, tx_hash: H256) -> RelayerResult<Option<TransactionInfo>> {
        let info: TransactionInfo = self
            .post(
                "gettransactioninfobyid",
                &json!({ "value": hex::encode(tx_hash.as_bytes()) }),
            )
            .await?;
        // Unknown or pending transactions come back as `{}`
        Ok(info.id.is_some().then_some(info))
    }

    async fn block_hash(&self, block_number: u64) -> RelayerResult<H256> {
        let block: BlockResponse = self
            .post("getblockbynum", &json!({ "num": block_number }))
            .await?;
        decode_h256(&block.block_id)
            .ok_or_else(|| self.request_error(format!("block {} has no id", block_number)))
    }

    async fn sign_and_broadcast(&self, mut transaction: Value) -> RelayerResult<H256> {
        let tx_id = transaction
            .get("txID")
            .and_then(Value::as_str)
            .and_then(decode_h256)
            .ok_or_else(|| self.submission_error("node returned a transaction without txID", None))?;

        let signature = self
            .wallet
            .sign_hash(tx_id)
            .map_err(|e| self.submission_error(format!("signing failed: {}", e), None))?;
        transaction["signature"] = json!([hex::encode(signature.to_vec())]);

        let response: BroadcastResponse = self
            .post("broadcasttransaction", &transaction)
            .await
            .map_err(|e| self.submission_error(e.to_string(), Some(tx_id)))?;
        if !response.result {
            // Rejected by the node before entering the mempool
            return Err(self.submission_error(
                format!(
                    "broadcast rejected ({}): {}",
                    response.code.unwrap_or_default(),
                    decode_message(response.message.as_deref())
                ),
                None,
            ));
        }

        Ok(tx_id)
    }

    fn submission_error(&self, message: impl Into<String>, tx_hash: Option<H256>) -> SwapError {
        SwapError::SubmissionFailed {
            chain_id: self.config.chain_id,
            message: message.into(),
            tx_hash,
        }
    }
}

#[async_trait]
impl ChainClient for TronClient {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Tron
    }

    fn sender(&self) -> CanonicalAddress {
        self.wallet.address().into()
    }

    async fn code_at(&self, address: CanonicalAddress) -> RelayerResult<Bytes> {
        let contract: ContractResponse = self
            .post("getcontract", &json!({ "value": to_tron_hex(&address) }))
            .await?;
        hex::decode(&contract.bytecode)
            .map(Bytes::from)
            .map_err(|e| self.request_error(format!("invalid bytecode: {}", e)))
    }

    async fn call(&self, request: TxRequest) -> RelayerResult<Bytes> {
        let call_value = sun_value(&request)
            .ok_or_else(|| self.request_error("call value exceeds SUN range"))?;
        let body = json!({
            "owner_address": self.owner_hex(),
            "contract_address": to_tron_hex(&request.to),
            "data": hex::encode(&request.data),
            "call_value": call_value,
        });
        let response: TriggerResponse = self.post("triggerconstantcontract", &body).await?;
        if !response.result.result {
            return Err(self.request_error(format!(
                "constant call to {} failed: {}",
                request.to,
                decode_message(response.result.message.as_deref())
            )));
        }

        let output = response.constant_result.first().map(String::as_str).unwrap_or_default();
        hex::decode(output)
            .map(Bytes::from)
            .map_err(|e| self.request_error(format!("invalid call output: {}", e)))
    }

    async fn send_transaction(&self, request: TxRequest) -> RelayerResult<SubmittedTx> {
        let call_value = sun_value(&request)
            .ok_or_else(|| self.submission_error("call value exceeds SUN range", None))?;

        let body = json!({
            "owner_address": self.owner_hex(),
            "contract_address": to_tron_hex(&request.to),
            "data": hex::encode(&request.data),
            "call_value": call_value,
            "fee_limit": self.config.fee_limit,
        });
        let response: TriggerResponse = self
            .post("triggersmartcontract", &body)
            .await
            .map_err(|e| self.submission_error(e.to_string(), None))?;
        let transaction = match (response.result.result, response.transaction) {
            (true, Some(transaction)) => transaction,
            _ => {
                return Err(self.submission_error(
                    format!(
                        "trigger rejected: {}",
                        decode_message(response.result.message.as_deref())
                    ),
                    None,
                ))
            }
        };

        let tx_hash = self.sign_and_broadcast(transaction).await?;
        info!(
            "Chain {}: broadcast tx {:?} to {}",
            self.config.chain_id, tx_hash, request.to
        );

        let mut ticker = tokio::time::interval(self.config.receipt_poll_interval);
        for poll in 0..self.config.receipt_max_polls {
            ticker.tick().await;
            let info = match self.transaction_info(tx_hash).await {
                Ok(Some(info)) => info,
                Ok(None) => {
                    debug!("Tx {:?} not yet included (poll {})", tx_hash, poll + 1);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to fetch tx info for {:?}: {}", tx_hash, e);
                    continue;
                }
            };

            if info.receipt.result.as_deref().map_or(false, |r| r != "SUCCESS") {
                return Err(SwapError::TransactionReverted {
                    chain_id: self.config.chain_id,
                    tx_hash,
                });
            }

            let block_hash = self
                .block_hash(info.block_number)
                .await
                .map_err(|e| self.submission_error(e.to_string(), Some(tx_hash)))?;
            return Ok(SubmittedTx {
                tx_hash,
                block_hash,
                block_number: info.block_number,
                block_timestamp: info.block_time_stamp / 1000,
            });
        }

        Err(self.submission_error("transaction not included in time", Some(tx_hash)))
    }

    async fn transaction_logs(&self, tx_hash: H256) -> RelayerResult<Option<TxLogs>> {
        let info = match self.transaction_info(tx_hash).await? {
            Some(info) => info,
            None => return Ok(None),
        };
        let block_hash = self.block_hash(info.block_number).await?;
        let success = info.receipt.result.as_deref().map_or(true, |r| r == "SUCCESS");

        let logs = info
            .log
            .iter()
            .filter_map(|log| match normalize_log(log) {
                Some(record) => Some(record),
                None => {
                    warn!("Dropping malformed log in tx {:?}", tx_hash);
                    None
                }
            })
            .collect();

        Ok(Some(TxLogs {
            tx: SubmittedTx {
                tx_hash,
                block_hash,
                block_number: info.block_number,
                block_timestamp: info.block_time_stamp / 1000,
            },
            success,
            logs,
        }))
    }
}

fn sun_value(request: &TxRequest) -> Option<u64> {
    (request.value.bits() <= 64).then(|| request.value.as_u64())
}

fn decode_h256(value: &str) -> Option<H256> {
    let bytes = hex::decode(value.trim_start_matches("0x")).ok()?;
    (bytes.len() == 32).then(|| H256::from_slice(&bytes))
}

/// TronGrid returns node messages hex-encoded
fn decode_message(message: Option<&str>) -> String {
    let message = message.unwrap_or_default();
    hex::decode(message)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| message.to_string())
}

fn normalize_log(log: &TronLog) -> Option<LogRecord> {
    let address_hex = log.address.trim_start_matches("0x");
    // Log addresses omit the 41 prefix
    let address_hex = if address_hex.len() == 42 {
        address_hex.strip_prefix("41")?
    } else {
        address_hex
    };
    let address = hex::decode(address_hex).ok().filter(|b| b.len() == 20)?;

    let topics = log
        .topics
        .iter()
        .map(|topic| decode_h256(topic))
        .collect::<Option<Vec<_>>>()?;
    let data = hex::decode(log.data.trim_start_matches("0x")).ok()?;

    Some(LogRecord {
        address: CanonicalAddress::from_slice(&address),
        topics,
        data: Bytes::from(data),
    })
}
