//! In-memory two-chain fake for orchestrator scenarios
//!
//! `FakeChain` plays the escrow factory, the resolver contract and the
//! escrows of one chain. It decodes resolver calldata by selector, enforces
//! the same hash lock and timelock rules as the contracts, and emits the
//! factory events the watcher looks for.

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::signers::LocalWallet;
use ethers::types::{Bytes, H256, U256};
use ethers::utils::{id, keccak256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use htlc_relayer::address::{derive_escrow_address, proxy_bytecode_hash, CanonicalAddress, ChainFamily, Create2Prefix};
use htlc_relayer::chain::{ChainClient, EscrowWatcher, LogRecord, SubmittedTx, TxLogs, TxRequest};
use htlc_relayer::clock::Clock;
use htlc_relayer::error::{RelayerResult, SwapError};
use htlc_relayer::events::topics;
use htlc_relayer::immutables::Immutables;
use htlc_relayer::order::{create_order, Order, OrderOptions, OrderParams, Secret};
use htlc_relayer::resolver::{abi, ResolverAdapter, ResolverConfig};
use htlc_relayer::swap::{ChainLeg, OrchestratorConfig, SwapOrchestrator};
use htlc_relayer::timelock::{Side, Stage, TimelockPolicy};
use htlc_relayer::wallet::{LocalOrderSigner, OrderSigner};

pub const BASE_TIME: u64 = 1_700_000_000;
pub const TRON_NILE: u64 = 3_448_148_188;
pub const BASE_SEPOLIA: u64 = 84_532;

const MAKER_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// Unix time that advances with tokio's (pausable) clock
pub struct TestClock {
    start: Instant,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> u64 {
        BASE_TIME + self.start.elapsed().as_secs()
    }
}

/// Contract addresses deployed on a fake chain
#[derive(Debug, Clone, Copy)]
pub struct Deployment {
    pub factory: CanonicalAddress,
    pub resolver: CanonicalAddress,
    pub limit_order_protocol: CanonicalAddress,
    pub src_impl: CanonicalAddress,
    pub dst_impl: CanonicalAddress,
    pub token: CanonicalAddress,
}

impl Deployment {
    fn for_chain(seed: u8) -> Self {
        let address = |offset: u8| CanonicalAddress::from_bytes([seed.wrapping_add(offset); 20]);
        Self {
            factory: address(1),
            resolver: address(2),
            limit_order_protocol: address(3),
            src_impl: address(4),
            dst_impl: address(5),
            token: address(6),
        }
    }
}

/// Injected failure for the next submission of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Rejected by the node before broadcast
    Rejected,
    /// Included with a failed status
    Revert,
    /// Included, but the client loses track of it and reports the hash
    LostReceipt,
    /// Included, then an RPC error with no hash attached
    FailAfterInclusion,
    /// Broadcast with its hash; the receipt shows up this many seconds later
    SlowReceipt(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowStatus {
    Open,
    Withdrawn,
    Cancelled,
}

#[derive(Debug, Clone)]
struct FakeEscrow {
    side: Side,
    immutables: Immutables,
    status: EscrowStatus,
}

#[derive(Default)]
struct FakeState {
    code: HashMap<CanonicalAddress, Bytes>,
    receipts: HashMap<H256, TxLogs>,
    escrows: HashMap<CanonicalAddress, FakeEscrow>,
    faults: HashMap<&'static str, VecDeque<Fault>>,
    hidden_until: HashMap<H256, u64>,
    submissions: Vec<&'static str>,
    block_number: u64,
    nonce: u64,
}

pub struct FakeChain {
    chain_id: u64,
    family: ChainFamily,
    prefix: Create2Prefix,
    sender: CanonicalAddress,
    deployment: Deployment,
    clock: Arc<TestClock>,
    state: Mutex<FakeState>,
}

fn immutables_param() -> ParamType {
    let mut fields = vec![ParamType::FixedBytes(32), ParamType::FixedBytes(32)];
    fields.extend(vec![ParamType::Uint(256); 6]);
    ParamType::Tuple(fields)
}

fn extension_params() -> Vec<ParamType> {
    let pair = ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Uint(256),
        ParamType::Uint(256),
    ])));
    let mut params = vec![ParamType::Address, ParamType::FixedBytes(32)];
    params.extend(vec![ParamType::Uint(256); 7]);
    params.push(pair.clone());
    params.push(ParamType::Uint(256));
    params.push(pair);
    params
}

fn tuple_immutables(token: &Token) -> Option<Immutables> {
    match token {
        Token::Tuple(fields) => Immutables::from_tokens(fields.clone()),
        _ => None,
    }
}

impl FakeChain {
    pub fn new(chain_id: u64, family: ChainFamily, seed: u8, clock: Arc<TestClock>) -> Self {
        let deployment = Deployment::for_chain(seed);
        let mut state = FakeState::default();
        for contract in [
            deployment.factory,
            deployment.resolver,
            deployment.limit_order_protocol,
            deployment.src_impl,
            deployment.dst_impl,
        ] {
            state.code.insert(contract, Bytes::from(vec![0x60, 0x80]));
        }

        Self {
            chain_id,
            family,
            prefix: Create2Prefix::default_for(family),
            sender: CanonicalAddress::from_bytes([seed.wrapping_add(9); 20]),
            deployment,
            clock,
            state: Mutex::new(state),
        }
    }

    pub fn deployment(&self) -> Deployment {
        self.deployment
    }

    pub fn prefix(&self) -> Create2Prefix {
        self.prefix
    }

    /// Fail the next submission of `kind` (`deploy_src`, `deploy_dst`, `withdraw`, `cancel`)
    pub fn inject(&self, kind: &'static str, fault: Fault) {
        let mut state = self.state.lock().unwrap();
        state.faults.entry(kind).or_default().push_back(fault);
    }

    /// Kinds of every submission that reached the chain, in order
    pub fn submissions(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn escrow_status(&self, escrow: CanonicalAddress) -> Option<EscrowStatus> {
        self.state
            .lock()
            .unwrap()
            .escrows
            .get(&escrow)
            .map(|escrow| escrow.status)
    }

    pub fn escrow_count(&self) -> usize {
        self.state.lock().unwrap().escrows.len()
    }

    fn escrow_address(&self, immutables: &Immutables, implementation: &CanonicalAddress) -> CanonicalAddress {
        derive_escrow_address(
            &self.deployment.factory,
            immutables.hash(),
            proxy_bytecode_hash(implementation),
            self.prefix,
        )
    }

    fn revert(&self, reason: &str) -> Result<Vec<LogRecord>, String> {
        Err(reason.to_string())
    }

    fn deploy_src(&self, state: &mut FakeState, args: &[u8], value: U256, now: u64) -> Result<Vec<LogRecord>, String> {
        let param_types = [
            immutables_param(),
            ParamType::Tuple(vec![ParamType::Uint(256); 8]),
            ParamType::FixedBytes(32),
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bytes,
        ];
        let tokens = decode(&param_types, args).map_err(|e| e.to_string())?;
        let immutables = tuple_immutables(&tokens[0]).ok_or("bad immutables")?;
        let order = match &tokens[1] {
            Token::Tuple(fields) => fields.iter().cloned().filter_map(Token::into_uint).collect::<Vec<_>>(),
            _ => return self.revert("bad order"),
        };
        let args = tokens[6].clone().into_bytes().ok_or("bad args")?;
        let extension = decode(&extension_params(), &args).map_err(|e| e.to_string())?;

        if value != immutables.safety_deposit {
            return self.revert("wrong safety deposit");
        }

        let immutables = immutables.with_deployed_at(now as u32);
        let escrow = self.escrow_address(&immutables, &self.deployment.src_impl);
        state.code.insert(escrow, Bytes::from(vec![0x36, 0x3d]));
        state.escrows.insert(
            escrow,
            FakeEscrow {
                side: Side::Src,
                immutables,
                status: EscrowStatus::Open,
            },
        );

        let maker = order[1];
        let receiver = if order[2].is_zero() { maker } else { order[2] };
        let deposits = extension[4].clone().into_uint().ok_or("bad deposits")?;
        let complement = Token::Tuple(vec![
            Token::Uint(receiver),
            Token::Uint(order[6]),
            extension[3].clone(),
            Token::Uint(deposits & ((U256::one() << 128) - 1)),
            extension[2].clone(),
        ]);

        Ok(vec![LogRecord {
            address: self.deployment.factory,
            topics: vec![*topics::SRC_ESCROW_CREATED],
            data: Bytes::from(encode(&[immutables.to_token(), complement])),
        }])
    }

    fn deploy_dst(&self, state: &mut FakeState, args: &[u8], value: U256, now: u64) -> Result<Vec<LogRecord>, String> {
        let tokens = decode(&[immutables_param(), ParamType::Uint(256)], args).map_err(|e| e.to_string())?;
        let immutables = tuple_immutables(&tokens[0])
            .ok_or("bad immutables")?
            .with_deployed_at(now as u32);
        let src_cancellation = tokens[1].clone().into_uint().ok_or("bad timestamp")?;

        if U256::from(immutables.time_locks.stage_timestamp(Stage::DstCancellation)) > src_cancellation {
            return self.revert("InvalidCreationTime");
        }
        let expected = if immutables.token.is_zero() {
            immutables.amount + immutables.safety_deposit
        } else {
            immutables.safety_deposit
        };
        if value != expected {
            return self.revert("InsufficientEscrowBalance");
        }

        let escrow = self.escrow_address(&immutables, &self.deployment.dst_impl);
        state.code.insert(escrow, Bytes::from(vec![0x36, 0x3d]));
        state.escrows.insert(
            escrow,
            FakeEscrow {
                side: Side::Dst,
                immutables,
                status: EscrowStatus::Open,
            },
        );

        Ok(vec![LogRecord {
            address: self.deployment.factory,
            topics: vec![*topics::DST_ESCROW_CREATED],
            data: Bytes::from(encode(&[
                Token::Address(escrow.h160()),
                Token::FixedBytes(immutables.hash_lock.as_bytes().to_vec()),
                Token::Uint(immutables.taker.to_word()),
            ])),
        }])
    }

    /// Look up `escrow` and check the caller passed its exact immutables
    fn open_escrow(&self, state: &FakeState, escrow: CanonicalAddress, immutables: &Immutables) -> Result<FakeEscrow, String> {
        let record = state.escrows.get(&escrow).ok_or("no escrow")?.clone();
        let implementation = match record.side {
            Side::Src => self.deployment.src_impl,
            Side::Dst => self.deployment.dst_impl,
        };
        if self.escrow_address(immutables, &implementation) != escrow {
            return Err("InvalidImmutables".to_string());
        }
        if record.status != EscrowStatus::Open {
            return Err("escrow already settled".to_string());
        }
        Ok(record)
    }

    fn withdraw(&self, state: &mut FakeState, args: &[u8], now: u64) -> Result<Vec<LogRecord>, String> {
        let tokens = decode(
            &[ParamType::Address, ParamType::FixedBytes(32), immutables_param()],
            args,
        )
        .map_err(|e| e.to_string())?;
        let escrow = CanonicalAddress::from(tokens[0].clone().into_address().ok_or("bad escrow")?);
        let secret: [u8; 32] = tokens[1]
            .clone()
            .into_fixed_bytes()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or("bad secret")?;
        let immutables = tuple_immutables(&tokens[2]).ok_or("bad immutables")?;

        let record = self.open_escrow(state, escrow, &immutables)?;
        if H256::from(keccak256(secret)) != record.immutables.hash_lock {
            return self.revert("InvalidSecret");
        }
        TimelockPolicy::new(record.side, &record.immutables)
            .authorize_withdraw(&self.deployment.resolver, &Secret::from_bytes(secret), now)
            .map_err(|e| e.to_string())?;

        if let Some(escrow) = state.escrows.get_mut(&escrow) {
            escrow.status = EscrowStatus::Withdrawn;
        }
        Ok(Vec::new())
    }

    fn cancel(&self, state: &mut FakeState, args: &[u8], now: u64) -> Result<Vec<LogRecord>, String> {
        let tokens = decode(&[ParamType::Address, immutables_param()], args).map_err(|e| e.to_string())?;
        let escrow = CanonicalAddress::from(tokens[0].clone().into_address().ok_or("bad escrow")?);
        let immutables = tuple_immutables(&tokens[1]).ok_or("bad immutables")?;

        let record = self.open_escrow(state, escrow, &immutables)?;
        TimelockPolicy::new(record.side, &record.immutables)
            .authorize_cancel(&self.deployment.resolver, now)
            .map_err(|e| e.to_string())?;

        if let Some(escrow) = state.escrows.get_mut(&escrow) {
            escrow.status = EscrowStatus::Cancelled;
        }
        Ok(Vec::new())
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        self.family
    }

    fn sender(&self) -> CanonicalAddress {
        self.sender
    }

    async fn code_at(&self, address: CanonicalAddress) -> RelayerResult<Bytes> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .code
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn call(&self, request: TxRequest) -> RelayerResult<Bytes> {
        let implementation = if request.data[..] == id(abi::ESCROW_SRC_IMPLEMENTATION)[..] {
            self.deployment.src_impl
        } else if request.data[..] == id(abi::ESCROW_DST_IMPLEMENTATION)[..] {
            self.deployment.dst_impl
        } else {
            return Err(SwapError::ChainRequest {
                chain_id: self.chain_id,
                message: "execution reverted".to_string(),
            });
        };
        Ok(Bytes::from(encode(&[Token::Address(implementation.h160())])))
    }

    async fn send_transaction(&self, request: TxRequest) -> RelayerResult<SubmittedTx> {
        let selector: [u8; 4] = request.data[..4].try_into().unwrap();
        let kind = [
            ("deploy_src", abi::DEPLOY_SRC),
            ("deploy_dst", abi::DEPLOY_DST),
            ("withdraw", abi::WITHDRAW),
            ("cancel", abi::CANCEL),
        ]
        .into_iter()
        .find(|(_, signature)| id(signature) == selector)
        .map(|(kind, _)| kind)
        .unwrap_or("unknown");

        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let fault = state.faults.get_mut(kind).and_then(VecDeque::pop_front);
        if fault == Some(Fault::Rejected) {
            return Err(SwapError::SubmissionFailed {
                chain_id: self.chain_id,
                message: "connection reset".to_string(),
                tx_hash: None,
            });
        }

        state.nonce += 1;
        state.block_number += 1;
        let mut preimage = self.chain_id.to_be_bytes().to_vec();
        preimage.extend_from_slice(&state.nonce.to_be_bytes());
        let tx = SubmittedTx {
            tx_hash: H256::from(keccak256(preimage)),
            block_hash: H256::from_low_u64_be(state.block_number),
            block_number: state.block_number,
            block_timestamp: now,
        };
        state.submissions.push(kind);

        let args = &request.data[4..];
        let outcome = match (fault, kind) {
            (Some(Fault::Revert), _) => Err("injected revert".to_string()),
            (_, "deploy_src") => self.deploy_src(&mut state, args, request.value, now),
            (_, "deploy_dst") => self.deploy_dst(&mut state, args, request.value, now),
            (_, "withdraw") => self.withdraw(&mut state, args, now),
            (_, "cancel") => self.cancel(&mut state, args, now),
            _ => Err("unknown selector".to_string()),
        };

        let (success, logs) = match outcome {
            Ok(logs) => (true, logs),
            Err(_) => (false, Vec::new()),
        };
        state.receipts.insert(tx.tx_hash, TxLogs { tx, success, logs });

        match fault {
            Some(Fault::LostReceipt) => {
                return Err(SwapError::SubmissionFailed {
                    chain_id: self.chain_id,
                    message: "receipt lookup timed out".to_string(),
                    tx_hash: Some(tx.tx_hash),
                })
            }
            Some(Fault::FailAfterInclusion) => {
                return Err(SwapError::ChainRequest {
                    chain_id: self.chain_id,
                    message: "block lookup failed".to_string(),
                })
            }
            Some(Fault::SlowReceipt(delay)) => {
                state.hidden_until.insert(tx.tx_hash, now + delay);
                return Err(SwapError::SubmissionFailed {
                    chain_id: self.chain_id,
                    message: "not included yet".to_string(),
                    tx_hash: Some(tx.tx_hash),
                });
            }
            _ => {}
        }

        if success {
            Ok(tx)
        } else {
            Err(SwapError::TransactionReverted {
                chain_id: self.chain_id,
                tx_hash: tx.tx_hash,
            })
        }
    }

    async fn transaction_logs(&self, tx_hash: H256) -> RelayerResult<Option<TxLogs>> {
        let now = self.clock.now();
        let state = self.state.lock().unwrap();
        if state.hidden_until.get(&tx_hash).map_or(false, |until| now < *until) {
            return Ok(None);
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }
}

/// Two fake chains wired to an orchestrator
pub struct SwapEnv {
    pub clock: Arc<TestClock>,
    pub src: Arc<FakeChain>,
    pub dst: Arc<FakeChain>,
    pub maker: Arc<LocalOrderSigner>,
    pub orchestrator: SwapOrchestrator,
    pub cancel: CancellationToken,
}

/// Tron Nile as source, Base Sepolia as destination
pub fn swap_env() -> SwapEnv {
    swap_env_with(None)
}

/// Like [`swap_env`], with the destination adapter's CREATE2 prefix overridden
pub fn swap_env_with(dst_adapter_prefix: Option<Create2Prefix>) -> SwapEnv {
    let clock = Arc::new(TestClock::new());
    let src = Arc::new(FakeChain::new(TRON_NILE, ChainFamily::Tron, 0x10, clock.clone()));
    let dst = Arc::new(FakeChain::new(BASE_SEPOLIA, ChainFamily::Evm, 0x80, clock.clone()));

    let leg = |chain: &Arc<FakeChain>, prefix: Create2Prefix| {
        let deployment = chain.deployment();
        let client: Arc<dyn ChainClient> = chain.clone();
        let resolver = ResolverAdapter::new(
            ResolverConfig {
                family: chain.family(),
                resolver: deployment.resolver,
                escrow_factory: deployment.factory,
                limit_order_protocol: deployment.limit_order_protocol,
                create2_prefix: prefix,
            },
            client.clone(),
        )
        .unwrap();
        let watcher = EscrowWatcher::new(client, Duration::from_secs(1), Duration::from_secs(10));
        ChainLeg::new(Arc::new(resolver), watcher)
    };

    let maker_wallet: LocalWallet = MAKER_KEY.parse().unwrap();
    let maker = Arc::new(LocalOrderSigner::new(maker_wallet));
    let cancel = CancellationToken::new();

    let orchestrator = SwapOrchestrator::new(
        leg(&src, src.prefix()),
        leg(&dst, dst_adapter_prefix.unwrap_or_else(|| dst.prefix())),
        maker.clone(),
        clock.clone(),
        OrchestratorConfig {
            submit_retries: 2,
            retry_backoff: Duration::from_secs(1),
            max_wait_rounds: 2,
            window_margin: Duration::from_secs(1),
        },
        cancel.clone(),
    );

    SwapEnv {
        clock,
        src,
        dst,
        maker,
        orchestrator,
        cancel,
    }
}

impl SwapEnv {
    /// Order from the source chain's token to the destination chain's token
    pub fn order(&self, secret: &Secret, making_amount: u64, taking_amount: u64) -> Order {
        create_order(OrderParams {
            escrow_factory: self.src.deployment().factory,
            maker: self.maker.address(),
            receiver: CanonicalAddress::ZERO,
            maker_asset: self.src.deployment().token,
            taker_asset: self.dst.deployment().token,
            making_amount: U256::from(making_amount),
            taking_amount: U256::from(taking_amount),
            hash_lock: secret.hash_lock(),
            src_chain_id: TRON_NILE,
            dst_chain_id: BASE_SEPOLIA,
            options: OrderOptions::default(),
        })
        .unwrap()
    }
}
