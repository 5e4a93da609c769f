//! Cross-chain swap order model
//!
//! An [`Order`] is built once from [`OrderParams`], never mutated, and
//! consumed to derive the source escrow immutables. Every escrow-specific
//! field (hash lock, destination chain and token, deposits, timelocks,
//! auction, whitelist) is folded into the extension whose hash occupies the
//! low 160 bits of the salt, so the maker's signature binds all of it.

pub mod eip712;
pub mod hashlock;

pub use eip712::{compact_signature, TypedOrder};
pub use hashlock::Secret;

use crate::address::CanonicalAddress;
use crate::error::{RelayerResult, SwapError};
use crate::immutables::{Immutables, TimeLocks};
use crate::timelock::TimelockSchedule;

use ethers::abi::{encode, Token};
use ethers::types::{Bytes, H256, U256};
use ethers::utils::keccak256;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// 0.001 of an 18-decimal native asset
pub const DEFAULT_SAFETY_DEPOSIT_WEI: u64 = 1_000_000_000_000_000;

/// Nonces are encoded into 40 bits of the maker traits
const MAX_NONCE: u64 = (1 << 40) - 1;

const NO_PARTIAL_FILLS_FLAG: usize = 255;
const ALLOW_MULTIPLE_FILLS_FLAG: usize = 254;
const POST_INTERACTION_CALL_FLAG: usize = 251;
const HAS_EXTENSION_FLAG: usize = 249;
const NONCE_OFFSET: usize = 120;

/// Dutch auction curve point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionPoint {
    pub coefficient: u32,
    pub delay: u16,
}

/// Auction parameters; carried and committed, not evaluated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionDetails {
    pub start_time: u64,
    pub duration: u64,
    pub initial_rate_bump: u32,
    pub points: Vec<AuctionPoint>,
}

impl Default for AuctionDetails {
    fn default() -> Self {
        Self {
            start_time: 0,
            duration: 120,
            initial_rate_bump: 0,
            points: Vec::new(),
        }
    }
}

/// Resolver allowed to fill, `allow_from` seconds after resolving starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub address: CanonicalAddress,
    pub allow_from: u64,
}

/// Order options with named defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderOptions {
    pub time_locks: TimelockSchedule,
    pub src_safety_deposit: U256,
    pub dst_safety_deposit: U256,
    pub auction: AuctionDetails,
    pub whitelist: Vec<WhitelistEntry>,
    pub resolving_start_time: u64,
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self {
            time_locks: TimelockSchedule::default(),
            src_safety_deposit: U256::from(DEFAULT_SAFETY_DEPOSIT_WEI),
            dst_safety_deposit: U256::from(DEFAULT_SAFETY_DEPOSIT_WEI),
            auction: AuctionDetails::default(),
            whitelist: Vec::new(),
            resolving_start_time: 0,
        }
    }
}

/// Input to [`build_order`]. Zero addresses, hashes and chain ids count as absent.
#[derive(Debug, Clone, Default)]
pub struct OrderParams {
    pub escrow_factory: CanonicalAddress,
    pub maker: CanonicalAddress,
    /// Stored as given. A zero receiver is allowed; the limit order protocol
    /// then pays the maker.
    pub receiver: CanonicalAddress,
    pub maker_asset: CanonicalAddress,
    pub taker_asset: CanonicalAddress,
    pub making_amount: U256,
    pub taking_amount: U256,
    pub hash_lock: H256,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub options: OrderOptions,
}

/// Immutable single-fill cross-chain order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    salt: U256,
    nonce: u64,
    escrow_factory: CanonicalAddress,
    maker: CanonicalAddress,
    receiver: CanonicalAddress,
    maker_asset: CanonicalAddress,
    taker_asset: CanonicalAddress,
    making_amount: U256,
    taking_amount: U256,
    hash_lock: H256,
    time_locks: TimelockSchedule,
    src_chain_id: u64,
    dst_chain_id: u64,
    src_safety_deposit: U256,
    dst_safety_deposit: U256,
    auction: AuctionDetails,
    whitelist: Vec<WhitelistEntry>,
    resolving_start_time: u64,
}

/// Validate parameters and build an order with fresh salt and nonce
pub fn build_order(params: OrderParams) -> RelayerResult<Order> {
    validate(&params)?;

    let mut rng = OsRng;
    let nonce = rng.gen_range(0..=MAX_NONCE);
    let salt_high = U256::from(rng.gen::<u64>());

    let OrderParams {
        escrow_factory,
        maker,
        receiver,
        maker_asset,
        taker_asset,
        making_amount,
        taking_amount,
        hash_lock,
        src_chain_id,
        dst_chain_id,
        options,
    } = params;

    let mut order = Order {
        salt: U256::zero(),
        nonce,
        escrow_factory,
        maker,
        receiver,
        maker_asset,
        taker_asset,
        making_amount,
        taking_amount,
        hash_lock,
        time_locks: options.time_locks,
        src_chain_id,
        dst_chain_id,
        src_safety_deposit: options.src_safety_deposit,
        dst_safety_deposit: options.dst_safety_deposit,
        auction: options.auction,
        whitelist: options.whitelist,
        resolving_start_time: options.resolving_start_time,
    };

    let extension_hash = U256::from_big_endian(&keccak256(order.extension()));
    let low_160 = (U256::one() << 160) - 1;
    order.salt = (salt_high << 160) | (extension_hash & low_160);

    debug!(
        nonce = order.nonce,
        salt = %order.salt,
        "Order built"
    );

    Ok(order)
}

/// Entry point for callers constructing a new swap intent
pub fn create_order(params: OrderParams) -> RelayerResult<Order> {
    let order = build_order(params)?;
    info!(
        maker = %order.maker,
        src_chain = order.src_chain_id,
        dst_chain = order.dst_chain_id,
        making_amount = %order.making_amount,
        taking_amount = %order.taking_amount,
        "Order created"
    );
    Ok(order)
}

fn validate(params: &OrderParams) -> RelayerResult<()> {
    let required_addresses = [
        ("escrow_factory", &params.escrow_factory),
        ("maker", &params.maker),
        ("maker_asset", &params.maker_asset),
        ("taker_asset", &params.taker_asset),
    ];
    for (name, address) in required_addresses {
        if address.is_zero() {
            return Err(SwapError::MissingParameter(name));
        }
    }
    if params.hash_lock.is_zero() {
        return Err(SwapError::MissingParameter("hash_lock"));
    }
    if params.src_chain_id == 0 {
        return Err(SwapError::MissingParameter("src_chain_id"));
    }
    if params.dst_chain_id == 0 {
        return Err(SwapError::MissingParameter("dst_chain_id"));
    }

    if params.making_amount.is_zero() {
        return Err(SwapError::InvalidAmount {
            field: "making_amount",
        });
    }
    if params.taking_amount.is_zero() {
        return Err(SwapError::InvalidAmount {
            field: "taking_amount",
        });
    }

    params.options.time_locks.validate()?;

    if params.src_chain_id == params.dst_chain_id {
        return Err(SwapError::InvalidParameter(format!(
            "source and destination chain are the same ({})",
            params.src_chain_id
        )));
    }

    let deposit_limit = U256::from(u128::MAX);
    if params.options.src_safety_deposit > deposit_limit
        || params.options.dst_safety_deposit > deposit_limit
    {
        return Err(SwapError::InvalidParameter(
            "safety deposits must fit in 128 bits".to_string(),
        ));
    }

    Ok(())
}

impl Order {
    pub fn salt(&self) -> U256 {
        self.salt
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn escrow_factory(&self) -> CanonicalAddress {
        self.escrow_factory
    }

    pub fn maker(&self) -> CanonicalAddress {
        self.maker
    }

    pub fn receiver(&self) -> CanonicalAddress {
        self.receiver
    }

    pub fn maker_asset(&self) -> CanonicalAddress {
        self.maker_asset
    }

    pub fn taker_asset(&self) -> CanonicalAddress {
        self.taker_asset
    }

    pub fn making_amount(&self) -> U256 {
        self.making_amount
    }

    pub fn taking_amount(&self) -> U256 {
        self.taking_amount
    }

    pub fn hash_lock(&self) -> H256 {
        self.hash_lock
    }

    pub fn time_locks(&self) -> TimelockSchedule {
        self.time_locks
    }

    pub fn src_chain_id(&self) -> u64 {
        self.src_chain_id
    }

    pub fn dst_chain_id(&self) -> u64 {
        self.dst_chain_id
    }

    pub fn src_safety_deposit(&self) -> U256 {
        self.src_safety_deposit
    }

    pub fn dst_safety_deposit(&self) -> U256 {
        self.dst_safety_deposit
    }

    pub fn auction(&self) -> &AuctionDetails {
        &self.auction
    }

    pub fn whitelist(&self) -> &[WhitelistEntry] {
        &self.whitelist
    }

    /// Single fill only: partial and multiple fills are always disabled
    pub fn allow_partial_fills(&self) -> bool {
        false
    }

    pub fn allow_multiple_fills(&self) -> bool {
        false
    }

    /// Maker traits word: fill flags, extension flags and the 40-bit nonce
    pub fn maker_traits(&self) -> U256 {
        let mut traits = U256::from(self.nonce) << NONCE_OFFSET;
        if !self.allow_partial_fills() {
            traits |= U256::one() << NO_PARTIAL_FILLS_FLAG;
        }
        if self.allow_multiple_fills() {
            traits |= U256::one() << ALLOW_MULTIPLE_FILLS_FLAG;
        }
        traits |= U256::one() << POST_INTERACTION_CALL_FLAG;
        traits |= U256::one() << HAS_EXTENSION_FLAG;
        traits
    }

    /// ABI-encoded escrow extension passed to the fill as taker args
    pub fn extension(&self) -> Bytes {
        let deposits = (self.src_safety_deposit << 128) | self.dst_safety_deposit;
        let points = self
            .auction
            .points
            .iter()
            .map(|p| {
                Token::Tuple(vec![
                    Token::Uint(p.coefficient.into()),
                    Token::Uint(p.delay.into()),
                ])
            })
            .collect();
        let whitelist = self
            .whitelist
            .iter()
            .map(|w| {
                Token::Tuple(vec![
                    Token::Uint(w.address.to_word()),
                    Token::Uint(w.allow_from.into()),
                ])
            })
            .collect();

        Bytes::from(encode(&[
            Token::Address(self.escrow_factory.h160()),
            Token::FixedBytes(self.hash_lock.as_bytes().to_vec()),
            Token::Uint(self.dst_chain_id.into()),
            Token::Uint(self.taker_asset.to_word()),
            Token::Uint(deposits),
            Token::Uint(TimeLocks::new(self.time_locks).pack()),
            Token::Uint(self.auction.start_time.into()),
            Token::Uint(self.auction.duration.into()),
            Token::Uint(self.auction.initial_rate_bump.into()),
            Token::Array(points),
            Token::Uint(self.resolving_start_time.into()),
            Token::Array(whitelist),
        ]))
    }

    /// EIP-712 order hash for the limit order protocol at `verifying_contract`
    pub fn hash(&self, chain_id: u64, verifying_contract: CanonicalAddress) -> H256 {
        TypedOrder::new(self, chain_id, verifying_contract).digest()
    }

    /// ABI tuple `(uint256 x8)` as the resolver's `deploySrc` expects
    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Uint(self.salt),
            Token::Uint(self.maker.to_word()),
            Token::Uint(self.receiver.to_word()),
            Token::Uint(self.maker_asset.to_word()),
            Token::Uint(self.taker_asset.to_word()),
            Token::Uint(self.making_amount),
            Token::Uint(self.taking_amount),
            Token::Uint(self.maker_traits()),
        ])
    }

    /// Source immutables for a fill of `amount` by `taker`. `deployed_at`
    /// stays zero until the fill transaction sets it on chain.
    pub fn to_src_immutables(
        &self,
        chain_id: u64,
        taker: CanonicalAddress,
        amount: U256,
        order_hash: H256,
    ) -> RelayerResult<Immutables> {
        if chain_id != self.src_chain_id {
            return Err(SwapError::InvalidParameter(format!(
                "order source chain is {}, not {}",
                self.src_chain_id, chain_id
            )));
        }
        if amount.is_zero() || amount > self.making_amount {
            return Err(SwapError::InvalidAmount { field: "amount" });
        }

        Ok(Immutables {
            order_hash,
            hash_lock: self.hash_lock,
            maker: self.maker,
            taker,
            token: self.maker_asset,
            amount,
            safety_deposit: self.src_safety_deposit,
            time_locks: TimeLocks::new(self.time_locks),
        })
    }
}
