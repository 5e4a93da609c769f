//! Escrow immutables committed to both escrows of a swap

use crate::address::CanonicalAddress;
use crate::timelock::{Stage, TimelockSchedule};

use ethers::abi::{encode, Token};
use ethers::types::{H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

const DEPLOYED_AT_OFFSET: usize = 224;

/// Timelock offsets plus the deployment timestamp they are relative to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLocks {
    pub schedule: TimelockSchedule,
    pub deployed_at: u32,
}

impl TimeLocks {
    pub fn new(schedule: TimelockSchedule) -> Self {
        Self {
            schedule,
            deployed_at: 0,
        }
    }

    pub fn with_deployed_at(mut self, deployed_at: u32) -> Self {
        self.deployed_at = deployed_at;
        self
    }

    /// Absolute unix timestamp at which `stage` begins
    pub fn stage_timestamp(&self, stage: Stage) -> u64 {
        u64::from(self.deployed_at) + u64::from(self.schedule.offset(stage))
    }

    /// Pack into one word: stage `i` at bits `i*32`, `deployed_at` at bits 224..256
    pub fn pack(&self) -> U256 {
        let mut word = U256::from(self.deployed_at) << DEPLOYED_AT_OFFSET;
        for (index, stage) in Stage::ALL.iter().enumerate() {
            word |= U256::from(self.schedule.offset(*stage)) << (index * 32);
        }
        word
    }

    pub fn unpack(word: U256) -> Self {
        let mask = U256::from(u32::MAX);
        let mut offsets = [0u32; 7];
        for (index, offset) in offsets.iter_mut().enumerate() {
            *offset = ((word >> (index * 32)) & mask).as_u32();
        }
        Self {
            schedule: TimelockSchedule::from_offsets(offsets),
            deployed_at: ((word >> DEPLOYED_AT_OFFSET) & mask).as_u32(),
        }
    }
}

/// Destination-side values only observable through `SrcEscrowCreated`.
///
/// Constructed by the event decoder; there is no public constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DstImmutablesComplement {
    maker: CanonicalAddress,
    amount: U256,
    token: CanonicalAddress,
    safety_deposit: U256,
    chain_id: U256,
}

impl DstImmutablesComplement {
    pub(crate) fn from_event(
        maker: CanonicalAddress,
        amount: U256,
        token: CanonicalAddress,
        safety_deposit: U256,
        chain_id: U256,
    ) -> Self {
        Self {
            maker,
            amount,
            token,
            safety_deposit,
            chain_id,
        }
    }

    pub fn maker(&self) -> CanonicalAddress {
        self.maker
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn token(&self) -> CanonicalAddress {
        self.token
    }

    pub fn safety_deposit(&self) -> U256 {
        self.safety_deposit
    }

    pub fn chain_id(&self) -> U256 {
        self.chain_id
    }
}

/// Per-side escrow parameters; the CREATE2 salt is their hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immutables {
    pub order_hash: H256,
    pub hash_lock: H256,
    pub maker: CanonicalAddress,
    pub taker: CanonicalAddress,
    pub token: CanonicalAddress,
    pub amount: U256,
    pub safety_deposit: U256,
    pub time_locks: TimeLocks,
}

impl Immutables {
    /// Destination view of these source immutables. Applying the same
    /// complement again yields the same value.
    pub fn with_complement(&self, complement: &DstImmutablesComplement) -> Self {
        Self {
            maker: complement.maker,
            amount: complement.amount,
            token: complement.token,
            safety_deposit: complement.safety_deposit,
            ..*self
        }
    }

    pub fn with_taker(&self, taker: CanonicalAddress) -> Self {
        Self { taker, ..*self }
    }

    pub fn with_deployed_at(&self, deployed_at: u32) -> Self {
        Self {
            time_locks: self.time_locks.with_deployed_at(deployed_at),
            ..*self
        }
    }

    /// ABI tuple `(bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256)`
    pub fn to_token(&self) -> Token {
        Token::Tuple(self.fields())
    }

    fn fields(&self) -> Vec<Token> {
        vec![
            Token::FixedBytes(self.order_hash.as_bytes().to_vec()),
            Token::FixedBytes(self.hash_lock.as_bytes().to_vec()),
            Token::Uint(self.maker.to_word()),
            Token::Uint(self.taker.to_word()),
            Token::Uint(self.token.to_word()),
            Token::Uint(self.amount),
            Token::Uint(self.safety_deposit),
            Token::Uint(self.time_locks.pack()),
        ]
    }

    /// `keccak256(abi.encode(immutables))`
    pub fn hash(&self) -> H256 {
        H256::from(keccak256(encode(&self.fields())))
    }

    /// Rebuild from the fields of a decoded `Immutables` ABI tuple
    pub fn from_tokens(tokens: Vec<Token>) -> Option<Self> {
        let mut iter = tokens.into_iter();
        let mut bytes32 = || match iter.next()? {
            Token::FixedBytes(bytes) if bytes.len() == 32 => Some(H256::from_slice(&bytes)),
            _ => None,
        };
        let order_hash = bytes32()?;
        let hash_lock = bytes32()?;

        let words: Vec<U256> = iter.map(|t| t.into_uint()).collect::<Option<_>>()?;
        if words.len() != 6 {
            return None;
        }

        Some(Self {
            order_hash,
            hash_lock,
            maker: CanonicalAddress::from_word(words[0]),
            taker: CanonicalAddress::from_word(words[1]),
            token: CanonicalAddress::from_word(words[2]),
            amount: words[3],
            safety_deposit: words[4],
            time_locks: TimeLocks::unpack(words[5]),
        })
    }
}
