//! Resolver and escrow factory call encoding

use crate::address::CanonicalAddress;
use crate::immutables::Immutables;
use crate::order::{Order, Secret};

use ethers::abi::{encode, Token};
use ethers::types::{Bytes, H256, U256};
use ethers::utils::id;

pub const DEPLOY_SRC: &str = "deploySrc((bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256),(uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256),bytes32,bytes32,uint256,uint256,bytes)";
pub const DEPLOY_DST: &str =
    "deployDst((bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256),uint256)";
pub const WITHDRAW: &str =
    "withdraw(address,bytes32,(bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256))";
pub const CANCEL: &str =
    "cancel(address,(bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256))";
pub const ESCROW_SRC_IMPLEMENTATION: &str = "ESCROW_SRC_IMPLEMENTATION()";
pub const ESCROW_DST_IMPLEMENTATION: &str = "ESCROW_DST_IMPLEMENTATION()";

const MAKER_AMOUNT_FLAG: usize = 255;
const ARGS_EXTENSION_LENGTH_OFFSET: usize = 224;
const ARGS_INTERACTION_LENGTH_OFFSET: usize = 200;
const THRESHOLD_BITS: usize = 185;

/// `selector(signature) || abi.encode(tokens)`
pub fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(encode(tokens));
    Bytes::from(data)
}

/// Fill parameters for the limit order protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakerTraits {
    /// Amount passed to the fill is the making amount
    pub maker_amount: bool,
    /// Maximum taking amount accepted for the fill
    pub threshold: U256,
    pub extension: Bytes,
    pub interaction: Bytes,
}

impl TakerTraits {
    /// Maker-amount fill of an escrow order, bounded by its taking amount
    pub fn for_fill(order: &Order) -> Self {
        Self {
            maker_amount: true,
            threshold: order.taking_amount(),
            extension: order.extension(),
            interaction: Bytes::new(),
        }
    }

    /// Packed traits word and the trailing `args` bytes
    pub fn encode(&self) -> (U256, Bytes) {
        let threshold_mask = (U256::one() << THRESHOLD_BITS) - 1;
        let mut traits = self.threshold & threshold_mask;
        if self.maker_amount {
            traits |= U256::one() << MAKER_AMOUNT_FLAG;
        }
        traits |= U256::from(self.extension.len()) << ARGS_EXTENSION_LENGTH_OFFSET;
        traits |= U256::from(self.interaction.len()) << ARGS_INTERACTION_LENGTH_OFFSET;

        let mut args = self.extension.to_vec();
        args.extend_from_slice(&self.interaction);
        (traits, Bytes::from(args))
    }
}

pub fn deploy_src_calldata(
    immutables: &Immutables,
    order: &Order,
    r: H256,
    vs: H256,
    amount: U256,
    taker_traits: &TakerTraits,
) -> Bytes {
    let (traits, args) = taker_traits.encode();
    encode_call(
        DEPLOY_SRC,
        &[
            immutables.to_token(),
            order.to_token(),
            Token::FixedBytes(r.as_bytes().to_vec()),
            Token::FixedBytes(vs.as_bytes().to_vec()),
            Token::Uint(amount),
            Token::Uint(traits),
            Token::Bytes(args.to_vec()),
        ],
    )
}

pub fn deploy_dst_calldata(immutables: &Immutables, src_cancellation_timestamp: u64) -> Bytes {
    encode_call(
        DEPLOY_DST,
        &[
            immutables.to_token(),
            Token::Uint(src_cancellation_timestamp.into()),
        ],
    )
}

pub fn withdraw_calldata(escrow: CanonicalAddress, secret: &Secret, immutables: &Immutables) -> Bytes {
    encode_call(
        WITHDRAW,
        &[
            Token::Address(escrow.h160()),
            Token::FixedBytes(secret.as_bytes().to_vec()),
            immutables.to_token(),
        ],
    )
}

pub fn cancel_calldata(escrow: CanonicalAddress, immutables: &Immutables) -> Bytes {
    encode_call(
        CANCEL,
        &[Token::Address(escrow.h160()), immutables.to_token()],
    )
}

/// Address returned as a single ABI word
pub fn decode_address_word(output: &[u8]) -> Option<CanonicalAddress> {
    (output.len() == 32).then(|| CanonicalAddress::from_word(U256::from_big_endian(output)))
}
