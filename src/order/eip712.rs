//! EIP-712 typed-data hashing for limit orders

use super::Order;
use crate::address::CanonicalAddress;

use ethers::abi::{encode, Token};
use ethers::types::transaction::eip712::{EIP712Domain, Eip712};
use ethers::types::{Signature, H256, U256};
use ethers::utils::keccak256;
use std::convert::Infallible;

pub const DOMAIN_NAME: &str = "1inch Limit Order Protocol";
pub const DOMAIN_VERSION: &str = "4";

const ORDER_TYPE: &str = "Order(uint256 salt,address maker,address receiver,address makerAsset,address takerAsset,uint256 makingAmount,uint256 takingAmount,uint256 makerTraits)";

/// An order bound to the domain of one chain's limit order protocol
#[derive(Debug, Clone, Copy)]
pub struct TypedOrder<'a> {
    order: &'a Order,
    chain_id: u64,
    verifying_contract: CanonicalAddress,
}

impl<'a> TypedOrder<'a> {
    pub fn new(order: &'a Order, chain_id: u64, verifying_contract: CanonicalAddress) -> Self {
        Self {
            order,
            chain_id,
            verifying_contract,
        }
    }

    /// Final digest that the maker signs
    pub fn digest(&self) -> H256 {
        match self.encode_eip712() {
            Ok(digest) => H256::from(digest),
            Err(never) => match never {},
        }
    }
}

impl Eip712 for TypedOrder<'_> {
    type Error = Infallible;

    fn domain(&self) -> Result<EIP712Domain, Self::Error> {
        Ok(EIP712Domain {
            name: Some(DOMAIN_NAME.to_string()),
            version: Some(DOMAIN_VERSION.to_string()),
            chain_id: Some(U256::from(self.chain_id)),
            verifying_contract: Some(self.verifying_contract.h160()),
            salt: None,
        })
    }

    fn type_hash() -> Result<[u8; 32], Self::Error> {
        Ok(keccak256(ORDER_TYPE))
    }

    fn struct_hash(&self) -> Result<[u8; 32], Self::Error> {
        let order = self.order;
        let encoded = encode(&[
            Token::FixedBytes(Self::type_hash()?.to_vec()),
            Token::Uint(order.salt()),
            Token::Address(order.maker().h160()),
            Token::Address(order.receiver().h160()),
            Token::Address(order.maker_asset().h160()),
            Token::Address(order.taker_asset().h160()),
            Token::Uint(order.making_amount()),
            Token::Uint(order.taking_amount()),
            Token::Uint(order.maker_traits()),
        ]);
        Ok(keccak256(encoded))
    }
}

/// EIP-2098 compact form `(r, vs)` where `vs = s | (y_parity << 255)`
pub fn compact_signature(signature: &Signature) -> (H256, H256) {
    let mut r = [0u8; 32];
    signature.r.to_big_endian(&mut r);

    let parity = if signature.v >= 27 { signature.v - 27 } else { signature.v } & 1;
    let vs = signature.s | (U256::from(parity) << 255);
    let mut vs_bytes = [0u8; 32];
    vs.to_big_endian(&mut vs_bytes);

    (H256::from(r), H256::from(vs_bytes))
}
