//! Address handling for the chain families the relayer bridges
//!
//! Every native address form (EVM hex, Tron base58check, Tron 21-byte hex)
//! is a projection of one canonical 20-byte value. Escrow addresses are
//! derived locally with CREATE2, whose prefix byte differs per family.

pub mod codec;
pub mod create2;

pub use codec::{from_canonical, remove_prefix, to_canonical};
pub use create2::{derive_escrow_address, proxy_bytecode_hash, Create2Prefix};

use ethers::types::{Address, H160, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain families with distinct address encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Tron,
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFamily::Evm => write!(f, "evm"),
            ChainFamily::Tron => write!(f, "tron"),
        }
    }
}

/// Fixed-width, family-independent account/contract address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalAddress(Address);

impl CanonicalAddress {
    pub const ZERO: CanonicalAddress = CanonicalAddress(H160([0u8; 20]));

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(Address::from(bytes))
    }

    /// Build from a slice that is known to hold exactly 20 bytes
    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        Self(Address::from_slice(bytes))
    }

    /// Low 160 bits of an ABI `uint256`-encoded address
    pub fn from_word(word: U256) -> Self {
        let mut buf = [0u8; 32];
        word.to_big_endian(&mut buf);
        Self::from_slice(&buf[12..])
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        self.0.as_fixed_bytes()
    }

    pub fn to_word(&self) -> U256 {
        U256::from_big_endian(self.0.as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn h160(&self) -> Address {
        self.0
    }
}

impl From<Address> for CanonicalAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl From<CanonicalAddress> for Address {
    fn from(address: CanonicalAddress) -> Self {
        address.0
    }
}

impl fmt::Display for CanonicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}
