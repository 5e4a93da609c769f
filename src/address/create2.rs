//! Deterministic escrow address derivation
//!
//! `keccak256(prefix || deployer || salt || init_code_hash)[12..]`
//!
//! EVM chains use `0xff` as the prefix. The TVM reserves `0x41` for
//! contract-creation addresses instead. Using the wrong byte still yields a
//! well-formed address, just one nobody controls, so the prefix is always
//! passed in from chain configuration.

use super::{CanonicalAddress, ChainFamily};

use ethers::types::H256;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// EIP-1167 minimal proxy creation code, split around the implementation address
const PROXY_PREFIX: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d,
    0x3d, 0x36, 0x3d, 0x73,
];
const PROXY_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// Leading byte of the CREATE2 hash preimage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Create2Prefix(pub u8);

impl Create2Prefix {
    pub const EVM: Create2Prefix = Create2Prefix(0xff);
    pub const TRON: Create2Prefix = Create2Prefix(0x41);

    /// Default for a family when the chain config does not pin one
    pub fn default_for(family: ChainFamily) -> Self {
        match family {
            ChainFamily::Evm => Self::EVM,
            ChainFamily::Tron => Self::TRON,
        }
    }
}

/// Compute the CREATE2 address of an escrow clone
pub fn derive_escrow_address(
    deployer: &CanonicalAddress,
    salt: H256,
    init_code_hash: H256,
    prefix: Create2Prefix,
) -> CanonicalAddress {
    let mut hasher = Keccak256::new();
    hasher.update([prefix.0]);
    hasher.update(deployer.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(init_code_hash.as_bytes());
    let digest = hasher.finalize();

    CanonicalAddress::from_slice(&digest[12..])
}

/// Init-code hash of the minimal proxy the escrow factory clones for `implementation`
pub fn proxy_bytecode_hash(implementation: &CanonicalAddress) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(PROXY_PREFIX);
    hasher.update(implementation.as_bytes());
    hasher.update(PROXY_SUFFIX);
    H256::from_slice(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{to_canonical, ChainFamily};
    use ethers::utils::keccak256;

    // EIP-1014 example vectors
    #[test]
    fn test_evm_prefix_matches_eip1014_vectors() {
        let init_code_hash = H256::from(keccak256([0x00u8]));

        let zero_deployer = derive_escrow_address(
            &CanonicalAddress::ZERO,
            H256::zero(),
            init_code_hash,
            Create2Prefix::EVM,
        );
        assert_eq!(
            zero_deployer,
            to_canonical("0x4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38", ChainFamily::Evm).unwrap()
        );

        let deadbeef = to_canonical("0xdeadbeef00000000000000000000000000000000", ChainFamily::Evm)
            .unwrap();
        assert_eq!(
            derive_escrow_address(&deadbeef, H256::zero(), init_code_hash, Create2Prefix::EVM),
            to_canonical("0xb928f69bb1d91cd65274e3c79d8986362984fda3", ChainFamily::Evm).unwrap()
        );
    }

    #[test]
    fn test_family_prefixes_never_collide() {
        let deployers = [
            CanonicalAddress::ZERO,
            CanonicalAddress::from_bytes([0x4f; 20]),
            CanonicalAddress::from_bytes([0x17; 20]),
        ];
        let salts = [H256::zero(), H256::repeat_byte(0x01), H256::repeat_byte(0xee)];

        for deployer in &deployers {
            for salt in salts {
                let init_code_hash = proxy_bytecode_hash(deployer);
                let evm = derive_escrow_address(deployer, salt, init_code_hash, Create2Prefix::EVM);
                let tron =
                    derive_escrow_address(deployer, salt, init_code_hash, Create2Prefix::TRON);
                assert_ne!(evm, tron);
            }
        }
    }

    #[test]
    fn test_proxy_hash_depends_on_implementation() {
        let a = proxy_bytecode_hash(&CanonicalAddress::from_bytes([0x01; 20]));
        let b = proxy_bytecode_hash(&CanonicalAddress::from_bytes([0x02; 20]));
        assert_ne!(a, b);
        assert_eq!(a, proxy_bytecode_hash(&CanonicalAddress::from_bytes([0x01; 20])));
    }

    #[test]
    fn test_default_prefix_per_family() {
        assert_eq!(Create2Prefix::default_for(ChainFamily::Evm), Create2Prefix(0xff));
        assert_eq!(Create2Prefix::default_for(ChainFamily::Tron), Create2Prefix(0x41));
    }
}
