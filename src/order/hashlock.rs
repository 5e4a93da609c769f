//! Swap secret and its hash lock

use crate::error::{RelayerResult, SwapError};

use ethers::types::H256;
use ethers::utils::keccak256;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::str::FromStr;

/// 32-byte preimage released to withdraw from both escrows
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Fresh secret from the OS CSPRNG
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_h256(&self) -> H256 {
        H256::from(self.0)
    }

    /// Single-fill hash lock: `keccak256(secret)`
    pub fn hash_lock(&self) -> H256 {
        H256::from(keccak256(self.0))
    }
}

impl FromStr for Secret {
    type Err = SwapError;

    fn from_str(s: &str) -> RelayerResult<Self> {
        let body = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(body)
            .map_err(|e| SwapError::InvalidParameter(format!("secret is not hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SwapError::InvalidParameter("secret must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

// Never print the preimage
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(hash_lock={:?})", self.hash_lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_lock_is_keccak() {
        let secret = Secret::from_bytes([0u8; 32]);
        assert_eq!(
            format!("{:?}", secret.hash_lock()),
            "0x290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
        );
    }

    #[test]
    fn test_parse_hex() {
        let secret: Secret = format!("0x{}", "ab".repeat(32)).parse().unwrap();
        assert_eq!(secret.as_bytes(), &[0xab; 32]);
        assert!("0x1234".parse::<Secret>().is_err());
        assert!("zz".parse::<Secret>().is_err());
    }

    #[test]
    fn test_debug_hides_preimage() {
        let secret = Secret::from_bytes([0xcd; 32]);
        assert!(!format!("{:?}", secret).contains(&"cd".repeat(32)));
    }

    #[test]
    fn test_random_secrets_differ() {
        assert_ne!(Secret::random(), Secret::random());
    }
}
