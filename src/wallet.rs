//! Maker-side order signing capability

use crate::address::CanonicalAddress;
use crate::error::{RelayerResult, SwapError};
use crate::order::{Order, TypedOrder};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Signature;

/// Signs EIP-712 order digests on behalf of the maker
#[async_trait]
pub trait OrderSigner: Send + Sync {
    fn address(&self) -> CanonicalAddress;

    /// 65-byte signature over the order hash for `chain_id`'s limit order protocol
    async fn sign_order(
        &self,
        order: &Order,
        chain_id: u64,
        verifying_contract: CanonicalAddress,
    ) -> RelayerResult<Signature>;
}

/// In-process key; for development and tests, not key custody
pub struct LocalOrderSigner {
    wallet: LocalWallet,
}

impl LocalOrderSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }
}

#[async_trait]
impl OrderSigner for LocalOrderSigner {
    fn address(&self) -> CanonicalAddress {
        self.wallet.address().into()
    }

    async fn sign_order(
        &self,
        order: &Order,
        chain_id: u64,
        verifying_contract: CanonicalAddress,
    ) -> RelayerResult<Signature> {
        let typed = TypedOrder::new(order, chain_id, verifying_contract);
        self.wallet
            .sign_typed_data(&typed)
            .await
            .map_err(|e| SwapError::InvalidSignature(e.to_string()))
    }
}
