//! Resolver / escrow factory adapter
//!
//! One [`ResolverAdapter`] per chain. The chain family is configuration: it
//! selects the address projection used in errors and logs, and the default
//! CREATE2 prefix when the chain config does not pin one.

pub mod abi;

pub use abi::TakerTraits;

use crate::address::{
    derive_escrow_address, from_canonical, proxy_bytecode_hash, CanonicalAddress, ChainFamily,
    Create2Prefix,
};
use crate::chain::{ChainClient, SubmittedTx, TxRequest};
use crate::error::{RelayerResult, SwapError};
use crate::immutables::Immutables;
use crate::order::{compact_signature, Order, Secret};
use crate::timelock::Side;

use ethers::types::{Signature, U256};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Contract addresses for one chain
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub family: ChainFamily,
    pub resolver: CanonicalAddress,
    pub escrow_factory: CanonicalAddress,
    pub limit_order_protocol: CanonicalAddress,
    pub create2_prefix: Create2Prefix,
}

pub struct ResolverAdapter {
    config: ResolverConfig,
    client: Arc<dyn ChainClient>,
    src_impl: OnceCell<CanonicalAddress>,
    dst_impl: OnceCell<CanonicalAddress>,
}

impl ResolverAdapter {
    pub fn new(config: ResolverConfig, client: Arc<dyn ChainClient>) -> RelayerResult<Self> {
        if client.family() != config.family {
            return Err(SwapError::Config(format!(
                "chain {} client is {} but resolver is configured for {}",
                client.chain_id(),
                client.family(),
                config.family
            )));
        }

        Ok(Self {
            config,
            client,
            src_impl: OnceCell::new(),
            dst_impl: OnceCell::new(),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.client.chain_id()
    }

    pub fn family(&self) -> ChainFamily {
        self.config.family
    }

    pub fn client(&self) -> Arc<dyn ChainClient> {
        self.client.clone()
    }

    /// Resolver contract; the taker of every escrow it creates
    pub fn resolver_address(&self) -> CanonicalAddress {
        self.config.resolver
    }

    pub fn limit_order_protocol(&self) -> CanonicalAddress {
        self.config.limit_order_protocol
    }

    fn native(&self, address: &CanonicalAddress) -> String {
        from_canonical(address, self.config.family)
    }

    async fn submit(&self, label: &str, request: TxRequest) -> RelayerResult<SubmittedTx> {
        let chain_id = self.chain_id();
        let result = self.client.send_transaction(request).await;
        crate::metrics::record_tx_submitted(chain_id, label, result.is_ok());
        let submitted = result?;
        info!(
            "Chain {}: {} included in block {} ({:?})",
            chain_id, label, submitted.block_number, submitted.tx_hash
        );
        Ok(submitted)
    }

    /// Fill `order` through the resolver, creating the source escrow
    pub async fn deploy_src(
        &self,
        chain_id: u64,
        order: &Order,
        signature: &Signature,
        amount: U256,
    ) -> RelayerResult<SubmittedTx> {
        if chain_id != self.chain_id() {
            return Err(SwapError::InvalidParameter(format!(
                "adapter serves chain {}, not {}",
                self.chain_id(),
                chain_id
            )));
        }

        let order_hash = order.hash(chain_id, self.config.limit_order_protocol);
        let signer = signature
            .recover(order_hash)
            .map_err(|e| SwapError::InvalidSignature(e.to_string()))?;
        if CanonicalAddress::from(signer) != order.maker() {
            return Err(SwapError::InvalidSignature(format!(
                "signed by {}, order maker is {}",
                self.native(&signer.into()),
                self.native(&order.maker())
            )));
        }

        let code = self.client.code_at(self.config.resolver).await?;
        if code.is_empty() {
            return Err(SwapError::ContractNotFound {
                chain_id,
                address: self.native(&self.config.resolver),
            });
        }

        let immutables =
            order.to_src_immutables(chain_id, self.config.resolver, amount, order_hash)?;
        let (r, vs) = compact_signature(signature);
        let calldata = abi::deploy_src_calldata(
            &immutables,
            order,
            r,
            vs,
            amount,
            &TakerTraits::for_fill(order),
        );
        debug!(
            "Chain {}: deploySrc order {:?} amount {}",
            chain_id, order_hash, amount
        );

        self.submit(
            "deploy_src",
            TxRequest {
                to: self.config.resolver,
                data: calldata,
                value: order.src_safety_deposit(),
            },
        )
        .await
    }

    /// Create the destination escrow. The factory rejects it when the
    /// destination cancellation would open after `src_cancellation_timestamp`.
    pub async fn deploy_dst(
        &self,
        immutables: &Immutables,
        src_cancellation_timestamp: u64,
    ) -> RelayerResult<SubmittedTx> {
        // Native-asset escrows carry the amount alongside the deposit
        let value = if immutables.token.is_zero() {
            immutables.amount + immutables.safety_deposit
        } else {
            immutables.safety_deposit
        };

        self.submit(
            "deploy_dst",
            TxRequest {
                to: self.config.resolver,
                data: abi::deploy_dst_calldata(immutables, src_cancellation_timestamp),
                value,
            },
        )
        .await
    }

    pub async fn withdraw(
        &self,
        side: Side,
        escrow: CanonicalAddress,
        secret: &Secret,
        immutables: &Immutables,
    ) -> RelayerResult<SubmittedTx> {
        debug!("Withdrawing {} escrow {}", side, self.native(&escrow));
        self.submit(
            "withdraw",
            TxRequest {
                to: self.config.resolver,
                data: abi::withdraw_calldata(escrow, secret, immutables),
                value: U256::zero(),
            },
        )
        .await
    }

    pub async fn cancel(
        &self,
        side: Side,
        escrow: CanonicalAddress,
        immutables: &Immutables,
    ) -> RelayerResult<SubmittedTx> {
        debug!("Cancelling {} escrow {}", side, self.native(&escrow));
        self.submit(
            "cancel",
            TxRequest {
                to: self.config.resolver,
                data: abi::cancel_calldata(escrow, immutables),
                value: U256::zero(),
            },
        )
        .await
    }

    async fn read_impl(&self, signature: &str) -> RelayerResult<CanonicalAddress> {
        let output = self
            .client
            .call(TxRequest {
                to: self.config.escrow_factory,
                data: abi::encode_call(signature, &[]),
                value: U256::zero(),
            })
            .await?;
        abi::decode_address_word(&output).ok_or_else(|| SwapError::ContractNotFound {
            chain_id: self.chain_id(),
            address: self.native(&self.config.escrow_factory),
        })
    }

    /// Source escrow implementation behind the factory's clones; read once
    pub async fn source_impl(&self) -> RelayerResult<CanonicalAddress> {
        self.src_impl
            .get_or_try_init(|| self.read_impl(abi::ESCROW_SRC_IMPLEMENTATION))
            .await
            .copied()
    }

    pub async fn destination_impl(&self) -> RelayerResult<CanonicalAddress> {
        self.dst_impl
            .get_or_try_init(|| self.read_impl(abi::ESCROW_DST_IMPLEMENTATION))
            .await
            .copied()
    }

    fn escrow_address(&self, immutables: &Immutables, implementation: &CanonicalAddress) -> CanonicalAddress {
        derive_escrow_address(
            &self.config.escrow_factory,
            immutables.hash(),
            proxy_bytecode_hash(implementation),
            self.config.create2_prefix,
        )
    }

    /// Address of the source escrow for `immutables` (with `deployed_at` set)
    pub async fn src_escrow_address(&self, immutables: &Immutables) -> RelayerResult<CanonicalAddress> {
        let implementation = self.source_impl().await?;
        Ok(self.escrow_address(immutables, &implementation))
    }

    pub async fn dst_escrow_address(&self, immutables: &Immutables) -> RelayerResult<CanonicalAddress> {
        let implementation = self.destination_impl().await?;
        Ok(self.escrow_address(immutables, &implementation))
    }

    /// Whether a contract already lives at `address`
    pub async fn escrow_exists(&self, address: CanonicalAddress) -> RelayerResult<bool> {
        Ok(!self.client.code_at(address).await?.is_empty())
    }
}
