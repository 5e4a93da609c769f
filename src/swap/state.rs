//! Swap lifecycle states and progress records

use crate::address::CanonicalAddress;
use crate::chain::SubmittedTx;
use crate::error::{RelayerResult, SwapError};
use crate::timelock::{EscrowState, Side};

use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Orchestrator state for one swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Created,
    Signed,
    SrcFilled,
    SrcEscrowConfirmed,
    DstEscrowDeployed,
    Withdrawing,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapState::Created => "created",
            SwapState::Signed => "signed",
            SwapState::SrcFilled => "src_filled",
            SwapState::SrcEscrowConfirmed => "src_escrow_confirmed",
            SwapState::DstEscrowDeployed => "dst_escrow_deployed",
            SwapState::Withdrawing => "withdrawing",
            SwapState::Completed => "completed",
            SwapState::Cancelled => "cancelled",
            SwapState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Confirmations that move a swap forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapEvent {
    OrderSigned,
    SrcFillSubmitted,
    SrcEscrowCreated,
    DstEscrowCreated,
    DstWithdrawn,
    SrcWithdrawn,
    EscrowsCancelled,
    Failed,
}

impl fmt::Display for SwapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl SwapState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapState::Completed | SwapState::Cancelled | SwapState::Failed
        )
    }

    /// Next state after `event`, or `InvalidStateTransition`
    pub fn next(self, event: SwapEvent) -> RelayerResult<SwapState> {
        use SwapEvent as E;
        use SwapState as S;

        let next = match (self, event) {
            (S::Created, E::OrderSigned) => S::Signed,
            (S::Signed, E::SrcFillSubmitted) => S::SrcFilled,
            (S::SrcFilled, E::SrcEscrowCreated) => S::SrcEscrowConfirmed,
            (S::SrcEscrowConfirmed, E::DstEscrowCreated) => S::DstEscrowDeployed,
            (S::DstEscrowDeployed, E::DstWithdrawn) => S::Withdrawing,
            (S::Withdrawing, E::SrcWithdrawn) => S::Completed,
            (from, E::EscrowsCancelled) if !from.is_terminal() => S::Cancelled,
            (from, E::Failed) if !from.is_terminal() => S::Failed,
            (from, event) => {
                return Err(SwapError::InvalidStateTransition {
                    from: from.to_string(),
                    to: event.to_string(),
                })
            }
        };
        Ok(next)
    }
}

/// Step of the swap a transaction or failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPhase {
    Validate,
    ReadImplementations,
    Sign,
    DeploySrc,
    AwaitSrcEscrow,
    DeployDst,
    AwaitDstEscrow,
    WithdrawDst,
    WithdrawSrc,
    CancelDst,
    CancelSrc,
}

/// Transaction produced by the swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub side: Side,
    pub phase: SwapPhase,
    pub chain_id: u64,
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub block_timestamp: Option<u64>,
}

impl TxRecord {
    pub fn included(side: Side, phase: SwapPhase, chain_id: u64, tx: &SubmittedTx) -> Self {
        Self {
            side,
            phase,
            chain_id,
            tx_hash: tx.tx_hash,
            block_number: Some(tx.block_number),
            block_timestamp: Some(tx.block_timestamp),
        }
    }

    /// Broadcast, inclusion unknown
    pub fn broadcast(side: Side, phase: SwapPhase, chain_id: u64, tx_hash: H256) -> Self {
        Self {
            side,
            phase,
            chain_id,
            tx_hash,
            block_number: None,
            block_timestamp: None,
        }
    }
}

/// What went wrong, with enough context for an operator to resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapFailure {
    pub side: Option<Side>,
    pub phase: SwapPhase,
    pub error: String,
    pub retryable: bool,
    /// Transactions produced up to the failure
    pub transactions: Vec<TxRecord>,
}

/// Outcome and full transaction trail of one swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResult {
    pub swap_id: Uuid,
    pub order_hash: H256,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub state: SwapState,
    pub transactions: Vec<TxRecord>,
    pub src_escrow: Option<CanonicalAddress>,
    pub dst_escrow: Option<CanonicalAddress>,
    pub src_escrow_state: Option<EscrowState>,
    pub dst_escrow_state: Option<EscrowState>,
    pub failure: Option<SwapFailure>,
}

impl SwapResult {
    pub fn new(order_hash: H256, src_chain_id: u64, dst_chain_id: u64) -> Self {
        Self {
            swap_id: Uuid::new_v4(),
            order_hash,
            src_chain_id,
            dst_chain_id,
            state: SwapState::Created,
            transactions: Vec::new(),
            src_escrow: None,
            dst_escrow: None,
            src_escrow_state: None,
            dst_escrow_state: None,
            failure: None,
        }
    }

    pub fn apply(&mut self, event: SwapEvent) -> RelayerResult<SwapState> {
        self.state = self.state.next(event)?;
        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let events = [
            SwapEvent::OrderSigned,
            SwapEvent::SrcFillSubmitted,
            SwapEvent::SrcEscrowCreated,
            SwapEvent::DstEscrowCreated,
            SwapEvent::DstWithdrawn,
            SwapEvent::SrcWithdrawn,
        ];
        let mut state = SwapState::Created;
        for event in events {
            state = state.next(event).unwrap();
        }
        assert_eq!(state, SwapState::Completed);
    }

    #[test]
    fn test_steps_cannot_be_skipped() {
        let err = SwapState::Signed
            .next(SwapEvent::DstEscrowCreated)
            .unwrap_err();
        assert!(matches!(err, SwapError::InvalidStateTransition { .. }));
        assert!(SwapState::Created.next(SwapEvent::SrcWithdrawn).is_err());
    }

    #[test]
    fn test_cancel_and_fail_only_from_live_states() {
        assert_eq!(
            SwapState::DstEscrowDeployed
                .next(SwapEvent::EscrowsCancelled)
                .unwrap(),
            SwapState::Cancelled
        );
        assert_eq!(
            SwapState::Created.next(SwapEvent::Failed).unwrap(),
            SwapState::Failed
        );
        assert!(SwapState::Completed.next(SwapEvent::EscrowsCancelled).is_err());
        assert!(SwapState::Cancelled.next(SwapEvent::Failed).is_err());
    }

    #[test]
    fn test_result_serializes_state_as_snake_case() {
        let mut result = SwapResult::new(H256::zero(), 1, 2);
        result.apply(SwapEvent::OrderSigned).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["state"], "signed");
    }
}
