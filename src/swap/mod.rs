//! Swap module - cross-chain escrow swap orchestration
//!
//! This module provides:
//! - The swap state machine and its progress records
//! - The orchestrator that drives an order across both chains

pub mod orchestrator;
pub mod state;

pub use orchestrator::{ChainLeg, OrchestratorConfig, SwapDirection, SwapOrchestrator};
pub use state::{SwapEvent, SwapFailure, SwapPhase, SwapResult, SwapState, TxRecord};
