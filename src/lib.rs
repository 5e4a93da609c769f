//! HTLC Relayer - cross-chain escrow swaps between EVM and Tron resolvers
//!
//! Builds single-fill limit orders whose fill creates a hash-time-locked
//! source escrow, mirrors it with a destination escrow on the other chain,
//! and settles both with the order secret, or cancels them once their
//! timelocks allow.

pub mod address;
pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod immutables;
pub mod metrics;
pub mod order;
pub mod resolver;
pub mod state;
pub mod swap;
pub mod timelock;
pub mod wallet;

pub use error::{RelayerResult, SwapError};
pub use order::{create_order, Order, OrderOptions, OrderParams, Secret};
pub use swap::{SwapDirection, SwapOrchestrator, SwapResult, SwapState};
