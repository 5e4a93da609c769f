//! Swap progress persistence
//!
//! Handles:
//! - Per-swap JSON snapshots written after every transition
//! - Listing swaps that stopped before a terminal state

mod journal;

pub use journal::{SwapJournal, SwapRecord};
