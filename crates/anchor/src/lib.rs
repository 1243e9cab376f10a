//! Anchor-ledger logic: verifies batch proofs and keeps the committed-root log.

pub mod contract;
pub mod gateway;
pub mod store;

pub use contract::{AnchorContract, AnchorError, GENESIS_BLOCK};
pub use gateway::LocalAnchor;
pub use store::{MemoryStore, StateStore};
