//! Account-state accumulator: Poseidon hashing, the fixed-capacity account
//! table and the Merkle engine over it.

pub mod merkle;
pub mod poseidon;
pub mod table;

pub use merkle::{MerkleError, MerkleProof};
pub use table::{AccountId, AccountState, AccountTable, TableError, Transition};

/// Tree shape used in production.
pub mod params {
    /// Tree depth D; the table holds 2^D accounts.
    pub const TREE_DEPTH: usize = 10;
    pub const CAPACITY: usize = 1 << TREE_DEPTH;
}
