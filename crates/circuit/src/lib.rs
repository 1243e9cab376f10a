//! Batch transition circuit over Poseidon Merkle paths.
//!
//! A batch is `BATCH` chained single-leaf updates on a depth-`DEPTH` tree.
//! Public inputs are the root before the first slot and after the last.

use pasta_curves::Fp;
use thiserror::Error;

use accum::TableError;

pub mod backend;
pub mod batch_circuit;
pub mod witness;

pub use backend::{
    BatchProver, BatchVerifier, Halo2Prover, Halo2Verifier, MockBackend, MockVerifier, ProofScheme,
    VerifyingKeyEnvelope,
};
pub use batch_circuit::{BatchConfig, BatchTransitionCircuit};
pub use witness::{assemble_batch, BatchWitness, PendingUpdate, SlotWitness, UpdateKind};

/// Circuit shape parameters.
pub mod params {
    /// Transaction slots per proof (B).
    pub const BATCH_SIZE: usize = 32;
    /// Upper bound on rows used by one Poseidon hash, constants included.
    pub const POSEIDON_ROWS: usize = 52;
    const ROW_MARGIN: usize = 64;

    /// Rows needed by a `(depth, batch)` circuit: per slot, two leaf hashes,
    /// two hashes and two swap rows per level, and one balance row.
    pub const fn rows(depth: usize, batch: usize) -> usize {
        batch * ((2 + 2 * depth) * POSEIDON_ROWS + 2 * depth + 1) + ROW_MARGIN
    }

    /// Smallest `k` with `2^k >= rows(depth, batch)`.
    pub const fn min_k(depth: usize, batch: usize) -> u32 {
        let rows = rows(depth, batch);
        let mut k = 1;
        while (1usize << k) < rows { k += 1; }
        k
    }
}

/// Public inputs of one batch proof, in instance-column order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BatchPublic {
    pub old_root: Fp,
    pub new_root: Fp,
}

impl BatchPublic {
    pub fn new(old_root: Fp, new_root: Fp) -> Self { Self { old_root, new_root } }
    pub fn to_instances(&self) -> Vec<Fp> { vec![self.old_root, self.new_root] }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CircuitError {
    #[error("{count} updates exceed batch capacity {capacity}")]
    BatchOverflow { count: usize, capacity: usize },
    #[error("proof depth {got}, circuit expects {expected}")]
    DepthMismatch { expected: usize, got: usize },
    #[error("slot {slot} does not start from the running root")]
    StaleWitness { slot: usize },
    #[error("batch result does not match the table root")]
    RootMismatch,
    #[error("balance delta does not fit in i64")]
    DeltaOutOfRange,
    #[error("circuit not satisfied: {0}")]
    Unsatisfied(String),
    #[error("k = {k} too small, shape needs at least {min}")]
    CircuitTooLarge { k: u32, min: u32 },
    #[error("invalid verifying key: {0}")]
    InvalidVerifyingKey(String),
    #[error("proof rejected")]
    VerificationFailed,
    #[error("halo2: {0}")]
    Halo2(String),
    #[error(transparent)]
    Table(#[from] TableError),
}

impl From<halo2_proofs::plonk::Error> for CircuitError {
    fn from(e: halo2_proofs::plonk::Error) -> Self { CircuitError::Halo2(format!("{e:?}")) }
}

#[cfg(test)]
mod tests {
    use super::params::*;

    #[test]
    fn production_shape_fits_k16() {
        assert_eq!(min_k(accum::params::TREE_DEPTH, BATCH_SIZE), 16);
    }

    #[test]
    fn min_k_is_tight() {
        for (d, b) in [(1, 1), (2, 2), (4, 3), (10, 32)] {
            let k = min_k(d, b);
            assert!((1usize << k) >= rows(d, b));
            assert!((1usize << (k - 1)) < rows(d, b));
        }
    }
}
