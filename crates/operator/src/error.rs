//! Operator faults, split into retryable and fatal.

use accum::TableError;
use circuit::CircuitError;
use primitives::LedgerError;
use thiserror::Error;

use crate::decode::DecodeError;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("operator has not bootstrapped")]
    NotBootstrapped,
    #[error("{op}: {source}")]
    Ledger { op: String, source: LedgerError },
    #[error("{op} timed out after {millis} ms")]
    Timeout { op: String, millis: u64 },
    #[error("malformed {op} response: {reason}")]
    Response { op: String, reason: String },
    #[error("chain info: {0}")]
    ChainInfo(DecodeError),
    #[error("block {block}: {source}")]
    Decode { block: u64, source: DecodeError },
    #[error("bootstrap: {0}")]
    Bootstrap(#[from] TableError),
    #[error("block {block}: cannot build batch witness: {source}")]
    Witness { block: u64, source: CircuitError },
    #[error("block {block}: proving failed: {source}")]
    Proof { block: u64, source: CircuitError },
    #[error("block {block}: local verification failed: {source}")]
    Verification { block: u64, source: CircuitError },
    #[error("proving worker: {0}")]
    Worker(String),
    #[error("block {block}: anchor holds {anchored}, local root is {local}")]
    Consistency { block: u64, anchored: String, local: String },
    #[error("cancelled")]
    Cancelled,
}

impl OperatorError {
    /// Faults that need an operator rather than a retry. A witness that
    /// cannot be assembled fails the same way on every attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OperatorError::Consistency { .. } | OperatorError::Witness { .. } | OperatorError::NotBootstrapped
        )
    }
}
