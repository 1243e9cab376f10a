//! Ledger collaborator contract: named operations with string arguments.

use async_trait::async_trait;
use thiserror::Error;

/// Source-ledger query names (block access and account bootstrap).
pub mod source {
    pub const GET_ALL_PLAYERS: &str = "CurrencyContract:GetAllPlayers";
    pub const GET_CHAIN_INFO: &str = "GetChainInfo";
    pub const GET_BLOCK_BY_NUMBER: &str = "GetBlockByNumber";
}

/// Anchor-ledger operation names.
pub mod anchor {
    pub const INIT: &str = "Init";
    pub const COMMIT_NO_CHANGE: &str = "CommitNoChange";
    pub const COMMIT_PROOF: &str = "CommitProof";
    pub const QUERY_STATE_ROOT: &str = "QueryStateRoot";
    pub const QUERY_ALL_STATE_ROOTS: &str = "QueryAllStateRoots";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger processed the call and refused it.
    #[error("{op} rejected: {reason}")]
    Rejected { op: String, reason: String },
    #[error("unknown operation {0}")]
    UnknownOperation(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// Request/response access to a ledger, addressed by operation name.
/// `evaluate` is read-only, `submit` may change ledger state.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn evaluate(&self, op: &str, args: &[String]) -> Result<Vec<u8>, LedgerError>;
    async fn submit(&self, op: &str, args: &[String]) -> Result<Vec<u8>, LedgerError>;
}

impl LedgerError {
    pub fn rejected(op: &str, reason: impl ToString) -> Self {
        LedgerError::Rejected { op: op.to_string(), reason: reason.to_string() }
    }
}
