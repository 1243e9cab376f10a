//! Shared types for the rollup state engine: field encoding, ledger records,
//! canonical encoding and the ledger collaborator contract.

pub mod encode;
pub mod field;
pub mod ledger;
pub mod types;

pub use encode::*;
pub use field::*;
pub use ledger::{LedgerError, LedgerGateway};
pub use types::*;
