//! Rollup operator: bootstraps the account table, follows the source ledger,
//! proves each block's updates and anchors the resulting roots.

pub mod config;
pub mod decode;
pub mod devnet;
pub mod error;
pub mod operator;
pub mod state;

pub use config::{DevnetConfig, OperatorConfig, ProverKind};
pub use decode::{BlockDecoder, DecodeError, FabricJsonDecoder, JsonBlockDecoder};
pub use devnet::{DevnetLedger, Workload};
pub use error::OperatorError;
pub use operator::{request_shutdown, Commit, Phase, RollupOperator};
pub use state::{RecordOutcome, RollupState};
