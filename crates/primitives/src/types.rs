//! Ledger record types shared by the operator, the anchor and the decoders.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Account contract method names as they appear in argument 0 of a
/// transaction record.
pub mod ops {
    pub const CREATE_PLAYER: &str = "CurrencyContract:CreatePlayer";
    pub const EXCHANGE: &str = "CurrencyContract:ExchangeInGameCurrency";
    pub const RECORD_BANK_TX: &str = "CurrencyContract:RecordBankTransaction";
}

/// A player as returned by the account contract's bulk query. Balances are
/// fixed point with three implied decimals.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: u64,
    pub balance: u64,
    #[serde(default)]
    pub usd_balance: u64,
}

/// One decoded transaction: its id and its ordered string arguments.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    pub tx_id: String,
    pub args: Vec<String>,
}

impl TxRecord {
    pub fn new(tx_id: impl Into<String>, args: &[&str]) -> Self {
        Self { tx_id: tx_id.into(), args: args.iter().map(|a| a.to_string()).collect() }
    }

    pub fn method(&self) -> Option<&str> { self.args.first().map(String::as_str) }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub struct StructuredBlock {
    pub number: u64,
    pub transactions: Vec<TxRecord>,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub struct ChainInfo {
    pub height: u64,
}

impl ChainInfo {
    /// Highest sealed block number; blocks are numbered from zero.
    pub fn newest_block(&self) -> Option<u64> { self.height.checked_sub(1) }
}

/// One entry of the anchor's committed-root log.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommittedRoot {
    pub block_id: u64,
    pub root: String,
}

/// State-transition meaning of a transaction record.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LedgerOp {
    CreateAccount { id: u64 },
    BalanceChange { id: u64, delta: i64 },
    /// Recognised administrative operation with no effect on the tree.
    Acknowledged(String),
    Unrecognized(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpParseError {
    #[error("transaction has no arguments")]
    Empty,
    #[error("{method}: expected {expected} arguments, got {got}")]
    MissingArgs { method: String, expected: usize, got: usize },
    #[error("{method}: bad {field} {value:?}")]
    BadNumber { method: String, field: &'static str, value: String },
}

impl LedgerOp {
    pub fn parse(record: &TxRecord) -> Result<Self, OpParseError> {
        let method = record.method().ok_or(OpParseError::Empty)?;
        match method {
            ops::CREATE_PLAYER => {
                require_args(record, method, 2)?;
                Ok(LedgerOp::CreateAccount { id: parse_num(method, "id", &record.args[1])? })
            }
            ops::EXCHANGE => {
                require_args(record, method, 3)?;
                let id = parse_num(method, "id", &record.args[1])?;
                let delta = parse_num(method, "amount", &record.args[2])?;
                Ok(LedgerOp::BalanceChange { id, delta })
            }
            ops::RECORD_BANK_TX => Ok(LedgerOp::Acknowledged(method.to_string())),
            other => Ok(LedgerOp::Unrecognized(other.to_string())),
        }
    }
}

fn require_args(record: &TxRecord, method: &str, expected: usize) -> Result<(), OpParseError> {
    if record.args.len() < expected {
        return Err(OpParseError::MissingArgs { method: method.to_string(), expected, got: record.args.len() });
    }
    Ok(())
}

fn parse_num<T: std::str::FromStr>(method: &str, field: &'static str, value: &str) -> Result<T, OpParseError> {
    value.trim().parse().map_err(|_| OpParseError::BadNumber {
        method: method.to_string(),
        field,
        value: value.to_string(),
    })
}
