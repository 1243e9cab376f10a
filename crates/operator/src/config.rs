//! Operator configuration loaded from TOML.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Operator settings, loaded from TOML. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OperatorConfig {
    /// How often to poll the source ledger, in ms.
    pub poll_interval_ms: u64,
    /// Upper bound on any single ledger call, in ms.
    pub rpc_timeout_ms: u64,
    /// Source-ledger channel passed to block queries.
    pub channel: String,
    /// Block already anchored by `Init`; processing starts after it.
    pub genesis_block: u64,
    /// Dump the anchor's full root history after each productive tick.
    pub log_committed_roots: bool,
    pub devnet: DevnetConfig,
}

/// Settings for the in-process demo network driven by the binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DevnetConfig {
    /// Players seeded before the operator bootstraps.
    pub initial_players: u64,
    /// How often the devnet seals a block of generated traffic, in ms.
    pub block_interval_ms: u64,
    /// Transactions generated per sealed block.
    pub txs_per_block: usize,
    pub prover: ProverKind,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProverKind {
    /// Constraint check only; proofs are digests anyone can recompute.
    /// Development use.
    Mock,
    /// Real halo2 IPA proofs.
    #[default]
    Halo2,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            rpc_timeout_ms: 60_000,
            channel: "mychannel".to_string(),
            genesis_block: anchor::GENESIS_BLOCK,
            log_committed_roots: false,
            devnet: DevnetConfig::default(),
        }
    }
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self { initial_players: 3, block_interval_ms: 2_000, txs_per_block: 4, prover: ProverKind::default() }
    }
}

impl OperatorConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
    pub fn rpc_timeout(&self) -> Duration { Duration::from_millis(self.rpc_timeout_ms) }
}
