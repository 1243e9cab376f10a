//! Rollup operator: follows the source ledger block by block, proves each
//! block's account updates and anchors the resulting root.

use std::{future::Future, sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::*;

use accum::AccountTable;
use circuit::{assemble_batch, BatchProver, BatchPublic};
use primitives::ledger::{anchor as anchor_ops, source};
use primitives::{field_hex, field_to_base64, CommittedRoot, LedgerError, LedgerGateway, Player};

use crate::config::OperatorConfig;
use crate::decode::BlockDecoder;
use crate::error::OperatorError;
use crate::state::{RecordOutcome, RollupState};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    Bootstrapping,
    Idle,
    Processing(u64),
    Proving(u64),
    Committing(u64),
    Stopped,
}

/// How a block reached the anchor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Commit {
    NoChange,
    Proof { updates: usize },
}

pub struct RollupOperator<const DEPTH: usize, const BATCH: usize> {
    config: OperatorConfig,
    source: Arc<dyn LedgerGateway>,
    anchor: Arc<dyn LedgerGateway>,
    decoder: Arc<dyn BlockDecoder>,
    prover: Arc<dyn BatchProver<DEPTH, BATCH>>,
    state: Option<RollupState>,
    phase: Phase,
    /// Highest block whose root the anchor has accepted.
    committed_block: u64,
}

impl<const DEPTH: usize, const BATCH: usize> RollupOperator<DEPTH, BATCH> {
    pub fn new(
        config: OperatorConfig,
        source: Arc<dyn LedgerGateway>,
        anchor: Arc<dyn LedgerGateway>,
        decoder: Arc<dyn BlockDecoder>,
        prover: Arc<dyn BatchProver<DEPTH, BATCH>>,
    ) -> Self {
        let committed_block = config.genesis_block;
        Self { config, source, anchor, decoder, prover, state: None, phase: Phase::Bootstrapping, committed_block }
    }

    pub fn phase(&self) -> Phase { self.phase }
    pub fn committed_block(&self) -> u64 { self.committed_block }
    pub fn state(&self) -> Option<&RollupState> { self.state.as_ref() }

    fn set_phase(&mut self, phase: Phase) {
        trace!(from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
    }

    /// Seed the table from the account ledger and publish key and root.
    pub async fn bootstrap(&mut self) -> Result<(), OperatorError> {
        self.set_phase(Phase::Bootstrapping);
        let raw = self.evaluate_source(source::GET_ALL_PLAYERS, vec![]).await?;
        let players = parse_players(&raw)?;
        let table = AccountTable::bootstrap(DEPTH, &players)?;
        let root = table.root();

        let vk = STANDARD.encode(self.prover.verifying_key().to_bytes());
        self.submit_anchor(anchor_ops::INIT, vec![vk, field_to_base64(&root)]).await?;

        info!(accounts = players.len(), capacity = table.capacity(), root = %field_hex(&root), "bootstrapped");
        self.state = Some(RollupState::new(table));
        self.committed_block = self.config.genesis_block;
        self.set_phase(Phase::Idle);
        Ok(())
    }

    /// Poll until `shutdown` turns true. Bootstraps first if needed.
    /// Returns only on shutdown or a fault that needs intervention.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), OperatorError> {
        if self.state.is_none() {
            self.bootstrap().await?;
        }
        info!(interval_ms = self.config.poll_interval_ms, "operator started");
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancelled(shutdown.clone()) => break,
            }

            match self.tick(&shutdown).await {
                Ok(0) => {}
                Ok(committed) => debug!(%committed, upto = self.committed_block, "tick done"),
                Err(OperatorError::Cancelled) => break,
                Err(e) if e.is_fatal() => {
                    error!(%e, "operator halted");
                    self.set_phase(Phase::Stopped);
                    return Err(e);
                }
                Err(e) => warn!(%e, retry_from = self.committed_block + 1, "tick aborted"),
            }
        }

        info!(committed = self.committed_block, "operator stopped");
        self.set_phase(Phase::Stopped);
        Ok(())
    }

    /// Commit every sealed block after the watermark, in order. Stops at the
    /// first failure; that block is retried on the next tick.
    pub async fn tick(&mut self, shutdown: &watch::Receiver<bool>) -> Result<usize, OperatorError> {
        if self.state.is_none() { return Err(OperatorError::NotBootstrapped); }
        let raw = self.evaluate_source(source::GET_CHAIN_INFO, vec![self.config.channel.clone()]).await?;
        let info = self.decoder.decode_chain_info(&raw).map_err(OperatorError::ChainInfo)?;
        let Some(newest) = info.newest_block() else { return Ok(0) };

        let mut committed = 0;
        for block in self.committed_block + 1..=newest {
            if *shutdown.borrow() { return Err(OperatorError::Cancelled); }
            let commit = self.process_block(block, shutdown).await?;
            self.committed_block = block;
            committed += 1;
            info!(%block, ?commit, "block anchored");
        }

        if committed > 0 && self.config.log_committed_roots {
            self.log_committed_roots().await?;
        }
        Ok(committed)
    }

    /// Apply, prove and anchor one block. Local state is rolled back unless
    /// the anchor accepted the block.
    pub async fn process_block(
        &mut self,
        block: u64,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Commit, OperatorError> {
        let snapshot = self.state.clone().ok_or(OperatorError::NotBootstrapped)?;
        let result = self.advance(block, shutdown).await;
        match &result {
            Ok(_) => {}
            Err(e @ OperatorError::Consistency { .. }) => error!(%block, %e, "anchored root diverges from local state"),
            Err(e @ OperatorError::Witness { .. }) => {
                error!(%block, %e, "block cannot be proved");
                self.state = Some(snapshot);
            }
            Err(e) => {
                warn!(%block, %e, "block rolled back");
                self.state = Some(snapshot);
            }
        }
        self.set_phase(Phase::Idle);
        result
    }

    async fn advance(&mut self, block: u64, shutdown: &watch::Receiver<bool>) -> Result<Commit, OperatorError> {
        self.set_phase(Phase::Processing(block));
        let raw = self
            .evaluate_source(source::GET_BLOCK_BY_NUMBER, vec![self.config.channel.clone(), block.to_string()])
            .await?;
        let decoded = self.decoder.decode_block(&raw).map_err(|source| OperatorError::Decode { block, source })?;
        if decoded.number != block {
            return Err(OperatorError::Response {
                op: source::GET_BLOCK_BY_NUMBER.into(),
                reason: format!("asked for block {block}, got {}", decoded.number),
            });
        }

        let (updates, latest_root) = {
            let state = self.state.as_mut().ok_or(OperatorError::NotBootstrapped)?;
            let mut dropped = 0usize;
            for record in &decoded.transactions {
                if *shutdown.borrow() { return Err(OperatorError::Cancelled); }
                let outcome =
                    state.apply_record(block, record).map_err(|source| OperatorError::Witness { block, source })?;
                if outcome == RecordOutcome::Dropped { dropped += 1; }
            }
            debug!(%block, txs = decoded.transactions.len(), updates = state.pending.len(), %dropped, "block applied");
            (state.pending.len(), state.latest_root())
        };

        let commit = if updates == 0 {
            self.set_phase(Phase::Committing(block));
            let root = field_to_base64(&latest_root);
            self.commit(block, anchor_ops::COMMIT_NO_CHANGE, vec![block.to_string(), root]).await?;
            Commit::NoChange
        } else {
            self.set_phase(Phase::Proving(block));
            let (public, proof) = self.prove(block, shutdown).await?;

            self.set_phase(Phase::Committing(block));
            self.prover.verify(&public, &proof).map_err(|source| OperatorError::Verification { block, source })?;
            let args = vec![
                block.to_string(),
                field_to_base64(&public.old_root),
                field_to_base64(&public.new_root),
                STANDARD.encode(&proof),
            ];
            self.commit(block, anchor_ops::COMMIT_PROOF, args).await?;
            Commit::Proof { updates }
        };

        self.verify_anchored(block).await?;
        if let Some(state) = self.state.as_mut() { state.seal(); }
        Ok(commit)
    }

    /// Prove the pending updates on the blocking pool, abandoning the wait on shutdown.
    async fn prove(&self, block: u64, shutdown: &watch::Receiver<bool>) -> Result<(BatchPublic, Vec<u8>), OperatorError> {
        let state = self.state.as_ref().ok_or(OperatorError::NotBootstrapped)?;
        let witness = assemble_batch::<DEPTH, BATCH>(state.committed_root, &state.pending, &state.table)
            .map_err(|source| OperatorError::Witness { block, source })?;
        let public = witness.public;
        let prover = self.prover.clone();
        let job = tokio::task::spawn_blocking(move || prover.prove(&witness));

        let proof = tokio::select! {
            res = job => res.map_err(|e| OperatorError::Worker(e.to_string()))?,
            _ = cancelled(shutdown.clone()) => return Err(OperatorError::Cancelled),
        };
        let proof = proof.map_err(|source| OperatorError::Proof { block, source })?;
        debug!(%block, bytes = proof.len(), "proof ready");
        Ok((public, proof))
    }

    /// Submit a commit. A failed submit whose block is nevertheless anchored
    /// with the local root (a lost acknowledgement) counts as accepted.
    async fn commit(&self, block: u64, op: &str, args: Vec<String>) -> Result<(), OperatorError> {
        let Err(err) = self.submit_anchor(op, args).await else { return Ok(()) };
        match self.anchored_root(block).await {
            Ok(anchored) if anchored == self.local_root_b64()? => {
                warn!(%block, %err, "commit already anchored");
                Ok(())
            }
            _ => Err(err),
        }
    }

    async fn verify_anchored(&self, block: u64) -> Result<(), OperatorError> {
        let anchored = self.anchored_root(block).await?;
        let local = self.local_root_b64()?;
        if anchored != local {
            return Err(OperatorError::Consistency { block, anchored, local });
        }
        Ok(())
    }

    async fn anchored_root(&self, block: u64) -> Result<String, OperatorError> {
        let raw = self.evaluate_anchor(anchor_ops::QUERY_STATE_ROOT, vec![block.to_string()]).await?;
        String::from_utf8(raw).map(|s| s.trim().to_string()).map_err(|e| OperatorError::Response {
            op: anchor_ops::QUERY_STATE_ROOT.into(),
            reason: e.to_string(),
        })
    }

    fn local_root_b64(&self) -> Result<String, OperatorError> {
        let state = self.state.as_ref().ok_or(OperatorError::NotBootstrapped)?;
        Ok(field_to_base64(&state.latest_root()))
    }

    pub async fn committed_roots(&self) -> Result<Vec<CommittedRoot>, OperatorError> {
        let raw = self.evaluate_anchor(anchor_ops::QUERY_ALL_STATE_ROOTS, vec![]).await?;
        serde_json::from_slice(&raw).map_err(|e| OperatorError::Response {
            op: anchor_ops::QUERY_ALL_STATE_ROOTS.into(),
            reason: e.to_string(),
        })
    }

    async fn log_committed_roots(&self) -> Result<(), OperatorError> {
        for entry in self.committed_roots().await? {
            info!(block = entry.block_id, root = %entry.root, "anchored root");
        }
        Ok(())
    }

    async fn evaluate_source(&self, op: &str, args: Vec<String>) -> Result<Vec<u8>, OperatorError> {
        timed(self.config.rpc_timeout(), op, self.source.evaluate(op, &args)).await
    }

    async fn evaluate_anchor(&self, op: &str, args: Vec<String>) -> Result<Vec<u8>, OperatorError> {
        timed(self.config.rpc_timeout(), op, self.anchor.evaluate(op, &args)).await
    }

    async fn submit_anchor(&self, op: &str, args: Vec<String>) -> Result<Vec<u8>, OperatorError> {
        timed(self.config.rpc_timeout(), op, self.anchor.submit(op, &args)).await
    }
}

async fn timed<F>(limit: Duration, op: &str, call: F) -> Result<Vec<u8>, OperatorError>
where
    F: Future<Output = Result<Vec<u8>, LedgerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(res) => res.map_err(|source| OperatorError::Ledger { op: op.to_string(), source }),
        Err(_) => Err(OperatorError::Timeout { op: op.to_string(), millis: limit.as_millis() as u64 }),
    }
}

/// Ask every task watching `tx` to stop. False when none are left to ask.
pub fn request_shutdown(tx: &watch::Sender<bool>) -> bool {
    let delivered = tx.send(true).is_ok();
    if !delivered {
        debug!("shutdown requested after all tasks exited");
    }
    delivered
}

/// Resolves once the shutdown flag is set. A dropped sender never cancels.
async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() { return; }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The account contract answers an empty ledger with `null` or nothing.
fn parse_players(raw: &[u8]) -> Result<Vec<Player>, OperatorError> {
    if raw.iter().all(u8::is_ascii_whitespace) { return Ok(Vec::new()); }
    let players: Option<Vec<Player>> = serde_json::from_slice(raw).map_err(|e| OperatorError::Response {
        op: source::GET_ALL_PLAYERS.into(),
        reason: e.to_string(),
    })?;
    Ok(players.unwrap_or_default())
}
