//! Anchor verifier: sequential, hash-chained root commitments.
//!
//! Values are stored as UTF-8 strings: roots and proofs in base64, the block
//! pointer in decimal. Every precondition is checked before the first write.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use pasta_curves::Fp;
use primitives::{field_from_base64, field_to_base64, CommittedRoot};
use thiserror::Error;
use tracing::{debug, info};

use circuit::{BatchPublic, BatchVerifier, CircuitError};

use crate::store::{keys, StateStore};

/// Block number holding the initial root.
pub const GENESIS_BLOCK: u64 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnchorError {
    #[error("anchor not initialised")]
    NotInitialized,
    #[error("anchor already initialised")]
    AlreadyInitialized,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("block {got} out of sequence, expected {expected}")]
    OutOfSequence { expected: u64, got: u64 },
    #[error("block {block_id}: root does not extend its predecessor")]
    RootMismatch { block_id: u64 },
    #[error("no root stored for block {0}")]
    MissingRoot(u64),
    #[error("verifying key rejected: {0}")]
    VerifyingKey(CircuitError),
    #[error("proof rejected: {0}")]
    Proof(CircuitError),
    #[error("corrupt state at {key}: {reason}")]
    CorruptState { key: String, reason: String },
}

pub struct AnchorContract<S, V> {
    store: S,
    verifier: Option<V>,
}

type Writes = Vec<(String, Vec<u8>)>;

impl<S: StateStore, V: BatchVerifier> AnchorContract<S, V> {
    pub fn new(store: S) -> Self { Self { store, verifier: None } }

    pub fn store(&self) -> &S { &self.store }

    pub fn init(&mut self, vk_b64: &str, initial_root_b64: &str) -> Result<(), AnchorError> {
        if self.store.get_state(keys::VERIFYING_KEY).is_some() { return Err(AnchorError::AlreadyInitialized); }
        let vk_bytes = STANDARD
            .decode(vk_b64.trim())
            .map_err(|e| AnchorError::InvalidArgument(format!("verifying key: {e}")))?;
        let verifier = V::from_verifying_key(&vk_bytes).map_err(AnchorError::VerifyingKey)?;
        let root = parse_root("initial root", initial_root_b64)?;

        self.apply(vec![
            (keys::VERIFYING_KEY.to_string(), STANDARD.encode(&vk_bytes).into_bytes()),
            (keys::state_root(GENESIS_BLOCK), field_to_base64(&root).into_bytes()),
            (keys::LATEST_BLOCK.to_string(), GENESIS_BLOCK.to_string().into_bytes()),
        ]);
        self.verifier = Some(verifier);
        info!(root = %field_to_base64(&root), "anchor initialised");
        Ok(())
    }

    pub fn latest_block(&self) -> Result<u64, AnchorError> {
        let raw = self.store.get_state(keys::LATEST_BLOCK).ok_or(AnchorError::NotInitialized)?;
        let text = String::from_utf8(raw).map_err(|e| corrupt(keys::LATEST_BLOCK, e))?;
        text.trim().parse().map_err(|e| corrupt(keys::LATEST_BLOCK, e))
    }

    fn stored_root(&self, block_id: u64) -> Result<Fp, AnchorError> {
        let key = keys::state_root(block_id);
        let raw = self.store.get_state(&key).ok_or(AnchorError::MissingRoot(block_id))?;
        let text = String::from_utf8(raw).map_err(|e| corrupt(&key, e))?;
        field_from_base64(&text).map_err(|e| corrupt(&key, e))
    }

    /// Root of the block `block_id` must extend, if `block_id` is next in line.
    fn predecessor_root(&self, block_id: u64) -> Result<Fp, AnchorError> {
        let latest = self.latest_block()?;
        if block_id != latest + 1 { return Err(AnchorError::OutOfSequence { expected: latest + 1, got: block_id }); }
        self.stored_root(latest)
    }

    pub fn commit_no_change(&mut self, block_id: u64, root_b64: &str) -> Result<(), AnchorError> {
        let root = parse_root("root", root_b64)?;
        if self.predecessor_root(block_id)? != root { return Err(AnchorError::RootMismatch { block_id }); }
        self.apply(commit_writes(block_id, &root, None));
        info!(block_id, "no-change commit accepted");
        Ok(())
    }

    pub fn commit_proof(
        &mut self,
        block_id: u64,
        old_root_b64: &str,
        new_root_b64: &str,
        proof_b64: &str,
    ) -> Result<(), AnchorError> {
        let old_root = parse_root("old root", old_root_b64)?;
        let new_root = parse_root("new root", new_root_b64)?;
        let proof = STANDARD
            .decode(proof_b64.trim())
            .map_err(|e| AnchorError::InvalidArgument(format!("proof: {e}")))?;
        if self.predecessor_root(block_id)? != old_root { return Err(AnchorError::RootMismatch { block_id }); }

        self.load_verifier()?
            .verify(&BatchPublic::new(old_root, new_root), &proof)
            .map_err(AnchorError::Proof)?;

        self.apply(commit_writes(block_id, &new_root, Some(&proof)));
        info!(block_id, new_root = %field_to_base64(&new_root), "proof commit accepted");
        Ok(())
    }

    pub fn query_state_root(&self, block_id: u64) -> Result<String, AnchorError> {
        Ok(field_to_base64(&self.stored_root(block_id)?))
    }

    pub fn query_all_state_roots(&self) -> Result<Vec<CommittedRoot>, AnchorError> {
        (GENESIS_BLOCK..=self.latest_block()?)
            .map(|block_id| Ok(CommittedRoot { block_id, root: self.query_state_root(block_id)? }))
            .collect()
    }

    fn load_verifier(&mut self) -> Result<&V, AnchorError> {
        if self.verifier.is_none() {
            let raw = self.store.get_state(keys::VERIFYING_KEY).ok_or(AnchorError::NotInitialized)?;
            let vk = STANDARD.decode(&raw).map_err(|e| corrupt(keys::VERIFYING_KEY, e))?;
            debug!("loading verifier from stored key");
            self.verifier = Some(V::from_verifying_key(&vk).map_err(AnchorError::VerifyingKey)?);
        }
        self.verifier.as_ref().ok_or(AnchorError::NotInitialized)
    }

    fn apply(&mut self, writes: Writes) {
        for (key, value) in writes { self.store.put_state(&key, value); }
    }
}

fn commit_writes(block_id: u64, root: &Fp, proof: Option<&[u8]>) -> Writes {
    let mut writes = vec![(keys::state_root(block_id), field_to_base64(root).into_bytes())];
    if let Some(proof) = proof {
        writes.push((keys::proof(block_id), STANDARD.encode(proof).into_bytes()));
    }
    writes.push((keys::LATEST_BLOCK.to_string(), block_id.to_string().into_bytes()));
    writes
}

fn parse_root(what: &str, b64: &str) -> Result<Fp, AnchorError> {
    field_from_base64(b64).map_err(|e| AnchorError::InvalidArgument(format!("{what}: {e}")))
}

fn corrupt(key: &str, reason: impl ToString) -> AnchorError {
    AnchorError::CorruptState { key: key.to_string(), reason: reason.to_string() }
}
