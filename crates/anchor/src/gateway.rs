//! In-process anchor ledger: the contract behind the `LedgerGateway` contract.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use primitives::ledger::anchor as ops;
use primitives::{LedgerError, LedgerGateway};

use circuit::BatchVerifier;

use crate::contract::AnchorContract;
use crate::store::StateStore;

/// Calls run on the blocking pool; loading a halo2 verifier regenerates its key.
pub struct LocalAnchor<S, V> {
    contract: Arc<Mutex<AnchorContract<S, V>>>,
}

impl<S, V> Clone for LocalAnchor<S, V> {
    fn clone(&self) -> Self { Self { contract: self.contract.clone() } }
}

impl<S, V> LocalAnchor<S, V>
where
    S: StateStore + 'static,
    V: BatchVerifier + 'static,
{
    pub fn new(contract: AnchorContract<S, V>) -> Self { Self { contract: Arc::new(Mutex::new(contract)) } }

    /// Run `f` against the contract directly, outside the gateway surface.
    pub fn with_contract<R>(&self, f: impl FnOnce(&mut AnchorContract<S, V>) -> R) -> Result<R, LedgerError> {
        let mut guard = self.contract.lock().map_err(|_| LedgerError::Transport("anchor lock poisoned".into()))?;
        Ok(f(&mut guard))
    }

    async fn call(&self, op: &str, args: &[String], read_only: bool) -> Result<Vec<u8>, LedgerError> {
        let contract = self.contract.clone();
        let op_name = op.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = contract.lock().map_err(|_| LedgerError::Transport("anchor lock poisoned".into()))?;
            dispatch(&mut guard, &op_name, &args, read_only)
        })
        .await
        .map_err(|e| LedgerError::Transport(e.to_string()))?
    }
}

fn dispatch<S: StateStore, V: BatchVerifier>(
    contract: &mut AnchorContract<S, V>,
    op: &str,
    args: &[String],
    read_only: bool,
) -> Result<Vec<u8>, LedgerError> {
    let reject = |e: &dyn std::fmt::Display| LedgerError::rejected(op, e);
    let mutating = matches!(op, ops::INIT | ops::COMMIT_NO_CHANGE | ops::COMMIT_PROOF);
    if mutating && read_only {
        return Err(LedgerError::rejected(op, "state-changing operation cannot be evaluated"));
    }
    match op {
        ops::INIT => {
            let [vk, root] = expect_args::<2>(op, args)?;
            contract.init(vk, root).map_err(|e| reject(&e))?;
            Ok(Vec::new())
        }
        ops::COMMIT_NO_CHANGE => {
            let [block, root] = expect_args::<2>(op, args)?;
            contract.commit_no_change(parse_block(op, block)?, root).map_err(|e| reject(&e))?;
            Ok(Vec::new())
        }
        ops::COMMIT_PROOF => {
            let [block, old_root, new_root, proof] = expect_args::<4>(op, args)?;
            contract
                .commit_proof(parse_block(op, block)?, old_root, new_root, proof)
                .map_err(|e| reject(&e))?;
            Ok(Vec::new())
        }
        ops::QUERY_STATE_ROOT => {
            let [block] = expect_args::<1>(op, args)?;
            let root = contract.query_state_root(parse_block(op, block)?).map_err(|e| reject(&e))?;
            Ok(root.into_bytes())
        }
        ops::QUERY_ALL_STATE_ROOTS => {
            let roots = contract.query_all_state_roots().map_err(|e| reject(&e))?;
            serde_json::to_vec(&roots).map_err(|e| reject(&e))
        }
        other => Err(LedgerError::UnknownOperation(other.to_string())),
    }
}

fn expect_args<'a, const N: usize>(op: &str, args: &'a [String]) -> Result<[&'a str; N], LedgerError> {
    if args.len() != N {
        return Err(LedgerError::rejected(op, format!("expected {N} arguments, got {}", args.len())));
    }
    Ok(std::array::from_fn(|i| args[i].as_str()))
}

fn parse_block(op: &str, arg: &str) -> Result<u64, LedgerError> {
    arg.trim().parse().map_err(|_| LedgerError::rejected(op, format!("bad block number {arg:?}")))
}

#[async_trait]
impl<S, V> LedgerGateway for LocalAnchor<S, V>
where
    S: StateStore + 'static,
    V: BatchVerifier + 'static,
{
    async fn evaluate(&self, op: &str, args: &[String]) -> Result<Vec<u8>, LedgerError> {
        self.call(op, args, true).await
    }

    async fn submit(&self, op: &str, args: &[String]) -> Result<Vec<u8>, LedgerError> {
        self.call(op, args, false).await
    }
}
