//! Per-update witnesses and fixed-size batch assembly with no-op padding.

use ff::Field;
use pasta_curves::Fp;

use accum::merkle::{fold, hash_leaf};
use accum::{AccountId, AccountState, AccountTable, MerkleProof, Transition};
use primitives::field_from_i64;

use crate::{BatchPublic, CircuitError};

/// Pre-image of one table mutation, captured before it was applied.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PendingUpdate {
    pub index: usize,
    pub old: AccountState,
    pub new_id: AccountId,
    pub balance_delta: i64,
    pub proof: MerkleProof,
}

impl PendingUpdate {
    pub fn from_transition(t: &Transition) -> Result<Self, CircuitError> {
        let delta = i128::from(t.new.balance) - i128::from(t.old.balance);
        let balance_delta = i64::try_from(delta).map_err(|_| CircuitError::DeltaOutOfRange)?;
        Ok(Self { index: t.index, old: t.old, new_id: t.new.id, balance_delta, proof: t.proof.clone() })
    }

    pub fn old_root(&self) -> Fp { fold(hash_leaf(&self.old), &self.proof) }
}

/// Slot content of a batch: a real update or identity padding on a leaf.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum UpdateKind {
    Real(PendingUpdate),
    NoOp(usize),
}

/// Field-level witness of one circuit slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SlotWitness<const DEPTH: usize> {
    pub old_id: Fp,
    pub old_balance: Fp,
    pub new_id: Fp,
    pub balance_delta: Fp,
    pub siblings: [Fp; DEPTH],
    pub path_bits: [bool; DEPTH],
}

impl<const DEPTH: usize> SlotWitness<DEPTH> {
    fn with_path(old: &AccountState, new_id: AccountId, delta: Fp, proof: &MerkleProof) -> Result<Self, CircuitError> {
        if proof.siblings.len() != DEPTH || proof.path_bits.len() != DEPTH {
            return Err(CircuitError::DepthMismatch { expected: DEPTH, got: proof.siblings.len() });
        }
        let mut siblings = [Fp::ZERO; DEPTH];
        let mut path_bits = [false; DEPTH];
        siblings.copy_from_slice(&proof.siblings);
        path_bits.copy_from_slice(&proof.path_bits);
        Ok(Self {
            old_id: old.id.to_field(),
            old_balance: Fp::from(old.balance),
            new_id: new_id.to_field(),
            balance_delta: delta,
            siblings,
            path_bits,
        })
    }

    pub fn from_update(u: &PendingUpdate) -> Result<Self, CircuitError> {
        Self::with_path(&u.old, u.new_id, field_from_i64(u.balance_delta), &u.proof)
    }

    pub fn no_op(state: &AccountState, proof: &MerkleProof) -> Result<Self, CircuitError> {
        Self::with_path(state, state.id, Fp::ZERO, proof)
    }

    pub fn new_balance(&self) -> Fp { self.old_balance + self.balance_delta }

    fn fold(&self, leaf: Fp) -> Fp {
        self.siblings
            .iter()
            .zip(self.path_bits.iter())
            .fold(leaf, |cur, (sib, is_left)| {
                if *is_left { accum::poseidon::hash2(cur, *sib) } else { accum::poseidon::hash2(*sib, cur) }
            })
    }

    pub fn old_root(&self) -> Fp { self.fold(accum::poseidon::hash2(self.old_id, self.old_balance)) }
    pub fn new_root(&self) -> Fp { self.fold(accum::poseidon::hash2(self.new_id, self.new_balance())) }
}

/// Exactly `BATCH` slots chaining `public.old_root` to `public.new_root`.
#[derive(Clone, Debug)]
pub struct BatchWitness<const DEPTH: usize, const BATCH: usize> {
    pub public: BatchPublic,
    pub kinds: Vec<UpdateKind>,
    pub slots: Vec<SlotWitness<DEPTH>>,
}

impl<const DEPTH: usize, const BATCH: usize> BatchWitness<DEPTH, BATCH> {
    pub fn real_count(&self) -> usize {
        self.kinds.iter().filter(|k| matches!(k, UpdateKind::Real(_))).count()
    }
}

/// Build the witness for `updates`, applied in order from `old_root`, and pad
/// with no-op slots on leaf 0 of `table`, which must already reflect every
/// update. The chain is re-checked off-circuit before anything is proved.
pub fn assemble_batch<const DEPTH: usize, const BATCH: usize>(
    old_root: Fp,
    updates: &[PendingUpdate],
    table: &AccountTable,
) -> Result<BatchWitness<DEPTH, BATCH>, CircuitError> {
    if updates.len() > BATCH {
        return Err(CircuitError::BatchOverflow { count: updates.len(), capacity: BATCH });
    }
    if table.depth() != DEPTH {
        return Err(CircuitError::DepthMismatch { expected: DEPTH, got: table.depth() });
    }

    let mut kinds = Vec::with_capacity(BATCH);
    let mut slots = Vec::with_capacity(BATCH);
    let mut running = old_root;
    for (k, u) in updates.iter().enumerate() {
        let slot = SlotWitness::<DEPTH>::from_update(u)?;
        if slot.old_root() != running { return Err(CircuitError::StaleWitness { slot: k }); }
        running = slot.new_root();
        kinds.push(UpdateKind::Real(u.clone()));
        slots.push(slot);
    }
    if running != table.root() { return Err(CircuitError::RootMismatch); }

    if slots.len() < BATCH {
        let pad_state = *table.get(0).ok_or(CircuitError::RootMismatch)?;
        let pad = SlotWitness::<DEPTH>::no_op(&pad_state, &table.proof_at(0)?)?;
        while slots.len() < BATCH {
            kinds.push(UpdateKind::NoOp(0));
            slots.push(pad);
        }
    }

    Ok(BatchWitness { public: BatchPublic::new(old_root, running), kinds, slots })
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitives::Player;

    fn table() -> AccountTable {
        let players = [(1, 100), (2, 200)].map(|(id, balance)| Player { id, balance, usd_balance: 0 });
        AccountTable::bootstrap(2, &players).unwrap()
    }

    #[test]
    fn chain_matches_repeated_updates() {
        let mut t = table();
        let start = t.root();
        let updates = vec![
            PendingUpdate::from_transition(&t.apply_delta(2, 50).unwrap()).unwrap(),
            PendingUpdate::from_transition(&t.create_account(9).unwrap()).unwrap(),
            PendingUpdate::from_transition(&t.apply_delta(1, -100).unwrap()).unwrap(),
        ];
        let w = assemble_batch::<2, 4>(start, &updates, &t).unwrap();
        assert_eq!(w.public, BatchPublic::new(start, t.root()));
        assert_eq!(w.real_count(), 3);
        assert_eq!(w.kinds[3], UpdateKind::NoOp(0));
        for pair in w.slots.windows(2) {
            assert_eq!(pair[0].new_root(), pair[1].old_root());
        }
    }

    #[test]
    fn no_op_slot_is_neutral() {
        let t = table();
        let pad = SlotWitness::<2>::no_op(&t.slots()[3], &t.proof_at(3).unwrap()).unwrap();
        assert_eq!(pad.old_root(), t.root());
        assert_eq!(pad.new_root(), t.root());
    }

    #[test]
    fn overflow_and_stale_witnesses_rejected() {
        let mut t = table();
        let start = t.root();
        let a = PendingUpdate::from_transition(&t.apply_delta(1, 1).unwrap()).unwrap();
        let b = PendingUpdate::from_transition(&t.apply_delta(2, 1).unwrap()).unwrap();
        assert_eq!(
            assemble_batch::<2, 1>(start, &[a.clone(), b.clone()], &t).unwrap_err(),
            CircuitError::BatchOverflow { count: 2, capacity: 1 }
        );
        assert_eq!(
            assemble_batch::<2, 2>(start, &[b, a], &t).unwrap_err(),
            CircuitError::StaleWitness { slot: 0 }
        );
    }

    #[test]
    fn depth_must_match_shape() {
        let t = table();
        assert_eq!(
            assemble_batch::<3, 2>(t.root(), &[], &t).unwrap_err(),
            CircuitError::DepthMismatch { expected: 3, got: 2 }
        );
    }

    #[test]
    fn negative_delta_embeds_as_field_negation() {
        let mut t = table();
        let u = PendingUpdate::from_transition(&t.apply_delta(2, -75).unwrap()).unwrap();
        assert_eq!(u.balance_delta, -75);
        let slot = SlotWitness::<2>::from_update(&u).unwrap();
        assert_eq!(slot.new_balance(), Fp::from(125u64));
        assert_eq!(slot.new_root(), t.root());
    }
}
