//! Fixed-size account table with dummy padding and an allocation cursor.

use std::fmt;

use ff::PrimeField;
use pasta_curves::Fp;
use primitives::Player;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::merkle::{self, hash_leaf, MerkleError, MerkleProof};
use crate::poseidon::hash2;

/// 128-bit account identifier. Real ledger ids occupy the low 64 bits;
/// dummy slot `i` is `2^64 + i`, disjoint from every real id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub struct AccountId(pub u128);

impl AccountId {
    pub const DUMMY_BASE: u128 = 1 << 64;

    pub fn real(id: u64) -> Self { Self(id as u128) }
    pub fn dummy(slot: usize) -> Self { Self(Self::DUMMY_BASE + slot as u128) }
    pub fn is_dummy(&self) -> bool { self.0 >= Self::DUMMY_BASE }
    pub fn as_real(&self) -> Option<u64> { u64::try_from(self.0).ok() }
    pub fn to_field(&self) -> Fp { Fp::from_u128(self.0) }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_real() {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "dummy#{}", self.0 - Self::DUMMY_BASE),
        }
    }
}

/// One leaf: account id and fixed-point balance.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct AccountState {
    pub id: AccountId,
    pub balance: u64,
}

impl AccountState {
    pub fn new(id: AccountId, balance: u64) -> Self { Self { id, balance } }
    pub fn dummy(slot: usize) -> Self { Self { id: AccountId::dummy(slot), balance: 0 } }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("{count} accounts exceed table capacity {capacity}")]
    TooManyAccounts { count: usize, capacity: usize },
    #[error("no free slot for account {0}")]
    CapacityExhausted(u64),
    #[error("account {0} already exists")]
    DuplicateAccount(u64),
    #[error("unknown account {0}")]
    UnknownAccount(u64),
    #[error("account {id}: balance {balance} cannot absorb {delta}")]
    InsufficientBalance { id: u64, balance: u64, delta: i64 },
    #[error("account {id}: balance overflow")]
    BalanceOverflow { id: u64 },
    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

/// A single applied slot change with the proof captured before it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transition {
    pub index: usize,
    pub old: AccountState,
    pub new: AccountState,
    pub proof: MerkleProof,
    pub new_root: Fp,
}

/// `2^depth` slots. `[0, dummy_cursor)` are real accounts, the rest are
/// dummies. Every level of the tree is cached so proofs and updates are O(depth).
#[derive(Clone, Debug)]
pub struct AccountTable {
    depth: usize,
    slots: Vec<AccountState>,
    dummy_cursor: usize,
    levels: Vec<Vec<Fp>>,
}

impl AccountTable {
    pub fn bootstrap(depth: usize, players: &[Player]) -> Result<Self, TableError> {
        let capacity = 1usize << depth;
        if players.len() > capacity {
            return Err(TableError::TooManyAccounts { count: players.len(), capacity });
        }
        let mut slots = Vec::with_capacity(capacity);
        for p in players {
            if slots.iter().any(|s: &AccountState| s.id == AccountId::real(p.id)) {
                return Err(TableError::DuplicateAccount(p.id));
            }
            slots.push(AccountState::new(AccountId::real(p.id), p.balance));
        }
        let dummy_cursor = slots.len();
        slots.extend((dummy_cursor..capacity).map(AccountState::dummy));
        let levels = merkle::tree_levels(merkle::leaf_hashes(&slots))?;
        Ok(Self { depth, slots, dummy_cursor, levels })
    }

    pub fn depth(&self) -> usize { self.depth }
    pub fn capacity(&self) -> usize { self.slots.len() }
    pub fn dummy_cursor(&self) -> usize { self.dummy_cursor }
    pub fn slots(&self) -> &[AccountState] { &self.slots }
    pub fn get(&self, index: usize) -> Option<&AccountState> { self.slots.get(index) }
    pub fn root(&self) -> Fp { self.levels[self.depth][0] }

    /// Index of a real account, scanning allocated slots only.
    pub fn position_of(&self, id: u64) -> Option<usize> {
        self.slots[..self.dummy_cursor].iter().position(|s| s.id == AccountId::real(id))
    }

    pub fn proof_at(&self, index: usize) -> Result<MerkleProof, TableError> {
        Ok(merkle::proof_from_levels(&self.levels, index)?)
    }

    /// Replace slot `index`, returning the pre-mutation proof and the new root.
    pub fn transition(&mut self, index: usize, new_state: AccountState) -> Result<Transition, TableError> {
        let proof = self.proof_at(index)?;
        let old = self.slots[index];
        let new_root = merkle::update_root(&proof, &new_state);

        self.slots[index] = new_state;
        let mut node = hash_leaf(&new_state);
        let mut pos = index;
        for level in 0..self.depth {
            self.levels[level][pos] = node;
            let sib = proof.siblings[level];
            node = if proof.path_bits[level] { hash2(node, sib) } else { hash2(sib, node) };
            pos /= 2;
        }
        self.levels[self.depth][0] = node;
        debug_assert_eq!(node, new_root);

        Ok(Transition { index, old, new: new_state, proof, new_root })
    }

    /// Move the next dummy slot to a real account with zero balance.
    pub fn create_account(&mut self, id: u64) -> Result<Transition, TableError> {
        if self.position_of(id).is_some() { return Err(TableError::DuplicateAccount(id)); }
        if self.dummy_cursor == self.capacity() { return Err(TableError::CapacityExhausted(id)); }
        let index = self.dummy_cursor;
        let t = self.transition(index, AccountState::new(AccountId::real(id), 0))?;
        self.dummy_cursor += 1;
        Ok(t)
    }

    pub fn apply_delta(&mut self, id: u64, delta: i64) -> Result<Transition, TableError> {
        let index = self.position_of(id).ok_or(TableError::UnknownAccount(id))?;
        let old = self.slots[index];
        let balance = if delta >= 0 {
            old.balance.checked_add(delta as u64).ok_or(TableError::BalanceOverflow { id })?
        } else {
            old.balance
                .checked_sub(delta.unsigned_abs())
                .ok_or(TableError::InsufficientBalance { id, balance: old.balance, delta })?
        };
        self.transition(index, AccountState { balance, ..old })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::{build_root, verify_proof};

    fn players(list: &[(u64, u64)]) -> Vec<Player> {
        list.iter().map(|(id, balance)| Player { id: *id, balance: *balance, usd_balance: 0 }).collect()
    }

    #[test]
    fn bootstrap_pads_with_distinct_dummies() {
        let t = AccountTable::bootstrap(2, &players(&[(1, 100), (2, 200)])).unwrap();
        assert_eq!(t.capacity(), 4);
        assert_eq!(t.dummy_cursor(), 2);
        assert!(t.slots()[2].id.is_dummy() && t.slots()[3].id.is_dummy());
        assert!(t.slots()[2].id < t.slots()[3].id);
        assert_eq!(t.root(), build_root(t.slots()).unwrap());
    }

    #[test]
    fn bootstrap_rejects_overflow_and_duplicates() {
        assert_eq!(
            AccountTable::bootstrap(1, &players(&[(1, 0), (2, 0), (3, 0)])).unwrap_err(),
            TableError::TooManyAccounts { count: 3, capacity: 2 }
        );
        assert_eq!(
            AccountTable::bootstrap(2, &players(&[(1, 0), (1, 5)])).unwrap_err(),
            TableError::DuplicateAccount(1)
        );
    }

    #[test]
    fn delta_keeps_cached_root_in_sync() {
        let mut t = AccountTable::bootstrap(2, &players(&[(1, 100), (2, 200)])).unwrap();
        let old_root = t.root();
        let tr = t.apply_delta(2, 50).unwrap();
        assert_eq!(tr.index, 1);
        assert_eq!(tr.new.balance, 250);
        assert_eq!(tr.new_root, t.root());
        assert_eq!(t.root(), build_root(t.slots()).unwrap());
        assert!(verify_proof(old_root, hash_leaf(&tr.old), &tr.proof));
        assert!(verify_proof(t.root(), hash_leaf(&tr.new), &tr.proof));
    }

    #[test]
    fn create_consumes_dummies_in_order() {
        let mut t = AccountTable::bootstrap(2, &players(&[(1, 100)])).unwrap();
        let a = t.create_account(7).unwrap();
        let b = t.create_account(8).unwrap();
        assert_eq!((a.index, b.index), (1, 2));
        assert!(a.old.id.is_dummy());
        assert_eq!(t.position_of(8), Some(2));
        assert_eq!(t.dummy_cursor(), 3);
        assert_eq!(t.root(), build_root(t.slots()).unwrap());
        assert_eq!(t.create_account(7).unwrap_err(), TableError::DuplicateAccount(7));
    }

    #[test]
    fn full_table_drops_creation_without_change() {
        let mut t = AccountTable::bootstrap(1, &players(&[(1, 1), (2, 2)])).unwrap();
        let root = t.root();
        assert_eq!(t.create_account(3).unwrap_err(), TableError::CapacityExhausted(3));
        assert_eq!(t.root(), root);
        assert_eq!(t.dummy_cursor(), 2);
    }

    #[test]
    fn bad_deltas_leave_table_untouched() {
        let mut t = AccountTable::bootstrap(2, &players(&[(1, 10), (2, u64::MAX)])).unwrap();
        let root = t.root();
        assert!(matches!(t.apply_delta(1, -11), Err(TableError::InsufficientBalance { .. })));
        assert_eq!(t.apply_delta(2, 1).unwrap_err(), TableError::BalanceOverflow { id: 2 });
        assert_eq!(t.apply_delta(5, 1).unwrap_err(), TableError::UnknownAccount(5));
        assert_eq!(t.root(), root);
        assert_eq!(t.apply_delta(1, -10).unwrap().new.balance, 0);
    }

    #[test]
    fn dummy_ids_never_match_real_lookups() {
        let t = AccountTable::bootstrap(2, &[]).unwrap();
        assert_eq!(t.position_of(0), None);
        assert_eq!(AccountId::dummy(3).to_string(), "dummy#3");
        assert_eq!(AccountId::real(3).to_string(), "3");
    }
}
