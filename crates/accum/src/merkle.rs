//! Fixed-capacity binary Merkle tree over account states.
//!
//! Leaves are `hash2(id, balance)`, interior nodes `hash2(left, right)`.
//! A proof lists siblings leaf-to-root; `path_bits[i] == true` means the
//! running node is the left child at level `i`.

use pasta_curves::Fp;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::poseidon::hash2;
use crate::table::AccountState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("tree needs a non-empty power-of-two leaf count, got {0}")]
    BadLeafCount(usize),
    #[error("leaf index {index} out of range for {len} leaves")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("no leaf matches the target hash")]
    LeafNotFound,
    #[error("{0} leaves share the target hash")]
    AmbiguousLeaf(usize),
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct MerkleProof {
    pub path_bits: Vec<bool>,
    #[serde(with = "field_vec")]
    pub siblings: Vec<Fp>,
}

impl MerkleProof {
    pub fn depth(&self) -> usize { self.siblings.len() }

    /// Leaf position encoded by the path bits.
    pub fn leaf_index(&self) -> usize {
        self.path_bits
            .iter()
            .enumerate()
            .fold(0, |acc, (level, is_left)| if *is_left { acc } else { acc | (1 << level) })
    }
}

pub fn hash_leaf(state: &AccountState) -> Fp {
    hash2(state.id.to_field(), Fp::from(state.balance))
}

pub fn leaf_hashes(slots: &[AccountState]) -> Vec<Fp> {
    slots.par_iter().map(hash_leaf).collect()
}

/// Every level of the tree, leaves first, root last.
pub fn tree_levels(leaves: Vec<Fp>) -> Result<Vec<Vec<Fp>>, MerkleError> {
    if leaves.is_empty() || !leaves.len().is_power_of_two() {
        return Err(MerkleError::BadLeafCount(leaves.len()));
    }
    let mut levels = vec![leaves];
    while levels[levels.len() - 1].len() > 1 {
        let next = levels[levels.len() - 1]
            .par_chunks(2)
            .map(|pair| hash2(pair[0], pair[1]))
            .collect();
        levels.push(next);
    }
    Ok(levels)
}

pub fn build_root(slots: &[AccountState]) -> Result<Fp, MerkleError> {
    let levels = tree_levels(leaf_hashes(slots))?;
    Ok(levels[levels.len() - 1][0])
}

/// Read the authentication path for `index` out of precomputed levels.
pub fn proof_from_levels(levels: &[Vec<Fp>], index: usize) -> Result<MerkleProof, MerkleError> {
    let len = levels.first().map_or(0, Vec::len);
    if index >= len { return Err(MerkleError::IndexOutOfRange { index, len }); }
    let depth = levels.len() - 1;
    let mut proof = MerkleProof { path_bits: Vec::with_capacity(depth), siblings: Vec::with_capacity(depth) };
    let mut pos = index;
    for level in &levels[..depth] {
        proof.path_bits.push(pos % 2 == 0);
        proof.siblings.push(level[pos ^ 1]);
        pos /= 2;
    }
    Ok(proof)
}

pub fn generate_proof_at(slots: &[AccountState], index: usize) -> Result<MerkleProof, MerkleError> {
    proof_from_levels(&tree_levels(leaf_hashes(slots))?, index)
}

/// Locate the leaf by hash value and return its path. Refuses to guess when
/// several leaves share the hash.
pub fn generate_proof(slots: &[AccountState], target: Fp) -> Result<MerkleProof, MerkleError> {
    let leaves = leaf_hashes(slots);
    let matches: Vec<usize> = leaves
        .iter()
        .enumerate()
        .filter(|(_, h)| **h == target)
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [] => Err(MerkleError::LeafNotFound),
        [index] => proof_from_levels(&tree_levels(leaves)?, *index),
        many => Err(MerkleError::AmbiguousLeaf(many.len())),
    }
}

/// Fold a leaf hash up the proof path.
pub fn fold(leaf_hash: Fp, proof: &MerkleProof) -> Fp {
    proof
        .siblings
        .iter()
        .zip(&proof.path_bits)
        .fold(leaf_hash, |cur, (sib, is_left)| if *is_left { hash2(cur, *sib) } else { hash2(*sib, cur) })
}

pub fn verify_proof(root: Fp, leaf_hash: Fp, proof: &MerkleProof) -> bool {
    proof.path_bits.len() == proof.siblings.len() && fold(leaf_hash, proof) == root
}

/// Root after replacing the proven leaf with `new_state`. `proof` must have
/// been taken against the table immediately before the replacement.
pub fn update_root(proof: &MerkleProof, new_state: &AccountState) -> Fp {
    fold(hash_leaf(new_state), proof)
}

mod field_vec {
    use pasta_curves::Fp;
    use primitives::{field_from_base64, field_to_base64};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[Fp], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(v.iter().map(field_to_base64))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Fp>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|s| field_from_base64(s).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{AccountId, AccountState};

    fn table(states: &[(u64, u64)]) -> Vec<AccountState> {
        states.iter().map(|(id, bal)| AccountState::new(AccountId::real(*id), *bal)).collect()
    }

    fn mixed_table() -> Vec<AccountState> {
        let mut t = table(&[(1, 100), (2, 200), (3, 0), (9, 7), (11, 1), (12, 0)]);
        t.push(AccountState::dummy(6));
        t.push(AccountState::dummy(7));
        t
    }

    #[test]
    fn every_leaf_round_trips() {
        let t = mixed_table();
        let root = build_root(&t).unwrap();
        for (i, s) in t.iter().enumerate() {
            let proof = generate_proof(&t, hash_leaf(s)).unwrap();
            assert_eq!(proof.leaf_index(), i);
            assert_eq!(proof, generate_proof_at(&t, i).unwrap());
            assert!(verify_proof(root, hash_leaf(s), &proof));
        }
    }

    #[test]
    fn update_matches_rebuild() {
        let t = mixed_table();
        for i in 0..t.len() {
            let proof = generate_proof_at(&t, i).unwrap();
            let new_state = AccountState::new(AccountId::real(1000 + i as u64), 55 * i as u64);
            let mut updated = t.clone();
            updated[i] = new_state;
            assert_eq!(update_root(&proof, &new_state), build_root(&updated).unwrap());
        }
    }

    #[test]
    fn deposit_scenario_proof_serves_both_roots() {
        let mut t = table(&[(1, 100), (2, 200)]);
        t.push(AccountState::dummy(2));
        t.push(AccountState::dummy(3));
        let old_root = build_root(&t).unwrap();
        let proof = generate_proof(&t, hash_leaf(&t[1])).unwrap();

        let after = AccountState::new(AccountId::real(2), 250);
        let new_root = update_root(&proof, &after);
        assert_ne!(new_root, old_root);
        assert!(verify_proof(old_root, hash_leaf(&t[1]), &proof));
        assert!(verify_proof(new_root, hash_leaf(&after), &proof));
    }

    #[test]
    fn wrong_leaf_or_root_fails() {
        let t = mixed_table();
        let root = build_root(&t).unwrap();
        let proof = generate_proof_at(&t, 3).unwrap();
        assert!(!verify_proof(root, hash_leaf(&t[4]), &proof));
        assert!(!verify_proof(root + Fp::from(1u64), hash_leaf(&t[3]), &proof));
    }

    #[test]
    fn lookup_by_hash_refuses_missing_and_duplicate_leaves() {
        let t = table(&[(1, 5), (1, 5), (2, 0), (3, 0)]);
        assert_eq!(generate_proof(&t, hash_leaf(&t[0])), Err(MerkleError::AmbiguousLeaf(2)));
        let absent = hash_leaf(&AccountState::new(AccountId::real(99), 1));
        assert_eq!(generate_proof(&t, absent), Err(MerkleError::LeafNotFound));
        assert!(generate_proof_at(&t, 1).is_ok());
    }

    #[test]
    fn rejects_bad_shapes() {
        assert_eq!(build_root(&[]), Err(MerkleError::BadLeafCount(0)));
        assert_eq!(build_root(&table(&[(1, 1), (2, 2), (3, 3)])), Err(MerkleError::BadLeafCount(3)));
        assert_eq!(
            generate_proof_at(&table(&[(1, 1), (2, 2)]), 2),
            Err(MerkleError::IndexOutOfRange { index: 2, len: 2 })
        );
    }

    #[test]
    fn proof_serializes_as_base64_siblings() {
        let t = mixed_table();
        let proof = generate_proof_at(&t, 5).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        let back: MerkleProof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
    }
}
