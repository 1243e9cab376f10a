//! Halo2 circuit for a batch of chained leaf updates.
//!
//! Per slot: `new_balance = old_balance + delta`, the old and new leaves are
//! folded through one shared path, slot `k`'s old root is tied to slot
//! `k-1`'s new root, and the ends of the chain are the two public inputs.

use accum::poseidon::{Spec, RATE, WIDTH};
use ff::Field;
use halo2_gadgets::poseidon::primitives::ConstantLength;
use halo2_gadgets::poseidon::{Hash as PoseidonHash, Pow5Chip, Pow5Config};
use halo2_proofs::{
    circuit::{AssignedCell, Layouter, SimpleFloorPlanner, Value},
    plonk::{Advice, Circuit, Column, ConstraintSystem, Error, Expression, Instance, Selector},
    poly::Rotation,
};
use pasta_curves::Fp;

use crate::witness::{BatchWitness, SlotWitness};

/// Instance rows.
pub const OLD_ROOT_ROW: usize = 0;
pub const NEW_ROOT_ROW: usize = 1;

type Cell = AssignedCell<Fp, Fp>;

#[derive(Clone, Debug)]
pub struct BatchConfig {
    advice: [Column<Advice>; 5],
    instance: Column<Instance>,
    s_balance: Selector,
    s_swap: Selector,
    poseidon: Pow5Config<Fp, WIDTH, RATE>,
}

#[derive(Clone, Copy, Debug)]
struct SlotValues<const DEPTH: usize> {
    old_id: Value<Fp>,
    old_balance: Value<Fp>,
    new_id: Value<Fp>,
    delta: Value<Fp>,
    siblings: [Value<Fp>; DEPTH],
    bits: [Value<Fp>; DEPTH],
}

impl<const DEPTH: usize> SlotValues<DEPTH> {
    fn unknown() -> Self {
        Self {
            old_id: Value::unknown(),
            old_balance: Value::unknown(),
            new_id: Value::unknown(),
            delta: Value::unknown(),
            siblings: [Value::unknown(); DEPTH],
            bits: [Value::unknown(); DEPTH],
        }
    }

    fn known(w: &SlotWitness<DEPTH>) -> Self {
        Self {
            old_id: Value::known(w.old_id),
            old_balance: Value::known(w.old_balance),
            new_id: Value::known(w.new_id),
            delta: Value::known(w.balance_delta),
            siblings: w.siblings.map(Value::known),
            bits: w.path_bits.map(|b| Value::known(if b { Fp::ONE } else { Fp::ZERO })),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BatchTransitionCircuit<const DEPTH: usize, const BATCH: usize> {
    slots: Vec<SlotValues<DEPTH>>,
}

impl<const DEPTH: usize, const BATCH: usize> BatchTransitionCircuit<DEPTH, BATCH> {
    /// Shape-only circuit for key generation.
    pub fn blank() -> Self { Self { slots: vec![SlotValues::unknown(); BATCH] } }

    pub fn from_witness(w: &BatchWitness<DEPTH, BATCH>) -> Self {
        Self { slots: w.slots.iter().map(SlotValues::known).collect() }
    }
}

impl<const DEPTH: usize, const BATCH: usize> Default for BatchTransitionCircuit<DEPTH, BATCH> {
    fn default() -> Self { Self::blank() }
}

impl BatchConfig {
    fn hash(&self, mut layouter: impl Layouter<Fp>, a: Cell, b: Cell) -> Result<Cell, Error> {
        let chip = Pow5Chip::construct(self.poseidon.clone());
        let hasher = PoseidonHash::<Fp, Pow5Chip<Fp, WIDTH, RATE>, Spec, ConstantLength<2>, WIDTH, RATE>::init(
            chip,
            layouter.namespace(|| "init"),
        )?;
        hasher.hash(layouter.namespace(|| "hash"), [a, b])
    }

    fn balance_row<const DEPTH: usize>(
        &self,
        layouter: &mut impl Layouter<Fp>,
        slot: &SlotValues<DEPTH>,
    ) -> Result<[Cell; 4], Error> {
        let [a0, a1, a2, a3, a4] = self.advice;
        layouter.assign_region(
            || "balance update",
            |mut region| {
                self.s_balance.enable(&mut region, 0)?;
                let old_balance = region.assign_advice(|| "old balance", a0, 0, || slot.old_balance)?;
                region.assign_advice(|| "delta", a1, 0, || slot.delta)?;
                let new_balance = region.assign_advice(|| "new balance", a2, 0, || slot.old_balance + slot.delta)?;
                let old_id = region.assign_advice(|| "old id", a3, 0, || slot.old_id)?;
                let new_id = region.assign_advice(|| "new id", a4, 0, || slot.new_id)?;
                Ok([old_id, old_balance, new_id, new_balance])
            },
        )
    }

    /// Order `(old, new)` children for one level. Row 0 carries the old path,
    /// row 1 the new path; sibling and bit are copied so both folds share them.
    fn swap_rows(
        &self,
        layouter: &mut impl Layouter<Fp>,
        old_cur: &Cell,
        new_cur: &Cell,
        sibling: Value<Fp>,
        bit: Value<Fp>,
    ) -> Result<((Cell, Cell), (Cell, Cell)), Error> {
        let [a0, a1, a2, a3, a4] = self.advice;
        layouter.assign_region(
            || "conditional swap",
            |mut region| {
                let mut row = |offset: usize, cur: &Cell, sib: Value<Fp>, b: Value<Fp>| -> Result<_, Error> {
                    self.s_swap.enable(&mut region, offset)?;
                    cur.copy_advice(|| "cur", &mut region, a0, offset)?;
                    let sib_cell = region.assign_advice(|| "sibling", a1, offset, || sib)?;
                    let bit_cell = region.assign_advice(|| "bit", a2, offset, || b)?;
                    let c = cur.value().copied();
                    let left = region.assign_advice(|| "left", a3, offset, || {
                        b.zip(c).zip(sib).map(|((b, c), s)| b * c + (Fp::ONE - b) * s)
                    })?;
                    let right = region.assign_advice(|| "right", a4, offset, || {
                        b.zip(c).zip(sib).map(|((b, c), s)| b * s + (Fp::ONE - b) * c)
                    })?;
                    Ok((left, right, sib_cell, bit_cell))
                };
                let (old_l, old_r, sib0, bit0) = row(0, old_cur, sibling, bit)?;
                let (new_l, new_r, sib1, bit1) = row(1, new_cur, sibling, bit)?;
                region.constrain_equal(sib0.cell(), sib1.cell())?;
                region.constrain_equal(bit0.cell(), bit1.cell())?;
                Ok(((old_l, old_r), (new_l, new_r)))
            },
        )
    }
}

impl<const DEPTH: usize, const BATCH: usize> Circuit<Fp> for BatchTransitionCircuit<DEPTH, BATCH> {
    type Config = BatchConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self { Self::blank() }

    fn configure(meta: &mut ConstraintSystem<Fp>) -> Self::Config {
        let advice = [
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
            meta.advice_column(),
        ];
        for a in &advice { meta.enable_equality(*a); }
        let instance = meta.instance_column();
        meta.enable_equality(instance);

        let rc_a = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        let rc_b = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        meta.enable_constant(rc_b[0]);
        let poseidon = Pow5Chip::<Fp, WIDTH, RATE>::configure::<Spec>(
            meta,
            [advice[0], advice[1], advice[2]],
            advice[3],
            rc_a,
            rc_b,
        );

        let s_balance = meta.selector();
        let s_swap = meta.selector();

        meta.create_gate("balance update", |meta| {
            let s = meta.query_selector(s_balance);
            let old = meta.query_advice(advice[0], Rotation::cur());
            let delta = meta.query_advice(advice[1], Rotation::cur());
            let new = meta.query_advice(advice[2], Rotation::cur());
            vec![s * (old + delta - new)]
        });

        // bit = 1: current node is the left child.
        meta.create_gate("conditional swap", |meta| {
            let s = meta.query_selector(s_swap);
            let cur = meta.query_advice(advice[0], Rotation::cur());
            let sib = meta.query_advice(advice[1], Rotation::cur());
            let bit = meta.query_advice(advice[2], Rotation::cur());
            let left = meta.query_advice(advice[3], Rotation::cur());
            let right = meta.query_advice(advice[4], Rotation::cur());
            let one = Expression::Constant(Fp::ONE);
            vec![
                s.clone() * bit.clone() * (one.clone() - bit.clone()),
                s.clone() * (left - (bit.clone() * cur.clone() + (one.clone() - bit.clone()) * sib.clone())),
                s * (right - (bit.clone() * sib + (one - bit) * cur)),
            ]
        });

        BatchConfig { advice, instance, s_balance, s_swap, poseidon }
    }

    fn synthesize(&self, config: Self::Config, mut layouter: impl Layouter<Fp>) -> Result<(), Error> {
        let mut prev_new_root: Option<Cell> = None;

        for (k, slot) in self.slots.iter().enumerate() {
            let [old_id, old_balance, new_id, new_balance] = config.balance_row(&mut layouter, slot)?;
            let mut old_cur = config.hash(layouter.namespace(|| format!("slot {k} old leaf")), old_id, old_balance)?;
            let mut new_cur = config.hash(layouter.namespace(|| format!("slot {k} new leaf")), new_id, new_balance)?;

            for level in 0..DEPTH {
                let ((ol, or), (nl, nr)) =
                    config.swap_rows(&mut layouter, &old_cur, &new_cur, slot.siblings[level], slot.bits[level])?;
                old_cur = config.hash(layouter.namespace(|| format!("slot {k} old level {level}")), ol, or)?;
                new_cur = config.hash(layouter.namespace(|| format!("slot {k} new level {level}")), nl, nr)?;
            }

            match &prev_new_root {
                None => layouter.constrain_instance(old_cur.cell(), config.instance, OLD_ROOT_ROW)?,
                Some(prev) => layouter.assign_region(
                    || format!("chain slot {k}"),
                    |mut region| region.constrain_equal(prev.cell(), old_cur.cell()),
                )?,
            }
            prev_new_root = Some(new_cur);
        }

        if let Some(last) = prev_new_root {
            layouter.constrain_instance(last.cell(), config.instance, NEW_ROOT_ROW)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::min_k;
    use crate::witness::{assemble_batch, PendingUpdate};
    use accum::AccountTable;
    use halo2_proofs::dev::MockProver;
    use primitives::Player;

    fn table() -> AccountTable {
        let players = [(1, 100), (2, 200)].map(|(id, balance)| Player { id, balance, usd_balance: 0 });
        AccountTable::bootstrap(2, &players).unwrap()
    }

    #[test]
    fn deposit_batch_satisfies_circuit() {
        let mut t = table();
        let start = t.root();
        let u = PendingUpdate::from_transition(&t.apply_delta(2, 50).unwrap()).unwrap();
        let w = assemble_batch::<2, 2>(start, &[u], &t).unwrap();
        let circuit = BatchTransitionCircuit::<2, 2>::from_witness(&w);
        let prover = MockProver::run(min_k(2, 2), &circuit, vec![w.public.to_instances()]).unwrap();
        assert_eq!(prover.verify(), Ok(()));
    }

    #[test]
    fn wrong_public_root_fails() {
        let mut t = table();
        let start = t.root();
        let u = PendingUpdate::from_transition(&t.apply_delta(1, 5).unwrap()).unwrap();
        let w = assemble_batch::<2, 1>(start, &[u], &t).unwrap();
        let circuit = BatchTransitionCircuit::<2, 1>::from_witness(&w);
        let bad = vec![vec![start, start]];
        let prover = MockProver::run(min_k(2, 1), &circuit, bad).unwrap();
        assert!(prover.verify().is_err());
    }

    #[test]
    fn tampered_delta_fails() {
        let mut t = table();
        let start = t.root();
        let u = PendingUpdate::from_transition(&t.apply_delta(1, 5).unwrap()).unwrap();
        let mut w = assemble_batch::<2, 1>(start, &[u], &t).unwrap();
        w.slots[0].balance_delta += Fp::ONE;
        let circuit = BatchTransitionCircuit::<2, 1>::from_witness(&w);
        let prover = MockProver::run(min_k(2, 1), &circuit, vec![w.public.to_instances()]).unwrap();
        assert!(prover.verify().is_err());
    }
}
