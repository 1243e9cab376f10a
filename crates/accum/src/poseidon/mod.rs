//! Poseidon two-to-one hash over the Pallas base field.
//!
//! The same permutation (`P128Pow5T3`, width 3, rate 2) backs the in-circuit
//! `Pow5Chip` gadget, so off-circuit and in-circuit digests agree.

use halo2_gadgets::poseidon::primitives::{self as poseidon, ConstantLength, P128Pow5T3};
use pasta_curves::Fp;

pub const WIDTH: usize = 3;
pub const RATE: usize = 2;

/// Permutation spec shared with the circuit.
pub type Spec = P128Pow5T3;

/// Hash an ordered pair of field elements.
pub fn hash2(a: Fp, b: Fp) -> Fp {
    poseidon::Hash::<Fp, Spec, ConstantLength<2>, WIDTH, RATE>::init().hash([a, b])
}
