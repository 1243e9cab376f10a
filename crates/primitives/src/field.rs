//! Field-element wire encoding: fixed-width big-endian bytes and base64.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ff::PrimeField;
use pasta_curves::Fp;
use thiserror::Error;

/// Native value type of the state engine (Pallas base field, Vesta scalar field).
pub type FieldElement = Fp;

/// Width of a big-endian field encoding.
pub const FIELD_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldEncodingError {
    #[error("field encoding is {0} bytes, at most {FIELD_LEN} allowed")]
    TooLong(usize),
    #[error("value is not a canonical field element")]
    NonCanonical,
    #[error("invalid base64: {0}")]
    Base64(String),
}

/// Big-endian 32-byte encoding. `Fp::to_repr` is little-endian.
pub fn field_to_be_bytes(f: &FieldElement) -> [u8; FIELD_LEN] {
    let mut out = f.to_repr();
    out.reverse();
    out
}

/// Parse a big-endian integer of at most 32 bytes. Shorter inputs are
/// left-padded; values at or above the modulus are rejected.
pub fn field_from_be_bytes(bytes: &[u8]) -> Result<FieldElement, FieldEncodingError> {
    if bytes.len() > FIELD_LEN { return Err(FieldEncodingError::TooLong(bytes.len())); }
    let mut repr = [0u8; FIELD_LEN];
    repr[FIELD_LEN - bytes.len()..].copy_from_slice(bytes);
    repr.reverse();
    Option::from(Fp::from_repr(repr)).ok_or(FieldEncodingError::NonCanonical)
}

pub fn field_to_base64(f: &FieldElement) -> String {
    STANDARD.encode(field_to_be_bytes(f))
}

pub fn field_from_base64(s: &str) -> Result<FieldElement, FieldEncodingError> {
    let bytes = STANDARD
        .decode(s.trim())
        .map_err(|e| FieldEncodingError::Base64(e.to_string()))?;
    field_from_be_bytes(&bytes)
}

/// Signed integer embedding: negative values map to `p - |v|`.
pub fn field_from_i64(v: i64) -> FieldElement {
    let mag = Fp::from(v.unsigned_abs());
    if v < 0 { -mag } else { mag }
}

/// Short hex rendering for log lines.
pub fn field_hex(f: &FieldElement) -> String {
    hex::encode(field_to_be_bytes(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff::Field;

    #[test]
    fn big_endian_layout() {
        let bytes = field_to_be_bytes(&Fp::from(0x0102u64));
        assert_eq!(bytes[30], 0x01);
        assert_eq!(bytes[31], 0x02);
        assert!(bytes[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn short_input_is_left_padded() {
        assert_eq!(field_from_be_bytes(&[0x01, 0x00]).unwrap(), Fp::from(256u64));
        assert_eq!(field_from_be_bytes(&[]).unwrap(), Fp::ZERO);
    }

    #[test]
    fn rejects_oversized_and_non_canonical() {
        assert_eq!(field_from_be_bytes(&[0u8; 33]), Err(FieldEncodingError::TooLong(33)));
        assert_eq!(field_from_be_bytes(&[0xffu8; 32]), Err(FieldEncodingError::NonCanonical));
    }

    #[test]
    fn base64_matches_modulus_minus_one() {
        let f = -Fp::ONE;
        let s = field_to_base64(&f);
        assert_eq!(field_from_base64(&s).unwrap(), f);
        assert!(matches!(field_from_base64("not base64!"), Err(FieldEncodingError::Base64(_))));
    }

    #[test]
    fn signed_embedding() {
        assert_eq!(field_from_i64(-5) + Fp::from(5u64), Fp::ZERO);
        assert_eq!(field_from_i64(7), Fp::from(7u64));
        assert_eq!(field_from_i64(i64::MIN) + Fp::from(i64::MIN.unsigned_abs()), Fp::ZERO);
    }
}
