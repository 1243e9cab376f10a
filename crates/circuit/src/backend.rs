//! Proving backends and the published verifying-key artifact.
//!
//! `Halo2Prover`/`Halo2Verifier` produce and check real IPA proofs over Vesta.
//! `MockBackend`/`MockVerifier` run halo2's `MockProver` and emit a digest:
//! not a SNARK, only useful to exercise the pipeline quickly.

use std::time::Instant;

use blake2b_simd::Params as Blake2bParams;
use halo2_proofs::{
    dev::MockProver,
    plonk::{create_proof, keygen_pk, keygen_vk, verify_proof, ProvingKey, SingleVerifier, VerifyingKey},
    poly::commitment::Params,
    transcript::{Blake2bRead, Blake2bWrite, Challenge255},
};
use pasta_curves::{vesta, EqAffine};
use primitives::encode::{encode_u32, encode_u8, expect_end, read_fixed, read_u32, read_u8, read_version, ENC_V1};
use primitives::field_to_be_bytes;
use rand_core::OsRng;
use tracing::debug;

use crate::batch_circuit::BatchTransitionCircuit;
use crate::params::min_k;
use crate::witness::BatchWitness;
use crate::{BatchPublic, CircuitError};

const DS_VK_V1: &[u8; 16] = b"rollup.vk.v1\0\0\0\0";
const DS_MOCK_VK_V1: &[u8; 16] = b"rollup.mockvk.v1";
const DS_MOCK_PROOF_V1: &[u8; 16] = b"rollup.mockpf.v1";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ProofScheme {
    Halo2Ipa = 1,
    Mock = 2,
}

impl TryFrom<u8> for ProofScheme {
    type Error = CircuitError;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(ProofScheme::Halo2Ipa),
            2 => Ok(ProofScheme::Mock),
            other => Err(CircuitError::InvalidVerifyingKey(format!("unknown scheme {other}"))),
        }
    }
}

/// Published verifying key: the circuit shape plus a fingerprint of the key.
/// The holder regenerates the key from `k` and the compiled shape and checks
/// the fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VerifyingKeyEnvelope {
    pub scheme: ProofScheme,
    pub depth: u32,
    pub batch: u32,
    pub k: u32,
    pub fingerprint: [u8; 32],
}

impl VerifyingKeyEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 12 + 32);
        encode_u8(ENC_V1, &mut out);
        encode_u8(self.scheme as u8, &mut out);
        encode_u32(self.depth, &mut out);
        encode_u32(self.batch, &mut out);
        encode_u32(self.k, &mut out);
        out.extend_from_slice(&self.fingerprint);
        out
    }

    pub fn from_bytes(mut data: &[u8]) -> Result<Self, CircuitError> {
        let parse = |data: &mut &[u8]| -> anyhow::Result<(u8, u32, u32, u32, [u8; 32])> {
            read_version(data)?;
            let scheme = read_u8(data)?;
            let depth = read_u32(data)?;
            let batch = read_u32(data)?;
            let k = read_u32(data)?;
            let fingerprint = read_fixed::<32>(data)?;
            expect_end(data, "verifying key")?;
            Ok((scheme, depth, batch, k, fingerprint))
        };
        let (scheme, depth, batch, k, fingerprint) =
            parse(&mut data).map_err(|e| CircuitError::InvalidVerifyingKey(e.to_string()))?;
        Ok(Self { scheme: ProofScheme::try_from(scheme)?, depth, batch, k, fingerprint })
    }

    fn expect_shape(&self, scheme: ProofScheme, depth: usize, batch: usize) -> Result<(), CircuitError> {
        if self.scheme != scheme {
            return Err(CircuitError::InvalidVerifyingKey(format!("scheme {:?}, expected {:?}", self.scheme, scheme)));
        }
        if self.depth as usize != depth || self.batch as usize != batch {
            return Err(CircuitError::InvalidVerifyingKey(format!(
                "shape ({}, {}), expected ({depth}, {batch})",
                self.depth, self.batch
            )));
        }
        if self.k < min_k(depth, batch) {
            return Err(CircuitError::CircuitTooLarge { k: self.k, min: min_k(depth, batch) });
        }
        Ok(())
    }
}

/// Operator-side proving capability for one circuit shape.
pub trait BatchProver<const DEPTH: usize, const BATCH: usize>: Send + Sync {
    fn verifying_key(&self) -> VerifyingKeyEnvelope;
    fn prove(&self, witness: &BatchWitness<DEPTH, BATCH>) -> Result<Vec<u8>, CircuitError>;
    fn verify(&self, public: &BatchPublic, proof: &[u8]) -> Result<(), CircuitError>;
}

/// Anchor-side verification capability, loaded from published key bytes.
pub trait BatchVerifier: Sized + Send + Sync {
    fn from_verifying_key(bytes: &[u8]) -> Result<Self, CircuitError>;
    fn verify(&self, public: &BatchPublic, proof: &[u8]) -> Result<(), CircuitError>;
}

fn vk_fingerprint(vk: &VerifyingKey<EqAffine>) -> [u8; 32] {
    let pinned = format!("{:?}", vk.pinned());
    let hash = Blake2bParams::new().hash_length(32).personal(DS_VK_V1).hash(pinned.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

fn checked_k(depth: usize, batch: usize, k: u32) -> Result<u32, CircuitError> {
    let min = min_k(depth, batch);
    if k < min { return Err(CircuitError::CircuitTooLarge { k, min }); }
    Ok(k)
}

fn halo2_verify(
    params: &Params<EqAffine>,
    vk: &VerifyingKey<EqAffine>,
    public: &BatchPublic,
    proof: &[u8],
) -> Result<(), CircuitError> {
    let instances = public.to_instances();
    let strategy = SingleVerifier::new(params);
    let mut transcript = Blake2bRead::<_, vesta::Affine, Challenge255<_>>::init(proof);
    verify_proof(params, vk, strategy, &[&[&instances]], &mut transcript).map_err(|_| CircuitError::VerificationFailed)
}

pub struct Halo2Prover<const DEPTH: usize, const BATCH: usize> {
    params: Params<EqAffine>,
    pk: ProvingKey<EqAffine>,
    envelope: VerifyingKeyEnvelope,
}

impl<const DEPTH: usize, const BATCH: usize> Halo2Prover<DEPTH, BATCH> {
    /// One-time key setup. IPA parameters need no trusted setup and are
    /// derived deterministically from `k`.
    pub fn setup(k: u32) -> Result<Self, CircuitError> {
        let k = checked_k(DEPTH, BATCH, k)?;
        let started = Instant::now();
        let params = Params::<EqAffine>::new(k);
        let blank = BatchTransitionCircuit::<DEPTH, BATCH>::blank();
        let vk = keygen_vk(&params, &blank)?;
        let fingerprint = vk_fingerprint(&vk);
        let pk = keygen_pk(&params, vk, &blank)?;
        debug!(k, depth = DEPTH, batch = BATCH, elapsed_ms = started.elapsed().as_millis() as u64, "halo2 keys generated");
        let envelope = VerifyingKeyEnvelope {
            scheme: ProofScheme::Halo2Ipa,
            depth: DEPTH as u32,
            batch: BATCH as u32,
            k,
            fingerprint,
        };
        Ok(Self { params, pk, envelope })
    }

    pub fn setup_minimal() -> Result<Self, CircuitError> { Self::setup(min_k(DEPTH, BATCH)) }
}

impl<const DEPTH: usize, const BATCH: usize> BatchProver<DEPTH, BATCH> for Halo2Prover<DEPTH, BATCH> {
    fn verifying_key(&self) -> VerifyingKeyEnvelope { self.envelope }

    fn prove(&self, witness: &BatchWitness<DEPTH, BATCH>) -> Result<Vec<u8>, CircuitError> {
        let started = Instant::now();
        let circuit = BatchTransitionCircuit::<DEPTH, BATCH>::from_witness(witness);
        let instances = witness.public.to_instances();
        let mut transcript = Blake2bWrite::<_, vesta::Affine, Challenge255<_>>::init(vec![]);
        create_proof(&self.params, &self.pk, &[circuit], &[&[&instances]], OsRng, &mut transcript)?;
        let proof = transcript.finalize();
        debug!(bytes = proof.len(), elapsed_ms = started.elapsed().as_millis() as u64, "batch proof created");
        Ok(proof)
    }

    fn verify(&self, public: &BatchPublic, proof: &[u8]) -> Result<(), CircuitError> {
        halo2_verify(&self.params, self.pk.get_vk(), public, proof)
    }
}

pub struct Halo2Verifier<const DEPTH: usize, const BATCH: usize> {
    params: Params<EqAffine>,
    vk: VerifyingKey<EqAffine>,
}

impl<const DEPTH: usize, const BATCH: usize> BatchVerifier for Halo2Verifier<DEPTH, BATCH> {
    fn from_verifying_key(bytes: &[u8]) -> Result<Self, CircuitError> {
        let env = VerifyingKeyEnvelope::from_bytes(bytes)?;
        env.expect_shape(ProofScheme::Halo2Ipa, DEPTH, BATCH)?;
        let params = Params::<EqAffine>::new(env.k);
        let vk = keygen_vk(&params, &BatchTransitionCircuit::<DEPTH, BATCH>::blank())?;
        if vk_fingerprint(&vk) != env.fingerprint {
            return Err(CircuitError::InvalidVerifyingKey("fingerprint mismatch".into()));
        }
        Ok(Self { params, vk })
    }

    fn verify(&self, public: &BatchPublic, proof: &[u8]) -> Result<(), CircuitError> {
        halo2_verify(&self.params, &self.vk, public, proof)
    }
}

fn mock_fingerprint(depth: usize, batch: usize, k: u32) -> [u8; 32] {
    let mut buf = Vec::with_capacity(12);
    encode_u32(depth as u32, &mut buf);
    encode_u32(batch as u32, &mut buf);
    encode_u32(k, &mut buf);
    let hash = Blake2bParams::new().hash_length(32).personal(DS_MOCK_VK_V1).hash(&buf);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

fn mock_proof(fingerprint: &[u8; 32], public: &BatchPublic) -> Vec<u8> {
    let mut buf = Vec::with_capacity(96);
    buf.extend_from_slice(fingerprint);
    buf.extend_from_slice(&field_to_be_bytes(&public.old_root));
    buf.extend_from_slice(&field_to_be_bytes(&public.new_root));
    Blake2bParams::new().hash_length(32).personal(DS_MOCK_PROOF_V1).hash(&buf).as_bytes().to_vec()
}

/// Checks every constraint with `MockProver`, then binds the public inputs
/// into a digest in place of a proof.
pub struct MockBackend<const DEPTH: usize, const BATCH: usize> {
    envelope: VerifyingKeyEnvelope,
}

impl<const DEPTH: usize, const BATCH: usize> MockBackend<DEPTH, BATCH> {
    pub fn new() -> Self {
        let k = min_k(DEPTH, BATCH);
        let envelope = VerifyingKeyEnvelope {
            scheme: ProofScheme::Mock,
            depth: DEPTH as u32,
            batch: BATCH as u32,
            k,
            fingerprint: mock_fingerprint(DEPTH, BATCH, k),
        };
        Self { envelope }
    }
}

impl<const DEPTH: usize, const BATCH: usize> Default for MockBackend<DEPTH, BATCH> {
    fn default() -> Self { Self::new() }
}

impl<const DEPTH: usize, const BATCH: usize> BatchProver<DEPTH, BATCH> for MockBackend<DEPTH, BATCH> {
    fn verifying_key(&self) -> VerifyingKeyEnvelope { self.envelope }

    fn prove(&self, witness: &BatchWitness<DEPTH, BATCH>) -> Result<Vec<u8>, CircuitError> {
        let circuit = BatchTransitionCircuit::<DEPTH, BATCH>::from_witness(witness);
        let prover = MockProver::run(self.envelope.k, &circuit, vec![witness.public.to_instances()])?;
        prover.verify().map_err(|failures| CircuitError::Unsatisfied(format!("{failures:?}")))?;
        Ok(mock_proof(&self.envelope.fingerprint, &witness.public))
    }

    fn verify(&self, public: &BatchPublic, proof: &[u8]) -> Result<(), CircuitError> {
        if proof != mock_proof(&self.envelope.fingerprint, public).as_slice() {
            return Err(CircuitError::VerificationFailed);
        }
        Ok(())
    }
}

pub struct MockVerifier {
    fingerprint: [u8; 32],
}

impl BatchVerifier for MockVerifier {
    fn from_verifying_key(bytes: &[u8]) -> Result<Self, CircuitError> {
        let env = VerifyingKeyEnvelope::from_bytes(bytes)?;
        if env.scheme != ProofScheme::Mock {
            return Err(CircuitError::InvalidVerifyingKey(format!("scheme {:?}, expected Mock", env.scheme)));
        }
        if env.fingerprint != mock_fingerprint(env.depth as usize, env.batch as usize, env.k) {
            return Err(CircuitError::InvalidVerifyingKey("fingerprint mismatch".into()));
        }
        Ok(Self { fingerprint: env.fingerprint })
    }

    fn verify(&self, public: &BatchPublic, proof: &[u8]) -> Result<(), CircuitError> {
        if proof != mock_proof(&self.fingerprint, public).as_slice() {
            return Err(CircuitError::VerificationFailed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_rejects_garbage() {
        let env = MockBackend::<2, 1>::new().verifying_key();
        let mut bytes = env.to_bytes();
        assert_eq!(VerifyingKeyEnvelope::from_bytes(&bytes).unwrap(), env);
        bytes.push(0);
        assert!(matches!(VerifyingKeyEnvelope::from_bytes(&bytes), Err(CircuitError::InvalidVerifyingKey(_))));
        bytes.truncate(1);
        assert!(VerifyingKeyEnvelope::from_bytes(&bytes).is_err());
    }

    #[test]
    fn mock_verifier_rejects_halo2_scheme() {
        let mut env = MockBackend::<2, 1>::new().verifying_key();
        env.scheme = ProofScheme::Halo2Ipa;
        assert!(MockVerifier::from_verifying_key(&env.to_bytes()).is_err());
    }

    #[test]
    fn halo2_verifier_rejects_wrong_shape() {
        let env = MockBackend::<2, 1>::new().verifying_key();
        let halo2_env = VerifyingKeyEnvelope { scheme: ProofScheme::Halo2Ipa, ..env };
        assert!(matches!(
            Halo2Verifier::<3, 1>::from_verifying_key(&halo2_env.to_bytes()),
            Err(CircuitError::InvalidVerifyingKey(_))
        ));
    }

    #[test]
    fn setup_rejects_small_k() {
        assert_eq!(
            Halo2Prover::<2, 2>::setup(4).err(),
            Some(CircuitError::CircuitTooLarge { k: 4, min: min_k(2, 2) })
        );
    }
}
