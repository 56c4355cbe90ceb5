use serde::{Deserialize, Serialize};

use crate::ecc::{self, Scalar, BASEPOINT};
use crate::hash::{CNFastHash, Hash256};
use crate::keys::{KeyImage, KeyPair, PublicKey, SecretKey};

/// Error type for signature operations
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// Returned when a ring member is not a valid curve point
    #[error("Ring member is not a valid curve point")]
    InvalidRingMember,

    /// Returned when a key image is not a valid curve point
    #[error("Key image is not a valid curve point")]
    InvalidKeyImage,

    /// Returned when the signing index is outside the ring
    #[error("Signing index is outside the ring")]
    InvalidIndex,
}

/// One term of a ring signature
///
/// A full ring signature carries one `Signature` per ring member
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Signature {
    /// Challenge scalar
    pub c: Scalar,
    /// Response scalar
    pub r: Scalar,
}

/// Derives the key image of the given keypair
///
/// The key image is the owner's secret multiplied into the hash-to-point
/// of the public key. It is deterministic per output and cannot be linked
/// back to the ring member that produced it
pub fn generate_key_image(keypair: &KeyPair) -> KeyImage {
    (keypair.secret_key * ecc::data_to_point(&keypair.public_key)).compress()
}

/// Checks that a key image is a valid point in the prime-order subgroup
///
/// Small-order and mixed-order points are rejected: a torsion component
/// would let two distinct images for the same output pass as different
/// double-spend tags
pub fn check_key_image(key_image: &KeyImage) -> bool {
    match key_image.decompress() {
        Some(point) => point.is_torsion_free() && !point.is_small_order(),
        None => false,
    }
}

/// Signs `prefix_hash` with a ring of public keys
///
/// `real_index` selects the ring member whose secret key is supplied.
/// Produces one `Signature` term per ring member
pub fn generate_ring_signature(
    prefix_hash: &Hash256,
    key_image: &KeyImage,
    ring: &[PublicKey],
    secret_key: &SecretKey,
    real_index: usize,
) -> Result<Vec<Signature>, Error> {
    if real_index >= ring.len() {
        return Err(Error::InvalidIndex);
    }
    let key_image_point = key_image.decompress().ok_or(Error::InvalidKeyImage)?;

    let mut rng = rand::rngs::OsRng;
    let mut signatures = vec![
        Signature {
            c: Scalar::ZERO,
            r: Scalar::ZERO
        };
        ring.len()
    ];

    let mut hasher = CNFastHash::new();
    hasher.input(prefix_hash.data());

    let mut sum = Scalar::ZERO;
    let mut k = Scalar::ZERO;

    for (i, member) in ring.iter().enumerate() {
        if i == real_index {
            k = Scalar::random(&mut rng);
            let l = k * BASEPOINT;
            let r = k * ecc::data_to_point(member);
            hasher.input(l.compress().as_bytes());
            hasher.input(r.compress().as_bytes());
        } else {
            let member_point = member.decompress().ok_or(Error::InvalidRingMember)?;
            signatures[i].c = Scalar::random(&mut rng);
            signatures[i].r = Scalar::random(&mut rng);
            let l = signatures[i].r * BASEPOINT + signatures[i].c * member_point;
            let r =
                signatures[i].r * ecc::data_to_point(member) + signatures[i].c * key_image_point;
            hasher.input(l.compress().as_bytes());
            hasher.input(r.compress().as_bytes());
            sum += signatures[i].c;
        }
    }

    let challenge = ecc::hash_to_scalar(hasher.result());
    signatures[real_index].c = challenge - sum;
    signatures[real_index].r = k - signatures[real_index].c * secret_key;

    Ok(signatures)
}

/// Verifies a ring signature over `prefix_hash`
///
/// Returns false on any malformed input (ring/signature length mismatch,
/// off-curve members) as well as on an unsatisfied challenge equation
pub fn check_ring_signature(
    prefix_hash: &Hash256,
    key_image: &KeyImage,
    ring: &[PublicKey],
    signatures: &[Signature],
) -> bool {
    if ring.is_empty() || signatures.len() != ring.len() {
        return false;
    }
    let key_image_point = match key_image.decompress() {
        Some(point) => point,
        None => return false,
    };

    let mut hasher = CNFastHash::new();
    hasher.input(prefix_hash.data());

    let mut sum = Scalar::ZERO;
    for (member, signature) in ring.iter().zip(signatures) {
        let member_point = match member.decompress() {
            Some(point) => point,
            None => return false,
        };
        let l = signature.r * BASEPOINT + signature.c * member_point;
        let r = signature.r * ecc::data_to_point(member) + signature.c * key_image_point;
        hasher.input(l.compress().as_bytes());
        hasher.input(r.compress().as_bytes());
        sum += signature.c;
    }

    ecc::hash_to_scalar(hasher.result()) == sum
}
