#![deny(missing_docs)]
//! Cryptographic primitives used by the Nocturne core
//!
//! This crate is the fixed-contract boundary between consensus code and
//! cryptography: hashing, key handling, key images and ring signatures
//! are all consumed through the definitions here.

mod hash;
mod keys;
mod signature;
mod tree_hash;

/// Common elliptic curve cryptography (ECC) operations
pub mod ecc {
    pub use curve25519_dalek::constants::ED25519_BASEPOINT_POINT as BASEPOINT;
    pub use curve25519_dalek::edwards::CompressedEdwardsY as CompressedPoint;
    pub use curve25519_dalek::edwards::EdwardsPoint as Point;
    pub use curve25519_dalek::scalar::Scalar;

    use curve25519_dalek::traits::IsIdentity;

    use super::CNFastHash;

    /// Converts a given hash to a `Scalar`
    pub fn hash_to_scalar(hash: crate::hash::Hash256Data) -> Scalar {
        Scalar::from_bytes_mod_order(hash)
    }

    /// Converts a serde serializable value to a `Scalar`
    ///
    /// The hash function used is CNFastHash (Keccak)
    pub fn data_to_scalar<T: serde::Serialize>(data: &T) -> Scalar {
        let hash = CNFastHash::digest(&bincode::serialize(&data).unwrap());
        hash_to_scalar(hash)
    }

    /// Maps arbitrary bytes to a point in the prime-order subgroup
    ///
    /// Rehashes the input with a retry counter until the digest
    /// decompresses to a curve point, then multiplies by the cofactor so
    /// no torsion component survives. The discrete logarithm of the
    /// result with respect to the basepoint stays unknown; key image
    /// unlinkability rests on that property
    pub fn hash_to_point(data: &[u8]) -> Point {
        let mut counter: u8 = 0;
        loop {
            let mut hasher = CNFastHash::new();
            hasher.input(data);
            hasher.input([counter]);
            if let Some(point) = CompressedPoint(hasher.result()).decompress() {
                let point = point.mul_by_cofactor();
                if !point.is_identity() {
                    return point;
                }
            }
            counter = counter.wrapping_add(1);
        }
    }

    /// Converts a serde serializable value to a `Point`
    ///
    /// The value's serialization is mapped through [`hash_to_point`];
    /// unlike a scalar-times-basepoint construction, nothing learns a
    /// discrete logarithm of the result
    pub fn data_to_point<T: serde::Serialize>(data: &T) -> Point {
        hash_to_point(&bincode::serialize(&data).unwrap())
    }
}

pub use hash::{cn_fast_hash, CNFastHash, Hash256, Hash256Data};
pub use keys::{KeyImage, KeyPair, PublicKey, SecretKey};
pub use signature::{
    check_key_image, check_ring_signature, generate_key_image, generate_ring_signature, Error,
    Signature,
};
pub use tree_hash::tree_hash;
