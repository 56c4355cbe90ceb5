use curve25519_dalek::{
    constants::ED25519_BASEPOINT_POINT, edwards::CompressedEdwardsY, scalar::Scalar,
};

use crate::hash::Hash256;

/// A secret scalar
pub type SecretKey = Scalar;

/// A compressed curve point
pub type PublicKey = CompressedEdwardsY;

/// The unlinkable double-spend tag derived from a spent output's key
pub type KeyImage = PublicKey;

/// A secret/public keypair
pub struct KeyPair {
    /// The secret half of this keypair
    pub secret_key: SecretKey,
    /// The public half of this keypair
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a fresh random keypair
    pub fn generate() -> Self {
        let secret_key = Scalar::random(&mut rand::rngs::OsRng);

        Self::from(secret_key)
    }
}

impl From<Scalar> for KeyPair {
    fn from(secret_key: Scalar) -> Self {
        let public_key = (secret_key * ED25519_BASEPOINT_POINT).compress();
        Self {
            secret_key,
            public_key,
        }
    }
}

impl From<Hash256> for KeyPair {
    fn from(secret_key: Hash256) -> Self {
        let secret_key = Scalar::from_bytes_mod_order(*secret_key.data());

        Self::from(secret_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_public_from_secret() {
        let kp = KeyPair::generate();
        let rebuilt = KeyPair::from(kp.secret_key);
        assert_eq!(kp.public_key, rebuilt.public_key);
    }

    #[test]
    fn distinct_secrets_give_distinct_keys() {
        assert_ne!(
            KeyPair::generate().public_key,
            KeyPair::generate().public_key
        );
    }
}
