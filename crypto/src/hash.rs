use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha3::digest::Digest;
use sha3::Keccak256Full;

/// Raw byte representation of a 256-bit hash
pub type Hash256Data = [u8; 32];

/// A 256-bit hash value
///
/// Serves as the identity of blocks, transactions and ring members
/// throughout the core
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Hash256(Hash256Data);

impl Hash256 {
    /// The all-zero hash, used as the previous id of the genesis block
    pub fn null_hash() -> Self {
        Hash256([0; 32])
    }

    /// Borrows the raw hash bytes
    pub fn data(&self) -> &Hash256Data {
        &self.0
    }
}

impl Display for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<Hash256Data> for Hash256 {
    fn from(data: Hash256Data) -> Self {
        Hash256(data)
    }
}

impl TryFrom<&str> for Hash256 {
    type Error = hex::FromHexError;
    fn try_from(data: &str) -> Result<Self, Self::Error> {
        if data.len() != 64 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut buf = [0; 32];
        buf.copy_from_slice(&hex::decode(data)?);
        Ok(Hash256(buf))
    }
}

/// The Keccak hash used as the Cryptonote fast hash
///
/// Runs the full Keccak-f[1600] permutation and truncates the output to
/// 32 bytes, which coincides with the Keccak-256 digest
pub struct CNFastHash {
    hasher: Keccak256Full,
}

impl CNFastHash {
    /// Creates a new hasher instance
    pub fn new() -> Self {
        CNFastHash {
            hasher: Keccak256Full::new(),
        }
    }

    /// Feeds data into the hasher
    pub fn input(&mut self, data: impl AsRef<[u8]>) {
        self.hasher.update(data);
    }

    /// Consumes the hasher and returns the truncated digest
    pub fn result(self) -> Hash256Data {
        let mut buf = [0; 32];
        buf.copy_from_slice(&self.hasher.finalize()[..32]);
        buf
    }

    /// Hashes the given data in one call
    pub fn digest(data: &[u8]) -> Hash256Data {
        let mut buf = [0; 32];
        buf.copy_from_slice(&Keccak256Full::digest(data)[..32]);
        buf
    }
}

impl Default for CNFastHash {
    fn default() -> Self {
        CNFastHash::new()
    }
}

/// Hashes the given data, returning a wrapped `Hash256`
pub fn cn_fast_hash(data: &[u8]) -> Hash256 {
    Hash256::from(CNFastHash::digest(data))
}
