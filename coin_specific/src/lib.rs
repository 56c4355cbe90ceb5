//! Everything that makes this chain Nocturne rather than a generic
//! Cryptonote network

use common::{write_extra, Block, BlockHeader, TXExtra, TXIn, TXOut, TXOutTarget, Transaction};
use crypto::{Hash256, KeyPair};

pub mod emission;

/// Long and short name of the coin
pub const COIN_NAME: (&str, &str) = ("Nocturne", "NOC");

/// Release version and codename
pub const VERSION: (&str, &str) = ("v0.1.0", "Midnight Lantern");

/// Number of atomic units in one coin
pub const COIN: u64 = 1_000_000_000_000;

/// Mainnet launch timestamp, baked into the genesis header
const GENESIS_TIMESTAMP: u64 = 1_514_764_800;

/// The Nocturne coin definition
pub struct Nocturne;

impl blockchain::CoinDefinition for Nocturne {
    fn pow_hash(&self, blob: &[u8]) -> Hash256 {
        // Nocturne mines on the plain Keccak permutation
        crypto::cn_fast_hash(blob)
    }

    fn genesis_block(&self) -> Block {
        use blockchain::EmissionCurve;

        // Deterministic keys so every node derives the identical block
        let output_key = KeyPair::from(crypto::cn_fast_hash(b"Nocturne genesis output key"));
        let tx_key = KeyPair::from(crypto::cn_fast_hash(b"Nocturne genesis tx key"));

        let mut miner_tx = Transaction::default();
        miner_tx.prefix.version = 1;
        miner_tx.prefix.unlock_time =
            blockchain::config::CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW;
        miner_tx.prefix.inputs.push(TXIn::Gen(0));
        miner_tx.prefix.outputs.push(TXOut {
            amount: self.base_reward(0),
            target: TXOutTarget::ToKey {
                key: output_key.public_key,
            },
        });
        miner_tx.prefix.extra = write_extra(&[TXExtra::TxPublicKey(tx_key.public_key)]);

        Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 1,
                timestamp: GENESIS_TIMESTAMP,
                prev_id: Hash256::null_hash(),
                nonce: 10000,
            },
            miner_tx,
            tx_hashes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use blockchain::CoinDefinition;
    use common::GetHash;

    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        assert_eq!(
            Nocturne.genesis_block().get_hash(),
            Nocturne.genesis_block().get_hash()
        );
    }

    #[test]
    fn genesis_mints_the_first_reward() {
        use blockchain::EmissionCurve;

        let genesis = Nocturne.genesis_block();
        assert!(genesis.miner_tx.is_coinbase());
        assert_eq!(
            genesis.miner_tx.output_amount(),
            Some(Nocturne.base_reward(0))
        );
        assert!(genesis.tx_hashes.is_empty());
    }
}
