use serde::{Deserialize, Serialize};

use crypto::Hash256;

use crate::{GetHash, Transaction};

/// Block header
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct BlockHeader {
    /// Consensus rule set this block was created under
    pub major_version: u8,
    /// The version this block votes for in the hard fork schedule
    pub minor_version: u8,
    /// Creation time claimed by the miner (UNIX seconds)
    pub timestamp: u64,
    /// Hash of the previous block in the chain
    pub prev_id: Hash256,
    /// Proof-of-work nonce
    pub nonce: u32,
}

/// A complete block
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Block {
    /// This block's header
    pub header: BlockHeader,
    /// The transaction minting this block's reward
    pub miner_tx: Transaction,
    /// Hashes of every regular transaction confirmed by this block
    pub tx_hashes: Vec<Hash256>,
}

impl Block {
    /// Merkle tree root over the miner transaction and all regular
    /// transactions, in block order
    pub fn tx_tree_root(&self) -> Hash256 {
        let mut hashes = Vec::with_capacity(self.tx_hashes.len() + 1);
        hashes.push(self.miner_tx.get_hash());
        hashes.extend_from_slice(&self.tx_hashes);
        crypto::tree_hash(&hashes)
    }

    /// Serialized size of the block itself, excluding the bodies of its
    /// regular transactions
    pub fn blob_size(&self) -> u64 {
        bincode::serialized_size(self).unwrap()
    }
}

impl GetHash for Block {
    /// The hashing blob commits to the header, the transaction tree root
    /// and the transaction count. Proof-of-work runs over the same blob
    fn get_hash_blob(&self) -> Vec<u8> {
        let mut vec = bincode::serialize(&self.header).unwrap();
        vec.extend_from_slice(self.tx_tree_root().data());
        vec.extend_from_slice(&varint::serialize(self.tx_hashes.len() as u64 + 1));
        vec
    }
}
