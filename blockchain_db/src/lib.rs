//! Storage port of the Nocturne core
//!
//! The chain logic only ever touches persistent state through the
//! [`BlockchainDB`] trait defined here. Primary records (blocks,
//! transactions, outputs, key images) are flat tables addressed by height,
//! hash or `(amount, global offset)`; everything else the core needs is
//! rebuildable from them.

use serde::{Deserialize, Serialize};

use common::{Block, Transaction};
use crypto::{Hash256, KeyImage};

mod error;
mod mem;

pub use error::{Error, Result};
pub use mem::BlockchainMemDB;

/// A stored block augmented with chain bookkeeping
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct BlockExtended {
    /// The block itself
    pub block: Block,
    /// Height of this block on its chain
    pub height: u64,
    /// Serialized size of the block including its transactions, in bytes
    pub block_size: u64,
    /// Sum of every block difficulty from genesis through this block
    pub cumulative_difficulty: u128,
    /// Total coins emitted by miner transactions through this block
    pub already_generated_coins: u64,
}

/// A stored transaction with its chain metadata
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TxEntry {
    /// The transaction itself
    pub tx: Transaction,
    /// Height of the block that confirmed this transaction
    pub block_height: u64,
    /// Global offset of each output in the per-amount output index
    pub global_output_indices: Vec<u64>,
}

/// Storage backend driver
///
/// All mutation happens between `begin_tx` and `commit`; `rollback`
/// discards every change made since `begin_tx`. The store accepts one
/// writer at a time, consistent with the single logical writer that owns
/// the chain state.
pub trait BlockchainDB: Send {
    // Write transactions
    /// Opens the single write transaction
    fn begin_tx(&mut self) -> Result<()>;
    /// Atomically publishes every mutation since `begin_tx`
    fn commit(&mut self) -> Result<()>;
    /// Discards every mutation since `begin_tx`
    fn rollback(&mut self) -> Result<()>;

    // Blocks
    /// Appends a block at the next height
    fn put_block(&mut self, block: BlockExtended) -> Result<()>;
    /// Removes and returns the block at the given height, which must be
    /// the tip
    fn delete_block(&mut self, height: u64) -> Result<BlockExtended>;
    /// Fetches a block by height
    fn get_block_by_height(&self, height: u64) -> Option<BlockExtended>;
    /// Fetches a block by hash
    fn get_block_by_hash(&self, hash: &Hash256) -> Option<BlockExtended>;
    /// Number of blocks stored. The tip is at `height() - 1`
    fn height(&self) -> u64;
    /// Hash of the tip block
    fn tip_hash(&self) -> Option<Hash256>;
    /// Cumulative difficulty of the block at the given height
    fn cumulative_difficulty_at(&self, height: u64) -> Option<u128>;

    // Confirmed transactions
    /// Stores a confirmed transaction with its metadata
    fn put_tx(
        &mut self,
        tx: Transaction,
        block_height: u64,
        global_output_indices: Vec<u64>,
    ) -> Result<()>;
    /// Removes and returns a confirmed transaction
    fn delete_tx(&mut self, tx_hash: &Hash256) -> Result<TxEntry>;
    /// Fetches a confirmed transaction with its metadata
    fn get_tx(&self, tx_hash: &Hash256) -> Option<TxEntry>;

    // Output index
    /// Appends an output to the index of its amount, returning its global
    /// offset
    fn append_output(&mut self, amount: u64, tx_hash: Hash256, out_index: u64) -> Result<u64>;
    /// Removes and returns the most recently appended output of an amount
    fn pop_output(&mut self, amount: u64) -> Result<(Hash256, u64)>;
    /// Resolves `(amount, global offset)` to the owning transaction and
    /// its output index
    fn get_output(&self, amount: u64, global_offset: u64) -> Option<(Hash256, u64)>;
    /// Number of indexed outputs of the given amount
    fn num_outputs(&self, amount: u64) -> u64;

    // Key images
    /// Marks a key image as spent
    fn insert_key_image(&mut self, key_image: KeyImage) -> Result<()>;
    /// Unmarks a key image, during chain rewind
    fn remove_key_image(&mut self, key_image: &KeyImage) -> Result<()>;
    /// True if the key image has been spent on this chain
    fn contains_key_image(&self, key_image: &KeyImage) -> bool;

    // Maintenance
    /// Drops all stored state
    fn reset(&mut self);
    /// Flushes buffered state to durable storage
    fn sync(&self) -> Result<()>;
}
