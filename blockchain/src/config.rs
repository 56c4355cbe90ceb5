use structopt::StructOpt;

/// Unlock times below this value are block heights, anything at or above
/// it is a UNIX timestamp
pub const CRYPTONOTE_MAX_BLOCK_NUMBER: u64 = 500_000_000;

/// Blocks a miner reward stays locked after its block
pub const CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW: u64 = 10;

/// Blocks an output must age before it may appear in a ring
pub const CRYPTONOTE_DEFAULT_TX_SPENDABLE_AGE: u64 = 10;

/// Blocks of slack granted when comparing a height-style unlock time
/// against the chain tip
pub const CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_BLOCKS: u64 = 1;

/// Seconds of slack granted when comparing a time-style unlock time
/// against the node clock
pub const CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_SECONDS: u64 =
    common::difficulty::DIFFICULTY_TARGET * CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_BLOCKS;

/// Maximum seconds a block timestamp may run ahead of the node clock
pub const CRYPTONOTE_BLOCK_FUTURE_TIME_LIMIT: u64 = 7200;

/// Number of trailing timestamps whose median bounds a new block's
/// timestamp from below
pub const BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW: usize = 11;

/// Number of trailing block sizes whose median drives the reward penalty
/// and the block size limit
pub const CRYPTONOTE_REWARD_BLOCKS_WINDOW: usize = 100;

/// Lower clamp of the block size median, in bytes. Blocks up to this
/// size never pay a reward penalty
pub const CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE: u64 = 300_000;

/// Bytes reserved in a block template for the miner transaction
pub const CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE: u64 = 600;

/// Maximum serialized size of a single transaction, in bytes
pub const CRYPTONOTE_MAX_TX_SIZE: u64 = 1_000_000;

/// Main chain growth after which an unextended alternative block is pruned
pub const ALTERNATIVE_BLOCK_KEEPALIVE_WINDOW: u64 = 100;

/// Bound on the cache of known-invalid block ids
pub const INVALID_BLOCK_CACHE_SIZE: usize = 1024;

/// Number of tip hashes listed densely in a short chain history before
/// the stride starts doubling
pub const SHORT_CHAIN_HISTORY_DENSE_COUNT: u64 = 10;

/// Cap on the hashes returned to a peer locating its fork point
pub const BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT: u64 = 10_000;

/// Runtime configuration for the blockchain
#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
pub struct Config {
    /// Storage driver backing the chain ("memory" is the only driver
    /// shipped in-tree)
    #[structopt(long, default_value = "memory")]
    pub db_type: String,
}
