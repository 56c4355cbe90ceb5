//! The authoritative chain
//!
//! Owns the main chain through the storage port, the bounded set of
//! alternative branches, and the caches over both. Incoming blocks are
//! validated against consensus rules, attached to the main chain or an
//! alternative branch, and a heavier branch triggers a reorganization.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};

use blockchain_db::{BlockExtended, BlockchainDB, BlockchainMemDB};
use common::{Block, CancelToken, GetHash, Transaction};
use crypto::{Hash256, KeyImage, PublicKey};
use ensure_macro::ensure;
use hardfork::HardFork;

mod checkpoints;
mod reorg;

/// Consensus constants and runtime configuration
pub mod config;
mod error;
/// Emission curve seam and reward arithmetic
pub mod reward;
/// Stateless consensus rule checks
pub mod validator;

/// Chain fixtures shared by tests across the workspace
pub mod test_definitions;

#[cfg(test)]
mod tests;

pub use checkpoints::Checkpoints;
pub use config::Config;
pub use error::{Error, Result};
pub use reward::EmissionCurve;

use config::{
    ALTERNATIVE_BLOCK_KEEPALIVE_WINDOW, BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW,
    BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT, CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE,
    CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE, CRYPTONOTE_DEFAULT_TX_SPENDABLE_AGE,
    CRYPTONOTE_REWARD_BLOCKS_WINDOW, INVALID_BLOCK_CACHE_SIZE, SHORT_CHAIN_HISTORY_DENSE_COUNT,
};

/// Everything that makes this chain a particular coin: proof of work,
/// emission and the genesis block
pub trait CoinDefinition: EmissionCurve + Send + Sync {
    /// Proof-of-work hash of a block hashing blob
    fn pow_hash(&self, blob: &[u8]) -> Hash256;
    /// The fixed first block of the chain
    fn genesis_block(&self) -> Block;
}

/// Where an accepted block ended up
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BlockAddResult {
    /// The block extended the main chain
    AddedToMain,
    /// The block was stored on an alternative branch
    AddedToAlt,
    /// The block made its branch the heaviest and the chain switched to it
    AddedToAltAndSwitched,
}

/// Chain mutations observed by the transaction pool
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// A block joined the main chain
    BlockAttached {
        /// Id of the attached block
        block_hash: Hash256,
        /// Transactions it confirmed
        tx_hashes: Vec<Hash256>,
        /// Key images it consumed
        spent_key_images: Vec<KeyImage>,
    },
    /// A block left the main chain during a reorganization
    BlockDetached {
        /// The block's regular transactions, candidates for readmission
        txs: Vec<Transaction>,
    },
}

/// A block parked on an alternative branch
#[derive(Clone)]
pub(crate) struct AltChainEntry {
    pub(crate) block: Block,
    /// Resolved transaction bodies, kept for the eventual switch
    pub(crate) txs: Vec<Transaction>,
    pub(crate) height: u64,
    pub(crate) cumulative_difficulty: u128,
    /// Carried from the fork point; exact emission is recomputed on switch
    pub(crate) already_generated_coins: u64,
    /// Main chain height when this block arrived, for retention
    pub(crate) seen_at_height: u64,
}

/// Bounded remember-set of block ids that failed validation
struct InvalidBlockCache {
    entries: std::collections::HashSet<Hash256>,
    order: std::collections::VecDeque<Hash256>,
    capacity: usize,
}

impl InvalidBlockCache {
    fn new(capacity: usize) -> Self {
        InvalidBlockCache {
            entries: Default::default(),
            order: Default::default(),
            capacity,
        }
    }

    fn insert(&mut self, hash: Hash256) {
        if !self.entries.insert(hash) {
            return;
        }
        self.order.push_back(hash);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains(hash)
    }
}

pub(crate) struct DbVersionSource<'a>(pub(crate) &'a dyn BlockchainDB);

impl hardfork::BlockVersionSource for DbVersionSource<'_> {
    fn height(&self) -> u64 {
        self.0.height()
    }
    fn block_version(&self, height: u64) -> (u8, u8) {
        self.0
            .get_block_by_height(height)
            .map(|b| (b.block.header.major_version, b.block.header.minor_version))
            .unwrap_or((1, 1))
    }
}

/// Seconds since the UNIX epoch by the node clock
pub fn adjusted_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// The authoritative chain state
pub struct Blockchain {
    db: Box<dyn BlockchainDB + Send>,
    coin: Arc<dyn CoinDefinition>,
    hardfork: HardFork,
    checkpoints: Checkpoints,
    alternative_chains: HashMap<Hash256, AltChainEntry>,
    invalid_blocks: InvalidBlockCache,
    current_block_size_limit: u64,
    current_block_size_median: u64,
    events: Vec<ChainEvent>,
}

impl Blockchain {
    /// Opens the chain described by the configuration, creating the
    /// genesis block on first start
    pub fn new(config: &Config, coin: Arc<dyn CoinDefinition>, hardfork: HardFork) -> Result<Self> {
        let db: Box<dyn BlockchainDB + Send> = match config.db_type.as_ref() {
            "memory" => Box::new(BlockchainMemDB::new()),
            _ => panic!("Unknown DB type!"),
        };
        Self::with_db(db, coin, hardfork)
    }

    /// Opens the chain over an explicit storage driver
    pub fn with_db(
        db: Box<dyn BlockchainDB + Send>,
        coin: Arc<dyn CoinDefinition>,
        hardfork: HardFork,
    ) -> Result<Self> {
        let mut chain = Blockchain {
            db,
            coin,
            hardfork,
            checkpoints: Checkpoints::new(),
            alternative_chains: HashMap::new(),
            invalid_blocks: InvalidBlockCache::new(INVALID_BLOCK_CACHE_SIZE),
            current_block_size_limit: 2 * CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE,
            current_block_size_median: CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE,
            events: Vec::new(),
        };
        if chain.db.height() == 0 {
            chain.attach_genesis()?;
        } else {
            chain.replay_hardfork()?;
        }
        chain.update_size_limit();
        Ok(chain)
    }

    /// Installs the static checkpoint set
    pub fn set_checkpoints(&mut self, checkpoints: Checkpoints) {
        self.checkpoints = checkpoints;
    }

    /// Height of the chain tip
    pub fn current_height(&self) -> u64 {
        self.db.height() - 1
    }

    /// Cumulative difficulty of the whole main chain
    pub fn current_cumulative_difficulty(&self) -> u128 {
        self.db
            .cumulative_difficulty_at(self.current_height())
            .unwrap_or(0)
    }

    /// Hash of the chain tip
    pub fn tip_hash(&self) -> Hash256 {
        self.db.tip_hash().unwrap_or_else(Hash256::null_hash)
    }

    /// The hard fork schedule governing this chain
    pub fn hard_fork(&self) -> &HardFork {
        &self.hardfork
    }

    /// Coins emitted by miner transactions through the chain tip
    pub fn already_generated_coins(&self) -> u64 {
        self.db
            .get_block_by_height(self.current_height())
            .map(|bext| bext.already_generated_coins)
            .unwrap_or(0)
    }

    /// Difficulty the next main chain block must meet
    pub fn next_difficulty(&self) -> u128 {
        let (timestamps, difficulties) = self.retarget_window();
        common::difficulty::next_difficulty(
            &timestamps,
            &difficulties,
            common::difficulty::DIFFICULTY_TARGET,
        )
    }

    /// The current block size limit in bytes
    pub fn block_size_limit(&self) -> u64 {
        self.current_block_size_limit
    }

    /// Fetches a block by hash from the main chain or an alternative
    /// branch
    pub fn get_block_by_hash(&self, hash: &Hash256) -> Option<Block> {
        self.db
            .get_block_by_hash(hash)
            .map(|bext| bext.block)
            .or_else(|| {
                self.alternative_chains
                    .get(hash)
                    .map(|entry| entry.block.clone())
            })
    }

    /// Fetches a main chain block by height
    pub fn get_block_by_height(&self, height: u64) -> Option<Block> {
        self.db.get_block_by_height(height).map(|bext| bext.block)
    }

    /// Fetches consecutive main chain blocks starting at a height
    pub fn get_blocks(&self, start: u64, count: u64) -> Vec<Block> {
        (start..start.saturating_add(count))
            .map_while(|height| self.get_block_by_height(height))
            .collect()
    }

    /// Every block currently parked on an alternative branch
    pub fn get_alternative_blocks(&self) -> Vec<Block> {
        self.alternative_chains
            .values()
            .map(|entry| entry.block.clone())
            .collect()
    }

    /// True if the block id is in the main, alternative or invalid index
    pub fn have_block(&self, hash: &Hash256) -> bool {
        self.db.get_block_by_hash(hash).is_some()
            || self.alternative_chains.contains_key(hash)
            || self.invalid_blocks.contains(hash)
    }

    /// True if the transaction is confirmed on the main chain
    pub fn have_tx(&self, tx_hash: &Hash256) -> bool {
        self.db.get_tx(tx_hash).is_some()
    }

    /// Fetches a confirmed transaction
    pub fn get_tx(&self, tx_hash: &Hash256) -> Option<Transaction> {
        self.db.get_tx(tx_hash).map(|entry| entry.tx)
    }

    /// Global output index positions of a confirmed transaction's outputs
    pub fn get_tx_output_indices(&self, tx_hash: &Hash256) -> Option<Vec<u64>> {
        self.db
            .get_tx(tx_hash)
            .map(|entry| entry.global_output_indices)
    }

    /// True if the key image was consumed by a main chain transaction
    pub fn is_key_image_spent(&self, key_image: &KeyImage) -> bool {
        self.db.contains_key_image(key_image)
    }

    /// Fully validates a transaction against the current chain state
    ///
    /// Used for pool admission. Returns the fee on success
    pub fn check_tx(&self, tx: &Transaction, cancel: &CancelToken) -> Result<u64> {
        validator::check_tx_full(
            &*self.db,
            self.current_height(),
            adjusted_time(),
            tx,
            cancel,
        )
    }

    /// Chain mutations accumulated since the last call, oldest first
    pub fn take_events(&mut self) -> Vec<ChainEvent> {
        std::mem::take(&mut self.events)
    }

    /// Ingests a block received from a peer or miner
    ///
    /// `provided_txs` must contain every transaction the block confirms
    /// that is not already resolvable by the caller; order is irrelevant.
    pub fn add_block(
        &mut self,
        block: Block,
        provided_txs: Vec<Transaction>,
        cancel: &CancelToken,
    ) -> Result<BlockAddResult> {
        ensure!(!cancel.is_cancelled(), Error::Cancelled);
        let block_id = block.get_hash();

        if self.db.get_block_by_hash(&block_id).is_some()
            || self.alternative_chains.contains_key(&block_id)
        {
            return Err(Error::AlreadyKnown);
        }
        if self.invalid_blocks.contains(&block_id) {
            debug!("Block {} is already marked invalid", block_id);
            return Err(Error::ConsensusInvalid("block was previously found invalid"));
        }

        let txs = self.resolve_block_txs(&block, provided_txs)?;

        let result = if block.header.prev_id == self.tip_hash() {
            self.add_block_to_main(block, txs, cancel)
                .map(|_| BlockAddResult::AddedToMain)
        } else {
            self.add_block_to_alternative(block_id, block, txs, cancel)
        };

        match result {
            Ok(outcome) => {
                self.prune_alternative_chains();
                Ok(outcome)
            }
            Err(err) => {
                if err.taints_block() {
                    self.alternative_chains.remove(&block_id);
                    self.invalid_blocks.insert(block_id);
                }
                Err(err)
            }
        }
    }

    /// Ordered tip-to-genesis hash sample: the last
    /// [`SHORT_CHAIN_HISTORY_DENSE_COUNT`] blocks densely, then strides
    /// doubling back to the genesis block
    pub fn short_history(&self) -> Vec<Hash256> {
        let mut ids = Vec::new();
        let sz = self.db.height();
        let mut back_offset: u64 = 1;
        let mut i = 0;
        while back_offset < sz {
            if let Some(bext) = self.db.get_block_by_height(sz - back_offset) {
                ids.push(bext.block.get_hash());
            }
            if i < SHORT_CHAIN_HISTORY_DENSE_COUNT {
                back_offset += 1;
            } else {
                back_offset *= 2;
            }
            i += 1;
        }
        if let Some(genesis) = self.db.get_block_by_height(0) {
            ids.push(genesis.block.get_hash());
        }
        ids
    }

    /// Locates the fork point with a peer from its short history
    ///
    /// # Returns
    /// `(start_height, total_height, hashes)` where `hashes` walks the
    /// main chain from the highest shared block toward the tip
    pub fn locate_fork(&self, peer_history: &[Hash256]) -> Result<(u64, u64, Vec<Hash256>)> {
        for hash in peer_history {
            if let Some(bext) = self.db.get_block_by_hash(hash) {
                let start_height = bext.height;
                let hashes = (start_height..self.db.height())
                    .take(BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT as usize)
                    .filter_map(|height| {
                        self.db
                            .get_block_by_height(height)
                            .map(|bext| bext.block.get_hash())
                    })
                    .collect();
                return Ok((start_height, self.db.height(), hashes));
            }
        }
        Err(Error::FormatInvalid(
            "peer history shares no block with this chain",
        ))
    }

    /// Picks `count` distinct mature outputs of an amount for ring
    /// construction
    ///
    /// # Returns
    /// `(global_offset, output_key)` pairs ordered by offset
    pub fn random_outputs(&self, amount: u64, count: u64) -> Result<Vec<(u64, PublicKey)>> {
        use rand::Rng;

        let now = adjusted_time();
        let current_height = self.current_height();
        let total = self.db.num_outputs(amount);

        // Outputs are appended in chain order, so everything below the
        // first immature tail entry is fair game
        let mut allowed = total;
        while allowed > 0 {
            let entry = self
                .output_owner(amount, allowed - 1)?
                .ok_or(Error::ConsensusInvalid("output index out of range"))?;
            if entry.block_height + CRYPTONOTE_DEFAULT_TX_SPENDABLE_AGE <= current_height
                && validator::is_unlocked(entry.tx.prefix.unlock_time, current_height, now)
            {
                break;
            }
            allowed -= 1;
        }

        ensure!(
            allowed >= count,
            Error::NotEnoughOutputs {
                amount,
                requested: count,
                available: allowed,
            }
        );

        let mut offsets: Vec<u64> = if allowed == count {
            (0..allowed).collect()
        } else {
            let mut rng = rand::thread_rng();
            let mut picked = std::collections::HashSet::new();
            while (picked.len() as u64) < count {
                picked.insert(rng.gen_range(0..allowed));
            }
            picked.into_iter().collect()
        };
        offsets.sort_unstable();

        offsets
            .into_iter()
            .map(|offset| {
                let (tx_hash, out_index) = self
                    .db
                    .get_output(amount, offset)
                    .ok_or(Error::ConsensusInvalid("output index out of range"))?;
                let entry = self.db.get_tx(&tx_hash).ok_or_else(|| {
                    Error::Storage(blockchain_db::Error::Corruption(format!(
                        "output index references missing transaction {}",
                        tx_hash
                    )))
                })?;
                let common::TXOutTarget::ToKey { key } =
                    &entry.tx.prefix.outputs[out_index as usize].target;
                Ok((offset, *key))
            })
            .collect()
    }

    /// Assembles a mineable block on top of the current tip
    ///
    /// `pool_txs` is the fee-ordered candidate list from the transaction
    /// pool; transactions are packed while they fit under the size
    /// median, so the template never pays a reward penalty
    pub fn create_block_template(
        &self,
        target: PublicKey,
        pool_txs: &[Transaction],
    ) -> Result<Block> {
        let height = self.db.height();
        let parent = self
            .db
            .get_block_by_height(height - 1)
            .ok_or(Error::Storage(blockchain_db::Error::Corruption(
                "chain has no tip".into(),
            )))?;

        let mut total_size = CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE;
        let mut fees: u64 = 0;
        let mut tx_hashes = Vec::new();
        for tx in pool_txs {
            let size = tx.blob_size();
            if total_size + size > self.current_block_size_median {
                continue;
            }
            total_size += size;
            fees = fees
                .checked_add(tx.fee().unwrap_or(0))
                .ok_or(Error::ConsensusInvalid("fee sum overflows"))?;
            tx_hashes.push(tx.get_hash());
        }

        let base_reward = reward::get_block_reward(
            self.coin.as_ref(),
            self.current_block_size_median,
            0,
            parent.already_generated_coins,
        )?;
        let miner_tx = reward::construct_miner_tx(height, base_reward, fees, target)?;

        Ok(Block {
            header: common::BlockHeader {
                major_version: self.hardfork.current_version(),
                minor_version: self.hardfork.ideal_version(),
                timestamp: adjusted_time(),
                prev_id: self.tip_hash(),
                nonce: 0,
            },
            miner_tx,
            tx_hashes,
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn resolve_block_txs(
        &self,
        block: &Block,
        provided: Vec<Transaction>,
    ) -> Result<Vec<Transaction>> {
        let mut by_hash: HashMap<Hash256, Transaction> = provided
            .into_iter()
            .map(|tx| (tx.get_hash(), tx))
            .collect();
        block
            .tx_hashes
            .iter()
            .map(|hash| {
                by_hash
                    .remove(hash)
                    .ok_or(Error::MissingTransaction(*hash))
            })
            .collect()
    }

    fn add_block_to_main(
        &mut self,
        block: Block,
        txs: Vec<Transaction>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let block_id = block.get_hash();
        let height = self.db.height();
        self.db.begin_tx()?;
        match self.connect_block(&block, &txs, cancel) {
            Ok(spent_key_images) => {
                self.db.commit()?;
                self.update_size_limit();
                self.events.push(ChainEvent::BlockAttached {
                    block_hash: block_id,
                    tx_hashes: block.tx_hashes.clone(),
                    spent_key_images,
                });
                info!(
                    "Added block {} at height {}, difficulty {}",
                    block_id,
                    height,
                    self.current_cumulative_difficulty()
                );
                Ok(())
            }
            Err(err) => {
                self.db.rollback()?;
                Err(err)
            }
        }
    }

    /// Attaches one block on top of the current tip inside an open
    /// storage transaction. Performs the complete validation pass
    ///
    /// # Returns
    /// The key images the block spent
    pub(crate) fn connect_block(
        &mut self,
        block: &Block,
        txs: &[Transaction],
        cancel: &CancelToken,
    ) -> Result<Vec<KeyImage>> {
        ensure!(!cancel.is_cancelled(), Error::Cancelled);

        let block_id = block.get_hash();
        let height = self.db.height();
        let now = adjusted_time();
        let parent = self
            .db
            .get_block_by_height(height - 1)
            .ok_or(Error::Storage(blockchain_db::Error::Corruption(
                "chain has no tip".into(),
            )))?;
        ensure!(
            block.header.prev_id == parent.block.get_hash(),
            Error::ConsensusInvalid("block does not extend the tip")
        );

        // Version gate first; this failure must not taint the block
        ensure!(
            self.hardfork
                .check_block_version(block.header.major_version, height),
            Error::VersionDisallowed(hardfork::Error::VersionRejected {
                version: block.header.major_version,
                required: self.hardfork.required_version_for(height),
            })
        );

        let timestamps = self.last_timestamps(BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW);
        validator::check_block_timestamp(&timestamps, block, now)?;

        let in_checkpoint_zone = self
            .checkpoints
            .check_block(height, &block_id)
            .map_err(|_| Error::ConsensusInvalid("block contradicts a checkpoint"))?;

        let difficulty = self.next_difficulty();
        if !in_checkpoint_zone {
            let pow_hash = self.coin.pow_hash(&block.get_hash_blob());
            validator::check_proof_of_work(&pow_hash, difficulty)?;
        }

        validator::prevalidate_miner_tx(block, height)?;

        // The body: every transaction validated and indexed in order,
        // ring signatures joined at the end across the worker pool
        let current_height_for_inputs = height - 1;
        let mut fees: u64 = 0;
        let mut cumulative_size = block.blob_size();
        let mut spent_key_images = Vec::new();
        let mut signature_jobs = Vec::new();

        for (tx_hash, tx) in block.tx_hashes.iter().zip(txs) {
            ensure!(!cancel.is_cancelled(), Error::Cancelled);
            ensure!(
                tx.get_hash() == *tx_hash,
                Error::FormatInvalid("transaction does not match its hash")
            );
            ensure!(
                self.db.get_tx(tx_hash).is_none(),
                Error::ConsensusInvalid("transaction is already confirmed")
            );
            ensure!(
                !tx.is_coinbase(),
                Error::FormatInvalid("unexpected extra miner transaction")
            );
            validator::check_tx_syntax(tx)?;

            let (fee, jobs) = validator::prepare_tx_input_checks(
                &*self.db,
                current_height_for_inputs,
                now,
                tx,
                cancel,
            )?;
            fees = fees
                .checked_add(fee)
                .ok_or(Error::ConsensusInvalid("fee sum overflows"))?;
            cumulative_size += tx.blob_size();
            signature_jobs.extend(jobs);

            for key_image in tx.key_images() {
                self.db.insert_key_image(*key_image).map_err(|err| match err {
                    blockchain_db::Error::Exists(_) => Error::DoubleSpend,
                    other => Error::Storage(other),
                })?;
                spent_key_images.push(*key_image);
            }
            let mut indices = Vec::with_capacity(tx.prefix.outputs.len());
            for (out_index, output) in tx.prefix.outputs.iter().enumerate() {
                indices.push(
                    self.db
                        .append_output(output.amount, *tx_hash, out_index as u64)?,
                );
            }
            self.db.put_tx(tx.clone(), height, indices)?;
        }

        validator::verify_ring_signature_jobs(signature_jobs, cancel)?;

        ensure!(
            cumulative_size <= self.current_block_size_limit,
            Error::ConsensusInvalid("block exceeds the size limit")
        );

        let base_reward = reward::get_block_reward(
            self.coin.as_ref(),
            self.current_block_size_median,
            cumulative_size,
            parent.already_generated_coins,
        )?;
        let expected = base_reward
            .checked_add(fees)
            .ok_or(Error::ConsensusInvalid("reward overflows"))?;
        let miner_paid = block
            .miner_tx
            .output_amount()
            .ok_or(Error::ConsensusInvalid("miner outputs overflow"))?;
        ensure!(
            miner_paid == expected,
            Error::ConsensusInvalid("miner transaction pays the wrong amount")
        );

        let miner_hash = block.miner_tx.get_hash();
        ensure!(
            self.db.get_tx(&miner_hash).is_none(),
            Error::ConsensusInvalid("miner transaction is already confirmed")
        );
        let mut miner_indices = Vec::with_capacity(block.miner_tx.prefix.outputs.len());
        for (out_index, output) in block.miner_tx.prefix.outputs.iter().enumerate() {
            miner_indices.push(
                self.db
                    .append_output(output.amount, miner_hash, out_index as u64)?,
            );
        }
        self.db
            .put_tx(block.miner_tx.clone(), height, miner_indices)?;

        let already_generated = parent
            .already_generated_coins
            .checked_add(base_reward)
            .ok_or(Error::ConsensusInvalid("coin supply overflows"))?;
        self.db.put_block(BlockExtended {
            block: block.clone(),
            height,
            block_size: cumulative_size,
            cumulative_difficulty: parent.cumulative_difficulty + difficulty,
            already_generated_coins: already_generated,
        })?;

        // Recorded last so a failure above leaves the schedule untouched
        self.hardfork
            .add(block.header.major_version, block.header.minor_version, height)?;

        Ok(spent_key_images)
    }

    fn attach_genesis(&mut self) -> Result<()> {
        let block = self.coin.genesis_block();
        let block_id = block.get_hash();
        self.db.begin_tx()?;
        let result = (|| -> Result<()> {
            let miner_hash = block.miner_tx.get_hash();
            let mut indices = Vec::with_capacity(block.miner_tx.prefix.outputs.len());
            for (out_index, output) in block.miner_tx.prefix.outputs.iter().enumerate() {
                indices.push(
                    self.db
                        .append_output(output.amount, miner_hash, out_index as u64)?,
                );
            }
            let generated = block
                .miner_tx
                .output_amount()
                .ok_or(Error::FormatInvalid("genesis reward overflows"))?;
            self.db.put_tx(block.miner_tx.clone(), 0, indices)?;
            self.db.put_block(BlockExtended {
                block: block.clone(),
                height: 0,
                block_size: block.blob_size(),
                cumulative_difficulty: 1,
                already_generated_coins: generated,
            })?;
            self.hardfork
                .add(block.header.major_version, block.header.minor_version, 0)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.db.commit()?;
                info!("Chain initialized with genesis block {}", block_id);
                Ok(())
            }
            Err(err) => {
                self.db.rollback()?;
                Err(err)
            }
        }
    }

    fn replay_hardfork(&mut self) -> Result<()> {
        for height in 0..self.db.height() {
            let bext = self.db.get_block_by_height(height).ok_or_else(|| {
                Error::Storage(blockchain_db::Error::Corruption(format!(
                    "missing block at height {}",
                    height
                )))
            })?;
            self.hardfork
                .add(
                    bext.block.header.major_version,
                    bext.block.header.minor_version,
                    height,
                )
                .map_err(|err| {
                    Error::Storage(blockchain_db::Error::Corruption(format!(
                        "stored chain contradicts the fork schedule: {}",
                        err
                    )))
                })?;
        }
        Ok(())
    }

    fn output_owner(&self, amount: u64, offset: u64) -> Result<Option<blockchain_db::TxEntry>> {
        match self.db.get_output(amount, offset) {
            None => Ok(None),
            Some((tx_hash, _)) => {
                let entry = self.db.get_tx(&tx_hash).ok_or_else(|| {
                    Error::Storage(blockchain_db::Error::Corruption(format!(
                        "output index references missing transaction {}",
                        tx_hash
                    )))
                })?;
                Ok(Some(entry))
            }
        }
    }

    fn last_timestamps(&self, count: usize) -> Vec<u64> {
        let height = self.db.height();
        let start = height.saturating_sub(count as u64);
        (start..height)
            .filter_map(|h| self.db.get_block_by_height(h))
            .map(|bext| bext.block.header.timestamp)
            .collect()
    }

    fn retarget_window(&self) -> (Vec<u64>, Vec<u128>) {
        let height = self.db.height();
        let start = height.saturating_sub(common::difficulty::DIFFICULTY_WINDOW as u64);
        let mut timestamps = Vec::new();
        let mut difficulties = Vec::new();
        for h in start..height {
            if let Some(bext) = self.db.get_block_by_height(h) {
                timestamps.push(bext.block.header.timestamp);
                difficulties.push(bext.cumulative_difficulty);
            }
        }
        (timestamps, difficulties)
    }

    pub(crate) fn update_size_limit(&mut self) {
        let height = self.db.height();
        let start = height.saturating_sub(CRYPTONOTE_REWARD_BLOCKS_WINDOW as u64);
        let mut sizes: Vec<u64> = (start..height)
            .filter_map(|h| self.db.get_block_by_height(h))
            .map(|bext| bext.block_size)
            .collect();
        let median = std::cmp::max(
            validator::median(&mut sizes),
            CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE,
        );
        self.current_block_size_median = median;
        self.current_block_size_limit = median * 2;
    }

    fn prune_alternative_chains(&mut self) {
        let current = self.current_height();
        let before = self.alternative_chains.len();
        self.alternative_chains
            .retain(|_, entry| entry.seen_at_height + ALTERNATIVE_BLOCK_KEEPALIVE_WINDOW >= current);
        if self.alternative_chains.len() != before {
            debug!(
                "Pruned {} stale alternative blocks",
                before - self.alternative_chains.len()
            );
        }
    }
}
