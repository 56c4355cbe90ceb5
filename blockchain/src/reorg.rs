//! Alternative branches and chain reorganization
//!
//! Blocks that do not extend the tip are parked on alternative branches
//! with header-level validation only. When a branch outweighs the main
//! chain, the chain detaches back to the fork point and replays the
//! branch with full validation; any failure restores the prior chain
//! exactly.

use log::{info, warn};

use blockchain_db::BlockExtended;
use common::{Block, CancelToken, GetHash, Transaction};
use crypto::Hash256;
use ensure_macro::ensure;

use crate::config::BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW;
use crate::error::{Error, Result};
use crate::{
    adjusted_time, validator, AltChainEntry, BlockAddResult, Blockchain, ChainEvent,
    DbVersionSource,
};

impl Blockchain {
    pub(crate) fn add_block_to_alternative(
        &mut self,
        block_id: Hash256,
        block: Block,
        txs: Vec<Transaction>,
        cancel: &CancelToken,
    ) -> Result<BlockAddResult> {
        let now = adjusted_time();

        let (parent_height, parent_cumulative_difficulty, parent_generated) =
            if let Some(alt) = self.alternative_chains.get(&block.header.prev_id) {
                (
                    alt.height,
                    alt.cumulative_difficulty,
                    alt.already_generated_coins,
                )
            } else if let Some(main) = self.db.get_block_by_hash(&block.header.prev_id) {
                (
                    main.height,
                    main.cumulative_difficulty,
                    main.already_generated_coins,
                )
            } else {
                return Err(Error::UnknownParent(block.header.prev_id));
            };
        let height = parent_height + 1;

        let (branch, split_height) = self.collect_branch(block.header.prev_id)?;
        ensure!(
            self.checkpoints.is_alternative_block_allowed(split_height + 1),
            Error::ConsensusInvalid("branch forks below a checkpoint")
        );

        // The version is judged against the schedule as it stood at this
        // height
        let required = self.hardfork.get(height);
        ensure!(
            block.header.major_version != 0
                && block.header.major_version >= required
                && block.header.major_version <= self.hardfork.ideal_version(),
            Error::VersionDisallowed(hardfork::Error::VersionRejected {
                version: block.header.major_version,
                required,
            })
        );

        let timestamps = self.alt_timestamps(&branch, split_height);
        validator::check_block_timestamp(&timestamps, &block, now)?;

        // Structural checks only; ring signatures are not verified until
        // a switch is attempted
        validator::prevalidate_miner_tx(&block, height)?;
        for (tx_hash, tx) in block.tx_hashes.iter().zip(&txs) {
            ensure!(!cancel.is_cancelled(), Error::Cancelled);
            ensure!(
                tx.get_hash() == *tx_hash,
                Error::FormatInvalid("transaction does not match its hash")
            );
            ensure!(
                !tx.is_coinbase(),
                Error::FormatInvalid("unexpected extra miner transaction")
            );
            validator::check_tx_syntax(tx)?;
        }

        let difficulty = self.alt_difficulty(&branch, split_height);
        let pow_hash = self.coin.pow_hash(&block.get_hash_blob());
        validator::check_proof_of_work(&pow_hash, difficulty)?;

        let block_size = block.blob_size() + txs.iter().map(Transaction::blob_size).sum::<u64>();
        let cumulative_difficulty = parent_cumulative_difficulty + difficulty;

        info!(
            "Block {} added as alternative at height {}, branch difficulty {}",
            block_id, height, cumulative_difficulty
        );
        self.alternative_chains.insert(
            block_id,
            AltChainEntry {
                block,
                txs,
                height,
                cumulative_difficulty,
                already_generated_coins: parent_generated,
                seen_at_height: self.current_height(),
            },
        );

        if cumulative_difficulty > self.current_cumulative_difficulty() {
            let mut full_branch = branch;
            full_branch.push(block_id);
            self.try_switch(full_branch, split_height, cancel)?;
            Ok(BlockAddResult::AddedToAltAndSwitched)
        } else {
            Ok(BlockAddResult::AddedToAlt)
        }
    }

    /// Walks parent links through the alternative index until the main
    /// chain is reached
    ///
    /// # Returns
    /// The branch's alternative block ids oldest first (empty when the
    /// parent is on the main chain) and the main chain height of the
    /// fork point
    fn collect_branch(&self, parent_id: Hash256) -> Result<(Vec<Hash256>, u64)> {
        let mut branch = Vec::new();
        let mut cursor = parent_id;
        loop {
            if let Some(entry) = self.alternative_chains.get(&cursor) {
                branch.push(cursor);
                cursor = entry.block.header.prev_id;
            } else if let Some(main) = self.db.get_block_by_hash(&cursor) {
                branch.reverse();
                return Ok((branch, main.height));
            } else {
                return Err(Error::UnknownParent(cursor));
            }
        }
    }

    /// Timestamps of the last window positions ending at the branch tip,
    /// completed from the main chain below the fork point
    fn alt_timestamps(&self, branch: &[Hash256], split_height: u64) -> Vec<u64> {
        let need = BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW;
        let mut timestamps = Vec::with_capacity(need);

        let main_needed = need.saturating_sub(branch.len());
        if main_needed > 0 {
            let start = (split_height + 1).saturating_sub(main_needed as u64);
            for h in start..=split_height {
                if let Some(bext) = self.db.get_block_by_height(h) {
                    timestamps.push(bext.block.header.timestamp);
                }
            }
        }
        for id in branch.iter().skip(branch.len().saturating_sub(need)) {
            if let Some(entry) = self.alternative_chains.get(id) {
                timestamps.push(entry.block.header.timestamp);
            }
        }
        timestamps
    }

    /// Difficulty required of the next block on an alternative branch,
    /// retargeted over the branch's own history plus the shared prefix
    fn alt_difficulty(&self, branch: &[Hash256], split_height: u64) -> u128 {
        let window = common::difficulty::DIFFICULTY_WINDOW;
        let mut timestamps = Vec::new();
        let mut difficulties = Vec::new();

        let main_needed = window.saturating_sub(branch.len());
        if main_needed > 0 {
            let start = (split_height + 1).saturating_sub(main_needed as u64);
            for h in start..=split_height {
                if let Some(bext) = self.db.get_block_by_height(h) {
                    timestamps.push(bext.block.header.timestamp);
                    difficulties.push(bext.cumulative_difficulty);
                }
            }
        }
        for id in branch.iter().skip(branch.len().saturating_sub(window)) {
            if let Some(entry) = self.alternative_chains.get(id) {
                timestamps.push(entry.block.header.timestamp);
                difficulties.push(entry.cumulative_difficulty);
            }
        }
        common::difficulty::next_difficulty(
            &timestamps,
            &difficulties,
            common::difficulty::DIFFICULTY_TARGET,
        )
    }

    /// Switches the main chain to the given alternative branch
    ///
    /// Either the switch completes and the branch tip becomes the chain
    /// tip, or every index, the fork schedule and the size limit window
    /// are restored to their prior state and the offending branch block
    /// is marked invalid
    pub(crate) fn try_switch(
        &mut self,
        branch: Vec<Hash256>,
        split_height: u64,
        cancel: &CancelToken,
    ) -> Result<()> {
        let original_tip = self.current_height();
        info!(
            "Reorganize attempt at height {}: branch of {} blocks against main chain tip {}",
            split_height + 1,
            branch.len(),
            original_tip
        );

        self.db.begin_tx()?;
        match self.switch_inner(&branch, split_height, cancel) {
            Ok((detached, attach_events)) => {
                self.db.commit()?;

                // The orphaned main chain segment becomes an alternative
                // branch, subject to the usual retention
                let seen_at_height = self.current_height();
                let mut detach_events = Vec::with_capacity(detached.len());
                for (bext, txs) in detached {
                    detach_events.push(ChainEvent::BlockDetached { txs: txs.clone() });
                    self.alternative_chains.insert(
                        bext.block.get_hash(),
                        AltChainEntry {
                            height: bext.height,
                            cumulative_difficulty: bext.cumulative_difficulty,
                            already_generated_coins: bext.already_generated_coins,
                            block: bext.block,
                            txs,
                            seen_at_height,
                        },
                    );
                }
                for id in &branch {
                    self.alternative_chains.remove(id);
                }

                self.events.extend(detach_events);
                self.events.extend(attach_events);
                self.update_size_limit();
                info!(
                    "Reorganize success: new tip {} at height {}",
                    self.tip_hash(),
                    self.current_height()
                );
                Ok(())
            }
            Err(err) => {
                self.db.rollback()?;
                self.hardfork
                    .reorganize_from(&DbVersionSource(&*self.db), original_tip);
                self.update_size_limit();
                warn!("Reorganize failed, main chain restored: {}", err);
                Err(err)
            }
        }
    }

    /// The body of a switch, run inside one storage transaction
    ///
    /// # Returns
    /// The detached main chain blocks tip-first, and the attach events
    /// for the pool
    fn switch_inner(
        &mut self,
        branch: &[Hash256],
        split_height: u64,
        cancel: &CancelToken,
    ) -> Result<(Vec<(BlockExtended, Vec<Transaction>)>, Vec<ChainEvent>)> {
        let mut detached = Vec::new();
        while self.current_height() > split_height {
            ensure!(!cancel.is_cancelled(), Error::Cancelled);
            detached.push(self.pop_top_block()?);
        }
        self.hardfork
            .reorganize_from(&DbVersionSource(&*self.db), split_height);
        self.update_size_limit();

        let mut attach_events = Vec::with_capacity(branch.len());
        for id in branch {
            let entry = self.alternative_chains.get(id).cloned().ok_or_else(|| {
                Error::Storage(blockchain_db::Error::Corruption(format!(
                    "branch block {} vanished from the alternative index",
                    id
                )))
            })?;
            match self.connect_block(&entry.block, &entry.txs, cancel) {
                Ok(spent_key_images) => {
                    attach_events.push(ChainEvent::BlockAttached {
                        block_hash: *id,
                        tx_hashes: entry.block.tx_hashes.clone(),
                        spent_key_images,
                    });
                    self.update_size_limit();
                }
                Err(err) => {
                    if err.taints_block() {
                        warn!("Branch block {} failed full validation: {}", id, err);
                        self.alternative_chains.remove(id);
                        self.invalid_blocks.insert(*id);
                    }
                    return Err(err);
                }
            }
        }

        Ok((detached, attach_events))
    }

    /// Detaches the tip block, rewinding every index it touched
    ///
    /// # Returns
    /// The detached block record and its regular transactions
    pub(crate) fn pop_top_block(&mut self) -> Result<(BlockExtended, Vec<Transaction>)> {
        let tip_height = self.current_height();
        let bext = self.db.delete_block(tip_height)?;

        // Indices were appended body-then-miner; rewind in reverse
        let miner_hash = bext.block.miner_tx.get_hash();
        let miner_entry = self.db.delete_tx(&miner_hash)?;
        self.rewind_outputs(&miner_hash, &miner_entry.tx)?;

        let mut txs = Vec::with_capacity(bext.block.tx_hashes.len());
        for tx_hash in bext.block.tx_hashes.iter().rev() {
            let entry = self.db.delete_tx(tx_hash)?;
            self.rewind_outputs(tx_hash, &entry.tx)?;
            for key_image in entry.tx.key_images() {
                self.db.remove_key_image(key_image)?;
            }
            txs.push(entry.tx);
        }
        txs.reverse();
        Ok((bext, txs))
    }

    fn rewind_outputs(&mut self, tx_hash: &Hash256, tx: &Transaction) -> Result<()> {
        for (out_index, output) in tx.prefix.outputs.iter().enumerate().rev() {
            let (popped_hash, popped_index) = self.db.pop_output(output.amount)?;
            if popped_hash != *tx_hash || popped_index != out_index as u64 {
                return Err(Error::Storage(blockchain_db::Error::Corruption(format!(
                    "output index does not rewind to transaction {}",
                    tx_hash
                ))));
            }
        }
        Ok(())
    }
}
