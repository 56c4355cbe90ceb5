use std::collections::{BTreeMap, HashMap, HashSet};

use common::{GetHash, Transaction};
use crypto::{Hash256, KeyImage};

use crate::error::{Error, Result};
use crate::{BlockExtended, BlockchainDB, TxEntry};

#[derive(Clone, Default)]
struct State {
    blocks: Vec<BlockExtended>,
    block_index: HashMap<Hash256, u64>,
    transactions: HashMap<Hash256, TxEntry>,
    outputs: BTreeMap<u64, Vec<(Hash256, u64)>>,
    key_images: HashSet<KeyImage>,
}

/// In-memory reference driver
///
/// The write transaction is a snapshot of the whole state taken at
/// `begin_tx` and restored on `rollback`. Reads performed inside a
/// transaction observe the uncommitted mutations, which is what the
/// chain's validation passes rely on.
#[derive(Default)]
pub struct BlockchainMemDB {
    state: State,
    snapshot: Option<State>,
}

impl BlockchainMemDB {
    /// Creates an empty in-memory store
    pub fn new() -> BlockchainMemDB {
        BlockchainMemDB::default()
    }
}

impl BlockchainDB for BlockchainMemDB {
    fn begin_tx(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::TransactionInProgress);
        }
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot.take().ok_or(Error::NoTransaction)?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.state = self.snapshot.take().ok_or(Error::NoTransaction)?;
        Ok(())
    }

    fn put_block(&mut self, block: BlockExtended) -> Result<()> {
        let next_height = self.state.blocks.len() as u64;
        if block.height != next_height {
            return Err(Error::Invalid(format!(
                "block height {} does not extend the chain at {}",
                block.height, next_height
            )));
        }
        let block_id = block.block.get_hash();
        if self.state.block_index.contains_key(&block_id) {
            return Err(Error::Exists(format!("block {}", block_id)));
        }
        self.state.block_index.insert(block_id, block.height);
        self.state.blocks.push(block);
        Ok(())
    }

    fn delete_block(&mut self, height: u64) -> Result<BlockExtended> {
        let tip_height = match self.state.blocks.len() as u64 {
            0 => return Err(Error::DoesNotExist("tip block".into())),
            len => len - 1,
        };
        if height != tip_height {
            return Err(Error::Invalid(format!(
                "cannot delete block {} below the tip {}",
                height, tip_height
            )));
        }
        let block = self.state.blocks.pop().ok_or_else(|| {
            Error::Corruption("block table emptied while holding the write lock".into())
        })?;
        self.state.block_index.remove(&block.block.get_hash());
        Ok(block)
    }

    fn get_block_by_height(&self, height: u64) -> Option<BlockExtended> {
        self.state.blocks.get(height as usize).cloned()
    }

    fn get_block_by_hash(&self, hash: &Hash256) -> Option<BlockExtended> {
        let height = self.state.block_index.get(hash)?;
        self.get_block_by_height(*height)
    }

    fn height(&self) -> u64 {
        self.state.blocks.len() as u64
    }

    fn tip_hash(&self) -> Option<Hash256> {
        self.state.blocks.last().map(|block| block.block.get_hash())
    }

    fn cumulative_difficulty_at(&self, height: u64) -> Option<u128> {
        self.state
            .blocks
            .get(height as usize)
            .map(|block| block.cumulative_difficulty)
    }

    fn put_tx(
        &mut self,
        tx: Transaction,
        block_height: u64,
        global_output_indices: Vec<u64>,
    ) -> Result<()> {
        let txid = tx.get_hash();
        if self.state.transactions.contains_key(&txid) {
            return Err(Error::Exists(format!("transaction {}", txid)));
        }
        self.state.transactions.insert(
            txid,
            TxEntry {
                tx,
                block_height,
                global_output_indices,
            },
        );
        Ok(())
    }

    fn delete_tx(&mut self, tx_hash: &Hash256) -> Result<TxEntry> {
        self.state
            .transactions
            .remove(tx_hash)
            .ok_or_else(|| Error::DoesNotExist(format!("transaction {}", tx_hash)))
    }

    fn get_tx(&self, tx_hash: &Hash256) -> Option<TxEntry> {
        self.state.transactions.get(tx_hash).cloned()
    }

    fn append_output(&mut self, amount: u64, tx_hash: Hash256, out_index: u64) -> Result<u64> {
        let entries = self.state.outputs.entry(amount).or_default();
        entries.push((tx_hash, out_index));
        Ok(entries.len() as u64 - 1)
    }

    fn pop_output(&mut self, amount: u64) -> Result<(Hash256, u64)> {
        let entries = self
            .state
            .outputs
            .get_mut(&amount)
            .ok_or_else(|| Error::DoesNotExist(format!("outputs of amount {}", amount)))?;
        let entry = entries
            .pop()
            .ok_or_else(|| Error::DoesNotExist(format!("outputs of amount {}", amount)))?;
        if entries.is_empty() {
            self.state.outputs.remove(&amount);
        }
        Ok(entry)
    }

    fn get_output(&self, amount: u64, global_offset: u64) -> Option<(Hash256, u64)> {
        self.state
            .outputs
            .get(&amount)?
            .get(global_offset as usize)
            .copied()
    }

    fn num_outputs(&self, amount: u64) -> u64 {
        self.state
            .outputs
            .get(&amount)
            .map(|entries| entries.len() as u64)
            .unwrap_or(0)
    }

    fn insert_key_image(&mut self, key_image: KeyImage) -> Result<()> {
        if !self.state.key_images.insert(key_image) {
            return Err(Error::Exists(format!(
                "key image {}",
                hex::encode(key_image.as_bytes())
            )));
        }
        Ok(())
    }

    fn remove_key_image(&mut self, key_image: &KeyImage) -> Result<()> {
        if !self.state.key_images.remove(key_image) {
            return Err(Error::DoesNotExist(format!(
                "key image {}",
                hex::encode(key_image.as_bytes())
            )));
        }
        Ok(())
    }

    fn contains_key_image(&self, key_image: &KeyImage) -> bool {
        self.state.key_images.contains(key_image)
    }

    fn reset(&mut self) {
        self.state = State::default();
        self.snapshot = None;
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::{Block, BlockHeader, TXIn};

    use super::*;

    fn test_block(height: u64, cumulative_difficulty: u128) -> BlockExtended {
        let mut miner_tx = Transaction::default();
        miner_tx.prefix.inputs.push(TXIn::Gen(height));
        BlockExtended {
            block: Block {
                header: BlockHeader {
                    major_version: 1,
                    minor_version: 1,
                    timestamp: height * 120,
                    prev_id: Hash256::null_hash(),
                    nonce: 0,
                },
                miner_tx,
                tx_hashes: Vec::new(),
            },
            height,
            block_size: 128,
            cumulative_difficulty,
            already_generated_coins: height * 1000,
        }
    }

    #[test]
    fn stores_and_fetches_blocks() {
        let mut db = BlockchainMemDB::new();
        let block = test_block(0, 1);
        let block_id = block.block.get_hash();
        db.put_block(block).unwrap();

        assert_eq!(db.height(), 1);
        assert_eq!(db.tip_hash(), Some(block_id));
        assert_eq!(db.get_block_by_hash(&block_id).unwrap().height, 0);
        assert_eq!(db.cumulative_difficulty_at(0), Some(1));
    }

    #[test]
    fn rejects_non_extending_blocks() {
        let mut db = BlockchainMemDB::new();
        assert!(matches!(
            db.put_block(test_block(3, 1)),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn deletes_only_the_tip() {
        let mut db = BlockchainMemDB::new();
        db.put_block(test_block(0, 1)).unwrap();
        db.put_block(test_block(1, 2)).unwrap();

        assert!(matches!(db.delete_block(0), Err(Error::Invalid(_))));
        let popped = db.delete_block(1).unwrap();
        assert_eq!(popped.height, 1);
        assert_eq!(db.height(), 1);
    }

    #[test]
    fn output_index_is_a_stack_per_amount() {
        let mut db = BlockchainMemDB::new();
        let tx_a = crypto::cn_fast_hash(b"tx a");
        let tx_b = crypto::cn_fast_hash(b"tx b");

        assert_eq!(db.append_output(100, tx_a, 0).unwrap(), 0);
        assert_eq!(db.append_output(100, tx_b, 1).unwrap(), 1);
        assert_eq!(db.append_output(250, tx_b, 0).unwrap(), 0);

        assert_eq!(db.num_outputs(100), 2);
        assert_eq!(db.get_output(100, 1), Some((tx_b, 1)));
        assert_eq!(db.pop_output(100).unwrap(), (tx_b, 1));
        assert_eq!(db.pop_output(100).unwrap(), (tx_a, 0));
        assert!(db.pop_output(100).is_err());
        assert_eq!(db.num_outputs(250), 1);
    }

    #[test]
    fn key_images_are_unique() {
        let mut db = BlockchainMemDB::new();
        let key_image = crypto::generate_key_image(&crypto::KeyPair::generate());

        db.insert_key_image(key_image).unwrap();
        assert!(db.contains_key_image(&key_image));
        assert!(matches!(
            db.insert_key_image(key_image),
            Err(Error::Exists(_))
        ));
        db.remove_key_image(&key_image).unwrap();
        assert!(!db.contains_key_image(&key_image));
    }

    #[test]
    fn rollback_restores_the_snapshot() {
        let mut db = BlockchainMemDB::new();
        db.put_block(test_block(0, 1)).unwrap();

        db.begin_tx().unwrap();
        db.put_block(test_block(1, 2)).unwrap();
        db.insert_key_image(crypto::generate_key_image(&crypto::KeyPair::generate()))
            .unwrap();
        db.rollback().unwrap();

        assert_eq!(db.height(), 1);

        db.begin_tx().unwrap();
        db.put_block(test_block(1, 2)).unwrap();
        db.commit().unwrap();
        assert_eq!(db.height(), 2);
    }

    #[test]
    fn nested_transactions_are_rejected() {
        let mut db = BlockchainMemDB::new();
        db.begin_tx().unwrap();
        assert!(matches!(db.begin_tx(), Err(Error::TransactionInProgress)));
        db.commit().unwrap();
        assert!(matches!(db.commit(), Err(Error::NoTransaction)));
    }
}
