//! A memory pool of unconfirmed transactions
//!
//! Transactions are admitted only after passing the full validation
//! pass against the chain, and the pool tracks their key images so two
//! pool entries can never spend the same output. Selection for block
//! templates is fee-rate descending under a size cap.

use std::collections::HashMap;

use log::debug;

use blockchain::Blockchain;
use common::{CancelToken, GetHash, Transaction};
use crypto::{Hash256, KeyImage};
use ensure_macro::ensure;

type Result<T> = std::result::Result<T, Error>;

/// Error type for pool admission
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The transaction is already in the pool
    #[error("Transaction is already in the pool")]
    AlreadyKnown,

    /// A key image is already used by another pool transaction
    #[error("Key image is already used by pool transaction {0}")]
    DoubleSpend(Hash256),

    /// Miner transactions arrive in blocks, never on their own
    #[error("Miner transactions are not relayed")]
    CoinbaseNotAllowed,

    /// The chain-level validation pass rejected the transaction
    #[error(transparent)]
    Rejected(#[from] blockchain::Error),
}

struct PoolEntry {
    tx: Transaction,
    blob_size: u64,
    fee: u64,
    receive_time: u64,
}

/// The transaction memory pool
#[derive(Default)]
pub struct TXPool {
    transactions: HashMap<Hash256, PoolEntry>,
    spent_key_images: HashMap<KeyImage, Hash256>,
}

impl TXPool {
    /// Creates an empty pool
    pub fn new() -> Self {
        TXPool::default()
    }

    /// Number of transactions waiting in the pool
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// True if the pool holds no transactions
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// True if the pool holds the given transaction
    pub fn has_tx(&self, txid: &Hash256) -> bool {
        self.transactions.contains_key(txid)
    }

    /// Fetches a pool transaction by id
    pub fn get_tx(&self, txid: &Hash256) -> Option<Transaction> {
        self.transactions.get(txid).map(|entry| entry.tx.clone())
    }

    /// Removes and returns a pool transaction
    pub fn take_tx(&mut self, txid: &Hash256) -> Option<Transaction> {
        self.remove_entry(txid)
    }

    /// True if any pool transaction consumes the given key image
    pub fn contains_key_image(&self, key_image: &KeyImage) -> bool {
        self.spent_key_images.contains_key(key_image)
    }

    /// Every pool transaction, in no particular order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions
            .values()
            .map(|entry| entry.tx.clone())
            .collect()
    }

    /// Admits an unconfirmed transaction
    ///
    /// The transaction must pass the validator's syntactic and per-input
    /// checks against the chain, and none of its key images may collide
    /// with the chain or another pool entry.
    pub fn add_tx(
        &mut self,
        tx: Transaction,
        chain: &Blockchain,
        cancel: &CancelToken,
    ) -> Result<()> {
        let txid = tx.get_hash();
        ensure!(!self.transactions.contains_key(&txid), Error::AlreadyKnown);
        ensure!(!tx.is_coinbase(), Error::CoinbaseNotAllowed);

        for key_image in tx.key_images() {
            if let Some(owner) = self.spent_key_images.get(key_image) {
                return Err(Error::DoubleSpend(*owner));
            }
        }

        // Full validation against the chain: syntax, maturity, unlock
        // times, chain-level key images and every ring signature
        let fee = chain.check_tx(&tx, cancel)?;

        for key_image in tx.key_images() {
            self.spent_key_images.insert(*key_image, txid);
        }
        debug!("Transaction {} enters the pool, fee {}", txid, fee);
        self.transactions.insert(
            txid,
            PoolEntry {
                blob_size: tx.blob_size(),
                fee,
                receive_time: blockchain::adjusted_time(),
                tx,
            },
        );
        Ok(())
    }

    /// Selects transactions for a block template
    ///
    /// Ordered by fee rate descending with ties broken toward older
    /// entries; transactions that would burst the size or count caps are
    /// skipped. Selected transactions stay in the pool until a block
    /// confirms them
    pub fn take_for_block(&self, max_size_bytes: u64, max_count: usize) -> Vec<Transaction> {
        let mut candidates: Vec<&PoolEntry> = self.transactions.values().collect();
        candidates.sort_by(|a, b| {
            let a_rate = u128::from(a.fee) * u128::from(b.blob_size);
            let b_rate = u128::from(b.fee) * u128::from(a.blob_size);
            b_rate
                .cmp(&a_rate)
                .then_with(|| a.receive_time.cmp(&b.receive_time))
        });

        let mut total_size = 0;
        let mut selected = Vec::new();
        for entry in candidates {
            if selected.len() >= max_count {
                break;
            }
            if total_size + entry.blob_size > max_size_bytes {
                continue;
            }
            total_size += entry.blob_size;
            selected.push(entry.tx.clone());
        }
        selected
    }

    /// Reacts to a block joining the main chain
    ///
    /// Confirmed transactions leave the pool unconditionally, and any
    /// entry whose key image the block consumed is dropped as
    /// invalidated
    pub fn on_block_added(&mut self, tx_hashes: &[Hash256], spent_key_images: &[KeyImage]) {
        for txid in tx_hashes {
            self.remove_entry(txid);
        }
        for key_image in spent_key_images {
            if let Some(owner) = self.spent_key_images.get(key_image).copied() {
                debug!(
                    "Dropping pool transaction {} whose key image was spent on-chain",
                    owner
                );
                self.remove_entry(&owner);
            }
        }
    }

    /// Reacts to a block leaving the main chain
    ///
    /// Its transactions are readmitted when still valid against the
    /// rewound chain, otherwise dropped
    pub fn on_block_removed(&mut self, txs: Vec<Transaction>, chain: &Blockchain) {
        for tx in txs {
            let txid = tx.get_hash();
            if let Err(err) = self.add_tx(tx, chain, &CancelToken::new()) {
                debug!("Detached transaction {} not readmitted: {}", txid, err);
            }
        }
    }

    fn remove_entry(&mut self, txid: &Hash256) -> Option<Transaction> {
        let entry = self.transactions.remove(txid)?;
        for key_image in entry.tx.key_images() {
            self.spent_key_images.remove(key_image);
        }
        Some(entry.tx)
    }
}

#[cfg(test)]
mod tests {
    use blockchain::test_definitions::*;
    use crypto::KeyPair;

    use super::*;

    fn cancel() -> CancelToken {
        CancelToken::new()
    }

    #[test]
    fn admits_valid_transactions() {
        let mut chain = test_chain();
        let miners = mine_blocks(&mut chain, 12);
        let mut pool = TXPool::new();

        let tx = spend_miner_output(&chain, &miners[0], 1, 100);
        let txid = tx.get_hash();
        pool.add_tx(tx, &chain, &cancel()).unwrap();

        assert!(pool.has_tx(&txid));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn rejects_pool_level_double_spends() {
        let mut chain = test_chain();
        let miners = mine_blocks(&mut chain, 12);
        let mut pool = TXPool::new();

        let first = spend_miner_output(&chain, &miners[0], 1, 100);
        let first_id = first.get_hash();
        pool.add_tx(first, &chain, &cancel()).unwrap();

        // Same output, same key image, different fee
        let second = spend_miner_output(&chain, &miners[0], 1, 500);
        match pool.add_tx(second, &chain, &cancel()) {
            Err(Error::DoubleSpend(owner)) => assert_eq!(owner, first_id),
            other => panic!("expected a double spend rejection, got {:?}", other.err()),
        }
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn rejects_chain_level_double_spends() {
        let mut chain = test_chain();
        let miners = mine_blocks(&mut chain, 12);
        let mut pool = TXPool::new();

        // Confirm a spend on-chain first
        let spent = spend_miner_output(&chain, &miners[0], 1, 100);
        let block = next_block(&chain, KeyPair::generate().public_key, &[spent.clone()]);
        chain.add_block(block, vec![spent], &cancel()).unwrap();

        let conflicting = spend_miner_output(&chain, &miners[0], 1, 500);
        assert!(matches!(
            pool.add_tx(conflicting, &chain, &cancel()),
            Err(Error::Rejected(blockchain::Error::DoubleSpend))
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn rejects_coinbase_and_duplicates() {
        let mut chain = test_chain();
        let miners = mine_blocks(&mut chain, 12);
        let mut pool = TXPool::new();

        let coinbase = chain.get_block_by_height(1).unwrap().miner_tx;
        assert!(matches!(
            pool.add_tx(coinbase, &chain, &cancel()),
            Err(Error::CoinbaseNotAllowed)
        ));

        let tx = spend_miner_output(&chain, &miners[0], 1, 100);
        pool.add_tx(tx.clone(), &chain, &cancel()).unwrap();
        assert!(matches!(
            pool.add_tx(tx, &chain, &cancel()),
            Err(Error::AlreadyKnown)
        ));
    }

    #[test]
    fn selection_is_fee_rate_descending_under_a_cap() {
        let mut chain = test_chain();
        let miners = mine_blocks(&mut chain, 13);
        let mut pool = TXPool::new();

        let cheap = spend_miner_output(&chain, &miners[0], 1, 100);
        let rich = spend_miner_output(&chain, &miners[1], 2, 5_000);
        let mid = spend_miner_output(&chain, &miners[2], 3, 1_000);
        for tx in &[&cheap, &rich, &mid] {
            pool.add_tx((*tx).clone(), &chain, &cancel()).unwrap();
        }

        let selected = pool.take_for_block(1_000_000, 10);
        assert_eq!(
            selected
                .iter()
                .map(GetHash::get_hash)
                .collect::<Vec<_>>(),
            vec![rich.get_hash(), mid.get_hash(), cheap.get_hash()]
        );

        // The count cap bites first
        assert_eq!(pool.take_for_block(1_000_000, 2).len(), 2);

        // A tight size cap drops everything
        assert!(pool.take_for_block(10, 10).is_empty());

        // Selection does not consume the pool
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn block_attachment_clears_confirmed_and_conflicting_entries() {
        let mut chain = test_chain();
        let miners = mine_blocks(&mut chain, 12);
        let mut pool = TXPool::new();

        let confirmed = spend_miner_output(&chain, &miners[0], 1, 100);
        let conflicting = spend_miner_output(&chain, &miners[1], 2, 100);
        pool.add_tx(confirmed.clone(), &chain, &cancel()).unwrap();
        pool.add_tx(conflicting.clone(), &chain, &cancel()).unwrap();

        // The block confirms `confirmed` and a different spend of the
        // output `conflicting` wants
        let competing = spend_miner_output(&chain, &miners[1], 2, 9_000);
        let block = next_block(
            &chain,
            KeyPair::generate().public_key,
            &[confirmed.clone(), competing.clone()],
        );
        chain
            .add_block(block, vec![confirmed, competing], &cancel())
            .unwrap();

        for event in chain.take_events() {
            if let blockchain::ChainEvent::BlockAttached {
                tx_hashes,
                spent_key_images,
                ..
            } = event
            {
                pool.on_block_added(&tx_hashes, &spent_key_images);
            }
        }
        assert!(pool.is_empty());
        assert!(!pool.contains_key_image(&crypto::generate_key_image(&miners[1])));
    }

    #[test]
    fn detached_transactions_are_readmitted_when_still_valid() {
        let mut chain = test_chain();
        let miners = mine_blocks(&mut chain, 12);
        let mut pool = TXPool::new();

        let spend = spend_miner_output(&chain, &miners[0], 1, 100);
        let txid = spend.get_hash();
        let block = next_block(&chain, KeyPair::generate().public_key, &[spend.clone()]);
        chain.add_block(block, vec![spend.clone()], &cancel()).unwrap();

        // Simulate the reorganizer detaching the block
        pool.on_block_removed(vec![spend], &chain);
        // Still spendable against the current chain? The block that
        // confirmed it is still attached, so the key image conflicts and
        // the transaction is dropped
        assert!(pool.is_empty());

        // A transaction whose block really is gone is readmitted: build
        // an unconfirmed spend and hand it straight back
        let fresh = spend_miner_output(&chain, &miners[1], 2, 100);
        pool.on_block_removed(vec![fresh.clone()], &chain);
        assert!(pool.has_tx(&fresh.get_hash()));
        assert!(!pool.has_tx(&txid));
    }
}
