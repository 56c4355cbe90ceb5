//! # Cryptonote Core
//!
//! This crate is a convenience wrapper around all the components of the
//! node core (the blockchain and the transaction pool) under the lock
//! discipline the rest of the daemon relies on: one writer to the chain
//! at a time, any number of readers, and the pool lock always taken
//! after the chain lock.

use std::sync::{Arc, Mutex, RwLock};

use log::{debug, warn};

use blockchain::{BlockAddResult, Blockchain, ChainEvent};
use coin_specific::Nocturne;
use common::{Block, CancelToken, GetHash, Transaction};
use crypto::{Hash256, PublicKey};
use hardfork::HardFork;
use txpool::TXPool;

mod config;
pub mod protocol;

pub use config::Config;
pub use protocol::CryptonoteP2PMessage;

/// Cap on transactions considered for one block template
const BLOCK_TEMPLATE_TX_LIMIT: usize = 1000;

/// The assembled node core
#[derive(Clone)]
pub struct CryptonoteCore {
    blockchain: Arc<RwLock<Blockchain>>,
    txpool: Arc<Mutex<TXPool>>,
}

impl CryptonoteCore {
    /// Builds the core for the Nocturne mainnet
    pub fn new(config: &Config) -> Result<Self, blockchain::Error> {
        let hardfork = HardFork::new(1);
        let blockchain = Blockchain::new(&config.blockchain_config, Arc::new(Nocturne), hardfork)?;
        Ok(Self::with_blockchain(blockchain))
    }

    /// Wraps an existing chain, for tests and tools
    pub fn with_blockchain(blockchain: Blockchain) -> Self {
        CryptonoteCore {
            blockchain: Arc::new(RwLock::new(blockchain)),
            txpool: Arc::new(Mutex::new(TXPool::new())),
        }
    }

    /// Shared handle to the chain
    pub fn blockchain(&self) -> Arc<RwLock<Blockchain>> {
        self.blockchain.clone()
    }

    /// Shared handle to the transaction pool
    pub fn txpool(&self) -> Arc<Mutex<TXPool>> {
        self.txpool.clone()
    }

    /// Ingests a block, resolving its transactions from the payload and
    /// the pool, and keeps the pool consistent with the outcome
    pub fn handle_incoming_block(
        &self,
        block: Block,
        txs: Vec<Transaction>,
        cancel: &CancelToken,
    ) -> Result<BlockAddResult, blockchain::Error> {
        let mut chain = self.blockchain.write().expect("chain lock poisoned");
        let mut pool = self.txpool.lock().expect("pool lock poisoned");

        // Fill payload gaps from the pool
        let mut provided = txs;
        for tx_hash in &block.tx_hashes {
            if !provided.iter().any(|tx| tx.get_hash() == *tx_hash) {
                if let Some(tx) = pool.get_tx(tx_hash) {
                    provided.push(tx);
                }
            }
        }

        let result = chain.add_block(block, provided, cancel)?;
        for event in chain.take_events() {
            match event {
                ChainEvent::BlockAttached {
                    tx_hashes,
                    spent_key_images,
                    ..
                } => pool.on_block_added(&tx_hashes, &spent_key_images),
                ChainEvent::BlockDetached { txs } => pool.on_block_removed(txs, &chain),
            }
        }
        Ok(result)
    }

    /// Relays an unconfirmed transaction into the pool
    pub fn handle_incoming_tx(
        &self,
        tx: Transaction,
        cancel: &CancelToken,
    ) -> Result<(), txpool::Error> {
        let chain = self.blockchain.read().expect("chain lock poisoned");
        let mut pool = self.txpool.lock().expect("pool lock poisoned");
        pool.add_tx(tx, &chain, cancel)
    }

    /// Assembles a block template paying `target`
    pub fn create_block_template(&self, target: PublicKey) -> Result<Block, blockchain::Error> {
        let chain = self.blockchain.read().expect("chain lock poisoned");
        let pool = self.txpool.lock().expect("pool lock poisoned");
        let candidates = pool.take_for_block(chain.block_size_limit(), BLOCK_TEMPLATE_TX_LIMIT);
        chain.create_block_template(target, &candidates)
    }

    /// Maps one peer message to its response
    ///
    /// Ingestion failures are logged and answered with
    /// [`CryptonoteP2PMessage::Empty`]; the transport drops peers based
    /// on its own scoring, not on consensus errors
    pub fn handle_message(
        &self,
        message: CryptonoteP2PMessage,
        cancel: &CancelToken,
    ) -> CryptonoteP2PMessage {
        match message {
            CryptonoteP2PMessage::NewBlock(block, txs) => {
                match self.handle_incoming_block(*block, txs, cancel) {
                    Ok(result) => debug!("New block from peer: {:?}", result),
                    Err(err) => warn!("Peer block rejected: {}", err),
                }
                CryptonoteP2PMessage::Empty
            }
            CryptonoteP2PMessage::NewTransaction(tx) => {
                if let Err(err) = self.handle_incoming_tx(*tx, cancel) {
                    debug!("Peer transaction rejected: {}", err);
                }
                CryptonoteP2PMessage::Empty
            }
            CryptonoteP2PMessage::RequestChain(peer_history) => {
                let chain = self.blockchain.read().expect("chain lock poisoned");
                match chain.locate_fork(&peer_history) {
                    Ok((start_height, total_height, hashes)) => {
                        CryptonoteP2PMessage::ChainEntry {
                            start_height,
                            total_height,
                            hashes,
                        }
                    }
                    Err(err) => {
                        debug!("Could not locate a fork point: {}", err);
                        CryptonoteP2PMessage::Empty
                    }
                }
            }
            CryptonoteP2PMessage::RequestGetObjects { blocks, txs } => {
                self.handle_get_objects(&blocks, &txs)
            }
            CryptonoteP2PMessage::Empty
            | CryptonoteP2PMessage::ChainEntry { .. }
            | CryptonoteP2PMessage::Objects { .. } => CryptonoteP2PMessage::Empty,
        }
    }

    fn handle_get_objects(
        &self,
        block_ids: &[Hash256],
        tx_ids: &[Hash256],
    ) -> CryptonoteP2PMessage {
        let chain = self.blockchain.read().expect("chain lock poisoned");
        let pool = self.txpool.lock().expect("pool lock poisoned");

        let mut blocks = Vec::new();
        let mut txs = Vec::new();
        let mut missing = Vec::new();

        for block_id in block_ids {
            match chain.get_block_by_hash(block_id) {
                None => missing.push(*block_id),
                Some(block) => {
                    let resolved: Vec<Transaction> = block
                        .tx_hashes
                        .iter()
                        .filter_map(|tx_hash| {
                            chain.get_tx(tx_hash).or_else(|| pool.get_tx(tx_hash))
                        })
                        .collect();
                    blocks.push((block, resolved));
                }
            }
        }
        for tx_id in tx_ids {
            match chain.get_tx(tx_id).or_else(|| pool.get_tx(tx_id)) {
                None => missing.push(*tx_id),
                Some(tx) => txs.push(tx),
            }
        }

        CryptonoteP2PMessage::Objects {
            blocks,
            txs,
            missing,
        }
    }
}
