//! Chain fixtures for exercising consensus code in tests
//!
//! A trivially minable coin, a memory-backed chain builder, and helpers
//! to produce valid blocks and spends without a wallet.

use std::sync::Arc;

use blockchain_db::BlockchainMemDB;
use common::{
    write_extra, Block, BlockHeader, CancelToken, GetHash, TXExtra, TXIn, TXOut, TXOutTarget,
    Transaction,
};
use crypto::{Hash256, KeyPair, PublicKey};
use hardfork::HardFork;

use crate::config::CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW;
use crate::{reward, BlockAddResult, Blockchain, CoinDefinition, EmissionCurve};

/// Flat per-block reward of the test coin
pub const TEST_REWARD: u64 = 10_000_000;

/// A coin with Keccak proof of work and a flat emission; every hash
/// meets difficulty 1, so tests mine without searching nonces
pub struct TestCoin;

impl EmissionCurve for TestCoin {
    fn base_reward(&self, _already_generated_coins: u64) -> u64 {
        TEST_REWARD
    }
}

impl CoinDefinition for TestCoin {
    fn pow_hash(&self, blob: &[u8]) -> Hash256 {
        crypto::cn_fast_hash(blob)
    }

    fn genesis_block(&self) -> Block {
        let output_key = KeyPair::from(crypto::cn_fast_hash(b"test genesis output key"));

        let mut miner_tx = Transaction::default();
        miner_tx.prefix.version = 1;
        miner_tx.prefix.unlock_time = CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW;
        miner_tx.prefix.inputs.push(TXIn::Gen(0));
        miner_tx.prefix.outputs.push(TXOut {
            amount: TEST_REWARD,
            target: TXOutTarget::ToKey {
                key: output_key.public_key,
            },
        });

        Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 1,
                timestamp: 1000,
                prev_id: Hash256::null_hash(),
                nonce: 0,
            },
            miner_tx,
            tx_hashes: Vec::new(),
        }
    }
}

/// A fresh memory-backed chain holding only the genesis block
pub fn test_chain() -> Blockchain {
    test_chain_with_hardfork(HardFork::new(1))
}

/// A fresh chain with an explicit fork schedule
pub fn test_chain_with_hardfork(hardfork: HardFork) -> Blockchain {
    Blockchain::with_db(Box::new(BlockchainMemDB::new()), Arc::new(TestCoin), hardfork)
        .expect("test chain init")
}

/// Builds a valid block on an explicit parent
pub fn build_block_on(
    parent_hash: Hash256,
    parent_timestamp: u64,
    height: u64,
    miner_key: PublicKey,
    txs: &[Transaction],
    version: (u8, u8),
) -> Block {
    let fees = txs.iter().map(|tx| tx.fee().unwrap_or(0)).sum();
    let miner_tx =
        reward::construct_miner_tx(height, TEST_REWARD, fees, miner_key).expect("miner tx");
    Block {
        header: BlockHeader {
            major_version: version.0,
            minor_version: version.1,
            timestamp: parent_timestamp + common::difficulty::DIFFICULTY_TARGET,
            prev_id: parent_hash,
            nonce: 0,
        },
        miner_tx,
        tx_hashes: txs.iter().map(Transaction::get_hash).collect(),
    }
}

/// Builds a valid next block on the chain tip
pub fn next_block(chain: &Blockchain, miner_key: PublicKey, txs: &[Transaction]) -> Block {
    next_block_versioned(chain, miner_key, txs, (1, 1))
}

/// Builds a valid next block carrying an explicit version pair
pub fn next_block_versioned(
    chain: &Blockchain,
    miner_key: PublicKey,
    txs: &[Transaction],
    version: (u8, u8),
) -> Block {
    let parent = chain
        .get_block_by_height(chain.current_height())
        .expect("chain tip");
    build_block_on(
        chain.tip_hash(),
        parent.header.timestamp,
        chain.current_height() + 1,
        miner_key,
        txs,
        version,
    )
}

/// Mines `count` empty blocks, each rewarding a fresh keypair
///
/// # Returns
/// The miner keypairs, index-aligned with the new blocks
pub fn mine_blocks(chain: &mut Blockchain, count: u64) -> Vec<KeyPair> {
    (0..count)
        .map(|_| {
            let keypair = KeyPair::generate();
            let block = next_block(chain, keypair.public_key, &[]);
            let result = chain
                .add_block(block, Vec::new(), &CancelToken::new())
                .expect("mined block rejected");
            assert_eq!(result, BlockAddResult::AddedToMain);
            keypair
        })
        .collect()
}

/// Builds a ring-size-one transaction spending the miner output of the
/// block at `source_height`, owned by `owner`
pub fn spend_miner_output(
    chain: &Blockchain,
    owner: &KeyPair,
    source_height: u64,
    fee: u64,
) -> Transaction {
    let source_block = chain
        .get_block_by_height(source_height)
        .expect("source block");
    let miner_hash = source_block.miner_tx.get_hash();
    let global_index = chain
        .get_tx_output_indices(&miner_hash)
        .expect("miner tx indices")[0];
    let amount = source_block.miner_tx.prefix.outputs[0].amount;

    let key_image = crypto::generate_key_image(owner);
    let mut tx = Transaction::default();
    tx.prefix.version = 1;
    tx.prefix.inputs.push(TXIn::FromKey {
        amount,
        key_offsets: vec![global_index],
        key_image,
    });
    tx.prefix.outputs.push(TXOut {
        amount: amount - fee,
        target: TXOutTarget::ToKey {
            key: KeyPair::generate().public_key,
        },
    });
    tx.prefix.extra = write_extra(&[TXExtra::TxPublicKey(KeyPair::generate().public_key)]);

    let signatures = crypto::generate_ring_signature(
        &tx.prefix_hash(),
        &key_image,
        &[owner.public_key],
        &owner.secret_key,
        0,
    )
    .expect("ring signature");
    tx.signatures = vec![signatures];
    tx
}
