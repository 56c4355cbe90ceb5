use serde::{Deserialize, Serialize};

use common::{Block, Transaction};
use crypto::Hash256;

/// P2P protocol messages consumed and produced by the core
///
/// The transport layer moves these across the wire; the core only maps
/// requests to responses
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum CryptonoteP2PMessage {
    /// Placeholder for when there is no message
    Empty,

    /// A new block was mined, with the transactions it confirms
    NewBlock(Box<Block>, Vec<Transaction>),

    /// A new unconfirmed transaction is being relayed
    NewTransaction(Box<Transaction>),

    /// A peer asks where our chains diverge, sending its short history
    RequestChain(Vec<Hash256>),

    /// Answer to [`CryptonoteP2PMessage::RequestChain`]: main chain
    /// hashes walking up from the last shared block
    ChainEntry {
        /// Height of the first hash in `hashes`
        start_height: u64,
        /// Our chain length
        total_height: u64,
        /// Consecutive main chain hashes from `start_height`
        hashes: Vec<Hash256>,
    },

    /// A peer asks for full blocks and transactions by hash
    RequestGetObjects {
        /// Block ids wanted
        blocks: Vec<Hash256>,
        /// Transaction ids wanted
        txs: Vec<Hash256>,
    },

    /// Answer to [`CryptonoteP2PMessage::RequestGetObjects`]
    Objects {
        /// Found blocks, each with its resolved transactions
        blocks: Vec<(Block, Vec<Transaction>)>,
        /// Found standalone transactions
        txs: Vec<Transaction>,
        /// Ids we know nothing about
        missing: Vec<Hash256>,
    },
}
