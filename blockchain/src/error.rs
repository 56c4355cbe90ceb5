use crypto::Hash256;

/// Type alias for blockchain operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy surfaced by chain and validation operations
///
/// The variants drive caching policy: `FormatInvalid` and
/// `ConsensusInvalid` blocks are remembered so re-validation can be
/// short-circuited, while `VersionDisallowed` is not, since a rejected
/// version can become acceptable again after a reorganization.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The block or transaction is already present in an index
    #[error("Already known")]
    AlreadyKnown,

    /// The block's parent is in no index; the caller must fetch ancestors
    #[error("Parent block {0} is not known")]
    UnknownParent(Hash256),

    /// The item cannot be deserialized or violates structural rules
    #[error("Structurally invalid: {0}")]
    FormatInvalid(&'static str),

    /// A signature, proof-of-work or accounting rule failed
    #[error("Consensus rule violated: {0}")]
    ConsensusInvalid(&'static str),

    /// The hard fork schedule rejects the block's version
    #[error(transparent)]
    VersionDisallowed(#[from] hardfork::Error),

    /// A key image was consumed twice
    #[error("Key image already spent")]
    DoubleSpend,

    /// A transaction referenced by a block was not supplied and is not
    /// in any index
    #[error("Transaction {0} is not available")]
    MissingTransaction(Hash256),

    /// There are not enough mature outputs of an amount to build a ring
    #[error("Not enough mixable outputs of amount {amount}: requested {requested}, have {available}")]
    NotEnoughOutputs {
        /// The ring amount requested
        amount: u64,
        /// How many decoys were asked for
        requested: u64,
        /// How many mature outputs exist
        available: u64,
    },

    /// The operation observed its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// The storage backend failed; no state was changed and the
    /// operation is safe to retry
    #[error("Storage failure: {0}")]
    Storage(#[from] blockchain_db::Error),
}

impl Error {
    /// True for failures that mark a block as permanently invalid
    pub fn taints_block(&self) -> bool {
        matches!(
            self,
            Error::FormatInvalid(_)
                | Error::ConsensusInvalid(_)
                | Error::DoubleSpend
                | Error::NotEnoughOutputs { .. }
        )
    }
}
