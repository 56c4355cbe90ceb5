/// Type alias for storage operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for storage operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a requested record is absent
    #[error("Record does not exist: {0}")]
    DoesNotExist(String),

    /// Returned when inserting a record that is already present
    #[error("Record already exists: {0}")]
    Exists(String),

    /// Returned when a mutation does not fit the store's invariants
    #[error("Invalid operation: {0}")]
    Invalid(String),

    /// Returned when committing or rolling back without an open transaction
    #[error("No write transaction is open")]
    NoTransaction,

    /// Returned when opening a transaction while one is in progress
    #[error("A write transaction is already open")]
    TransactionInProgress,

    /// Returned when stored records contradict each other
    #[error("Storage corruption: {0}")]
    Corruption(String),
}
