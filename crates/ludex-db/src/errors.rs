use thiserror::Error;

/// Errors from a storage driver.
///
/// The sync loop treats these as transient: the enclosing transaction is
/// rolled back and the block is retried from the last committed
/// checkpoint.
#[derive(Debug, Error)]
pub enum DbError {
    /// `begin_transaction` while one is already open.
    #[error("transaction already open")]
    TransactionAlreadyOpen,

    /// A write or commit/rollback without an open transaction.
    #[error("no transaction is open")]
    NoTransaction,

    /// Stored bytes failed to decode.
    #[error("corrupted entry: {0}")]
    CorruptedData(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure.
    #[error("{0}")]
    Other(String),
}

pub type DbResult<T> = Result<T, DbError>;
