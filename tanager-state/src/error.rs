use thiserror::Error;

/// Errors from the persistent stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested key is not present.
    #[error("not found")]
    NotFound,
    /// An insert collided with an existing key.
    #[error("already exists")]
    Exists,
    /// An underlying I/O failure. Fatal at the node level.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes failed to parse; the database is damaged.
    #[error("corrupt store: {0}")]
    Corrupt(&'static str),
    /// A transaction-lifecycle failure.
    #[error("transaction error: {0}")]
    Txn(#[from] TxnError),
}

/// Which transaction step failed.
#[derive(Error, Debug)]
pub enum TxnError {
    #[error("begin failed: a transaction is already open")]
    BeginFailed,
    #[error("commit failed: {0}")]
    CommitFailed(String),
    #[error("rollback failed: no open transaction")]
    RollbackFailed,
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> StoreError {
        match err {
            sled::Error::Io(io) => StoreError::Io(io),
            other => StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                other.to_string(),
            )),
        }
    }
}
