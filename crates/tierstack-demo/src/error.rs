use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the posts store. All of them surface as HTTP 500.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open posts database: {0}")]
    Open(String),

    /// Transaction, table, read or write failure inside redb.
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("post {id} is not valid JSON: {message}")]
    Corrupt { id: u64, message: String },
}
