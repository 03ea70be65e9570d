use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode or decode record: {0}")]
    Codec(#[from] bincode::Error),
    #[error("epoch {0} has no blocks")]
    EmptyEpoch(u64),
    #[error("epoch {0} is already stored")]
    DuplicateEpoch(u64),
    #[error("stored key of {0} bytes is not an epoch")]
    InvalidKey(usize),
    #[error("store listener stopped")]
    Closed,
    #[error("unexpected store response: {0}")]
    UnexpectedResponse(String),
}
