use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StakeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("snapshot format version {found} does not match supported version {required}")]
    VersionMismatch { found: u32, required: u32 },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cryptography error: {0}")]
    Crypto(String),
    #[error("transaction rejected: {0}")]
    Transaction(String),
    #[error("block {0} is not known yet")]
    BlockMissing(u64),
    #[error("target block {target_height} is beyond the {history_depth} blocks of list history")]
    StaleHistory {
        target_height: u64,
        history_depth: usize,
    },
    #[error("committee mismatch: {0}")]
    CommitteeMismatch(String),
    #[error("stake processing storages have already been initialized")]
    AlreadyInitialized,
    #[error("update handler failed: {0}")]
    Handler(String),
}

pub type StakeResult<T> = Result<T, StakeError>;
