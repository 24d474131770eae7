use primitive_types::U256;
use thiserror::Error;

use crate::store::StoreError;
use crate::vm::TxError;

/// A block broke a consensus rule. Each variant names the first rule that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("block hash does not match block contents")]
    HashMismatch,
    #[error("block timestamp {timestamp} is before head timestamp {head}")]
    BadTimestamp { timestamp: u64, head: u64 },
    #[error("block height is {got}, expected {expected}")]
    BadHeight { expected: u64, got: u64 },
    #[error("block difficulty {got} does not match chain difficulty {expected}")]
    DifficultyMismatch { expected: U256, got: U256 },
    #[error("block hash does not meet difficulty requirements")]
    InsufficientWork,
    #[error("previous hash does not match hash of the latest block")]
    ForkMismatch,
    #[error("block has no transactions")]
    EmptyBlock,
    #[error("bad coinbase: {0}")]
    BadCoinbase(String),
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error("transaction {position} rejected: {source}")]
    Transaction {
        position: usize,
        #[source]
        source: TxError,
    },
    #[error("chain is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChainError {
    /// Rejections the submitter can act on, as opposed to node-side failures.
    pub fn is_rejection(&self) -> bool {
        match self {
            ChainError::Consensus(_) => true,
            ChainError::Transaction { source, .. } => !matches!(source, TxError::Store(_)),
            ChainError::NotInitialized | ChainError::Store(_) => false,
        }
    }
}
