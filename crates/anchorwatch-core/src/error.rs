use bitcoin::BlockHash;

use crate::types::BlockHeight;

/// Failures talking to a JSON-RPC endpoint (node or wallet).
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC server error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("missing JSON-RPC batch item id={id}")]
    MissingBatchItem { id: u64 },
}

/// Violations of the block cache's chain invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("block does not extend cache tip: expected parent {expected}, found {found}")]
    InvalidChain { expected: BlockHash, found: BlockHash },

    #[error("block height does not follow cache tip: expected {expected}, found {found}")]
    HeightGap {
        expected: BlockHeight,
        found: BlockHeight,
    },

    #[error("block cache is empty")]
    EmptyCache,

    #[error("block cache capacity must be at least 1")]
    ZeroCapacity,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The base chain or wallet source could not be reached or answered with
    /// an error.
    #[error("source unavailable: {0}")]
    Rpc(#[from] RpcError),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),

    #[error("base chain has no blocks")]
    EmptyChain,

    #[error(transparent)]
    Cache(#[from] CacheError),
}
