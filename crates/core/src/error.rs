//! Centralized error types for the chainweb workspace.

use crate::types::ChainId;
use thiserror::Error;

/// Top-level error enum. Variants map to subsystems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainwebError {
    /// Malformed graph, chain count mismatch, missing adjacency target.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Node process spawn failure or nonzero exit.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Chain {0} not found in chainweb")]
    ChainNotFound(ChainId),

    #[error("Chain {0} is not running")]
    NotRunning(ChainId),

    #[error("Chain {trg} is not reachable from chain {src}")]
    Unreachable { src: ChainId, trg: ChainId },

    #[error("No log entry found at origin (chain {chain}, height {height}, tx {tx_index}, event {event_index})")]
    LogNotFound {
        chain: ChainId,
        height: u64,
        tx_index: u64,
        event_index: u64,
    },

    #[error("Expected exactly four topics at origin, but got {0}")]
    UnexpectedTopics(usize),

    #[error("SPV proof not available on chain {target} after {attempts} attempts (height {current}, required {required})")]
    SpvTimeout {
        target: ChainId,
        current: u64,
        required: u64,
        attempts: u32,
    },

    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    #[error("Mining error: {0}")]
    Mining(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ChainwebResult<T> = Result<T, ChainwebError>;
