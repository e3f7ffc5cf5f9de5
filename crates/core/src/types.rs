//! Domain types shared by every chainweb crate.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Chain id
// ---------------------------------------------------------------------------

/// Identifies one chain inside a chainweb graph.
///
/// Always numeric. String forms (JSON map keys, URL path segments, env lists)
/// go through [`FromStr`] so the two representations never mix.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChainId(pub u32);

impl ChainId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ChainId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl FromStr for ChainId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(Self)
    }
}

// ---------------------------------------------------------------------------
// Event logs
// ---------------------------------------------------------------------------

/// A log entry as returned by a node's log query, reduced to the fields the
/// SPV synthesizer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u64>,
    pub log_index: Option<u64>,
    /// Set when the log was dropped by a reorg.
    pub removed: bool,
}

// ---------------------------------------------------------------------------
// Cross-chain messages
// ---------------------------------------------------------------------------

/// Coordinates of a single cross-chain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub source_chain_id: ChainId,
    pub origin_contract_address: Address,
    pub block_height: u64,
    pub transaction_index: u64,
    pub event_index: u64,
}

impl Origin {
    /// Captures the origin of `log`, the `event_index`-th log of its
    /// transaction on `chain`.
    ///
    /// Returns `None` for pending logs, which carry no block number or
    /// transaction index yet.
    pub fn from_receipt_log(chain: ChainId, log: &EventLog, event_index: u64) -> Option<Self> {
        Some(Self {
            source_chain_id: chain,
            origin_contract_address: log.address,
            block_height: log.block_number?,
            transaction_index: log.transaction_index?,
            event_index,
        })
    }
}

/// The message carried by an SPV proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainMessage {
    pub target_chain_id: ChainId,
    pub target_contract_address: Address,
    pub operation_type: u64,
    pub payload: Bytes,
    pub origin: Origin,
}
