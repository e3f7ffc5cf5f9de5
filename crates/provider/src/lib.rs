//! Node RPC abstraction, node process lifecycle, and system contracts.

pub mod contracts;
pub mod memory;
pub mod process;
pub mod rpc;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::{ChainId, EventLog};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

pub use memory::{MemoryBackend, MemoryNode};
pub use process::{NodeCommand, NodeLogging, NodeProcess, ProcessBackend};
pub use rpc::RpcNode;

/// The node RPC surface one chain needs.
///
/// Implemented over JSON-RPC by [`RpcNode`] and in-process by [`MemoryNode`].
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Current height from the raw `eth_blockNumber` primitive.
    async fn block_number(&self) -> ChainwebResult<u64>;

    /// Produces one block (`evm_mine`).
    async fn mine_block(&self) -> ChainwebResult<()>;

    /// Toggles the node's native automatic block production.
    async fn set_automine(&self, enabled: bool) -> ChainwebResult<()>;

    /// Transaction count of the `pending` block.
    async fn pending_transaction_count(&self) -> ChainwebResult<u64>;

    async fn set_code(&self, address: Address, code: Bytes) -> ChainwebResult<()>;

    async fn set_storage_at(&self, address: Address, slot: U256, value: B256)
        -> ChainwebResult<()>;

    /// All logs of the block at `height`.
    async fn logs_at(&self, height: u64) -> ChainwebResult<Vec<EventLog>>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> ChainwebResult<Bytes>;
}

/// Where and how one chain's node is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// EVM `chainId` the node reports (distinct from the chainweb id).
    pub evm_chain_id: u64,
}

/// EVM chain ids are `EVM_CHAIN_ID_BASE + chainweb chain id`.
pub const EVM_CHAIN_ID_BASE: u64 = 676_000;

fn default_host() -> String {
    "127.0.0.1".into()
}

impl ChainConfig {
    pub fn new(chain_id: ChainId, port: u16) -> Self {
        Self {
            chain_id,
            host: default_host(),
            port,
            evm_chain_id: EVM_CHAIN_ID_BASE + u64::from(chain_id.as_u32()),
        }
    }

    pub fn rpc_url(&self) -> ChainwebResult<Url> {
        let raw = format!("http://{}:{}", self.host, self.port);
        Url::parse(&raw).map_err(|e| {
            ChainwebError::Config(format!("Invalid RPC URL {raw} for chain {}: {e}", self.chain_id))
        })
    }
}

/// A started node: its RPC handle plus the owned process, if any.
pub struct LaunchedNode {
    pub rpc: Arc<dyn NodeRpc>,
    pub process: Option<NodeProcess>,
}

/// Starts nodes for chains.
#[async_trait]
pub trait NodeBackend: Send + Sync {
    async fn launch(&self, chain: &ChainConfig) -> ChainwebResult<LaunchedNode>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_config() {
        let c = ChainConfig::new(ChainId(3), 8548);
        assert_eq!(c.evm_chain_id, 676_003);
        assert_eq!(c.rpc_url().unwrap().as_str(), "http://127.0.0.1:8548/");
    }

    #[test]
    fn bad_host_is_config_error() {
        let mut c = ChainConfig::new(ChainId(0), 8545);
        c.host = "not a host".into();
        assert!(matches!(c.rpc_url(), Err(ChainwebError::Config(_))));
    }
}
