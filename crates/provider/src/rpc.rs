//! JSON-RPC node backed by alloy-rs.

use crate::NodeRpc;
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{Address, Bytes, B256, U256, U64};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types::Filter;
use async_trait::async_trait;
use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::EventLog;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use url::Url;

/// Talks to one chain's node over HTTP JSON-RPC.
///
/// Heights are always read through the raw `eth_blockNumber` call. The
/// provider's cached block-number accessor was observed to lag behind
/// freshly mined blocks.
///
/// ```ignore
/// let node = RpcNode::connect("http://127.0.0.1:8545".parse()?, Duration::from_millis(100))?;
/// ```
pub struct RpcNode {
    provider: DynProvider,
    rpc_url: Url,
}

impl RpcNode {
    pub fn connect(rpc_url: Url, poll_interval: Duration) -> ChainwebResult<Self> {
        if rpc_url.host_str().is_none() {
            return Err(ChainwebError::Config(format!("RPC URL {rpc_url} has no host")));
        }

        let client = RpcClient::new_http(rpc_url.clone()).with_poll_interval(poll_interval);
        let provider = ProviderBuilder::new().connect_client(client);

        tracing::info!(rpc_url = %rpc_url, "connected");

        Ok(Self {
            provider: provider.erased(),
            rpc_url,
        })
    }

    /// Returns the underlying `DynProvider` for callers that need the full
    /// alloy API (deploying contracts, sending transactions).
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    async fn raw<P, R>(&self, method: &'static str, params: P) -> ChainwebResult<R>
    where
        P: Serialize + Clone + Debug + Send + Sync + Unpin,
        R: DeserializeOwned + Debug + Send + Sync + Unpin + 'static,
    {
        self.provider
            .raw_request(method.into(), params)
            .await
            .map_err(|e| ChainwebError::Rpc(format!("{method} on {} failed: {e}", self.rpc_url)))
    }
}

const NO_PARAMS: [(); 0] = [];

#[async_trait]
impl NodeRpc for RpcNode {
    async fn block_number(&self) -> ChainwebResult<u64> {
        let height: U64 = self.raw("eth_blockNumber", NO_PARAMS).await?;
        Ok(height.to::<u64>())
    }

    async fn mine_block(&self) -> ChainwebResult<()> {
        let _: serde_json::Value = self.raw("evm_mine", NO_PARAMS).await?;
        Ok(())
    }

    async fn set_automine(&self, enabled: bool) -> ChainwebResult<()> {
        let _: serde_json::Value = self.raw("evm_setAutomine", (enabled,)).await?;
        Ok(())
    }

    async fn pending_transaction_count(&self) -> ChainwebResult<u64> {
        let count: Option<U64> = self
            .raw(
                "eth_getBlockTransactionCountByNumber",
                (BlockNumberOrTag::Pending,),
            )
            .await?;
        Ok(count.map_or(0, |c| c.to::<u64>()))
    }

    async fn set_code(&self, address: Address, code: Bytes) -> ChainwebResult<()> {
        let _: serde_json::Value = self.raw("hardhat_setCode", (address, code)).await?;
        Ok(())
    }

    async fn set_storage_at(
        &self,
        address: Address,
        slot: U256,
        value: B256,
    ) -> ChainwebResult<()> {
        let _: serde_json::Value = self
            .raw("hardhat_setStorageAt", (address, slot, value))
            .await?;
        Ok(())
    }

    async fn logs_at(&self, height: u64) -> ChainwebResult<Vec<EventLog>> {
        tracing::debug!(height, rpc_url = %self.rpc_url, "fetching logs");

        let filter = Filter::new().from_block(height).to_block(height);
        let logs = self.provider.get_logs(&filter).await.map_err(|e| {
            ChainwebError::Rpc(format!("Failed to fetch logs at height {height}: {e}"))
        })?;

        Ok(logs
            .into_iter()
            .map(|log| EventLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
                block_number: log.block_number,
                transaction_index: log.transaction_index,
                log_index: log.log_index,
                removed: log.removed,
            })
            .collect())
    }

    async fn call(&self, to: Address, data: Bytes) -> ChainwebResult<Bytes> {
        let request = serde_json::json!({ "to": to, "data": data });
        self.raw("eth_call", (request, BlockNumberOrTag::Latest))
            .await
    }
}
