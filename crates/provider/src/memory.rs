//! In-process node model.
//!
//! [`MemoryNode`] keeps a height counter, a pending pool, code, storage and
//! logs in memory and answers the [`NodeRpc`] calls the coordinator makes.
//! Used by `--dry-run` and by the network tests.

use crate::contracts::{CHAIN_ID_BYTE_CODE, VERIFY_BYTE_CODE};
use crate::{ChainConfig, LaunchedNode, NodeBackend, NodeRpc};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::{ChainId, EventLog};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct NodeState {
    height: u64,
    automine: bool,
    /// Logs of each pending transaction, in submission order.
    pending: Vec<Vec<EventLog>>,
    logs: Vec<EventLog>,
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, U256), B256>,
    blocks_mined: u64,
    offline: bool,
}

/// A single simulated chain node.
#[derive(Debug)]
pub struct MemoryNode {
    chain: ChainId,
    latency: Duration,
    state: Mutex<NodeState>,
}

impl MemoryNode {
    pub fn new(chain: ChainId) -> Self {
        Self {
            chain,
            latency: Duration::ZERO,
            state: Mutex::new(NodeState {
                automine: true,
                ..NodeState::default()
            }),
        }
    }

    /// Delays every RPC answer, widening race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> ChainwebResult<MutexGuard<'_, NodeState>> {
        self.state
            .lock()
            .map_err(|_| ChainwebError::Internal(format!("node {} state poisoned", self.chain)))
    }

    async fn rpc_state(&self) -> ChainwebResult<MutexGuard<'_, NodeState>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let state = self.state()?;
        if state.offline {
            return Err(ChainwebError::Rpc(format!("node {} is offline", self.chain)));
        }
        Ok(state)
    }

    /// Adds a transaction emitting `logs` to the pending pool.
    ///
    /// Mined right away when node-level automine is on. Returns the index the
    /// transaction will have in its block.
    pub fn submit_transaction(&self, logs: Vec<EventLog>) -> ChainwebResult<u64> {
        let mut state = self.state()?;
        let tx_index = state.pending.len() as u64;
        state.pending.push(logs);
        if state.automine {
            seal_block(&mut state);
        }
        Ok(tx_index)
    }

    pub fn height(&self) -> ChainwebResult<u64> {
        Ok(self.state()?.height)
    }

    /// Total number of `mine_block` calls served.
    pub fn blocks_mined(&self) -> ChainwebResult<u64> {
        Ok(self.state()?.blocks_mined)
    }

    pub fn automine_enabled(&self) -> ChainwebResult<bool> {
        Ok(self.state()?.automine)
    }

    pub fn code_at(&self, address: &Address) -> ChainwebResult<Option<Bytes>> {
        Ok(self.state()?.code.get(address).cloned())
    }

    /// Makes every subsequent RPC call fail.
    pub fn set_offline(&self, offline: bool) -> ChainwebResult<()> {
        self.state()?.offline = offline;
        Ok(())
    }
}

fn seal_block(state: &mut NodeState) {
    state.height += 1;
    let height = state.height;
    let mut log_index = 0u64;
    for (tx_index, tx_logs) in std::mem::take(&mut state.pending).into_iter().enumerate() {
        for mut log in tx_logs {
            log.block_number = Some(height);
            log.transaction_index = Some(tx_index as u64);
            log.log_index = Some(log_index);
            log_index += 1;
            state.logs.push(log);
        }
    }
}

fn storage_word(state: &NodeState, address: Address, slot: U256) -> B256 {
    state
        .storage
        .get(&(address, slot))
        .copied()
        .unwrap_or_default()
}

#[async_trait]
impl NodeRpc for MemoryNode {
    async fn block_number(&self) -> ChainwebResult<u64> {
        Ok(self.rpc_state().await?.height)
    }

    async fn mine_block(&self) -> ChainwebResult<()> {
        let mut state = self.rpc_state().await?;
        seal_block(&mut state);
        state.blocks_mined += 1;
        Ok(())
    }

    async fn set_automine(&self, enabled: bool) -> ChainwebResult<()> {
        self.rpc_state().await?.automine = enabled;
        Ok(())
    }

    async fn pending_transaction_count(&self) -> ChainwebResult<u64> {
        Ok(self.rpc_state().await?.pending.len() as u64)
    }

    async fn set_code(&self, address: Address, code: Bytes) -> ChainwebResult<()> {
        self.rpc_state().await?.code.insert(address, code);
        Ok(())
    }

    async fn set_storage_at(
        &self,
        address: Address,
        slot: U256,
        value: B256,
    ) -> ChainwebResult<()> {
        self.rpc_state().await?.storage.insert((address, slot), value);
        Ok(())
    }

    async fn logs_at(&self, height: u64) -> ChainwebResult<Vec<EventLog>> {
        Ok(self
            .rpc_state()
            .await?
            .logs
            .iter()
            .filter(|l| l.block_number == Some(height))
            .cloned()
            .collect())
    }

    /// Interprets the two system contracts; any other code returns empty data.
    async fn call(&self, to: Address, data: Bytes) -> ChainwebResult<Bytes> {
        let state = self.rpc_state().await?;
        let Some(code) = state.code.get(&to) else {
            return Ok(Bytes::new());
        };

        if *code == CHAIN_ID_BYTE_CODE {
            let word = storage_word(&state, to, U256::ZERO);
            return Ok(Bytes::copy_from_slice(&word[28..]));
        }

        if *code == VERIFY_BYTE_CODE {
            if data.len() < 32 {
                return Err(ChainwebError::Rpc("execution reverted".into()));
            }
            let (hash, payload) = data.split_at(32);
            if keccak256(payload).as_slice() != hash {
                return Err(ChainwebError::Rpc("execution reverted".into()));
            }
            return Ok(Bytes::copy_from_slice(payload));
        }

        Ok(Bytes::new())
    }
}

/// Launches one fresh [`MemoryNode`] per chain.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    latency: Duration,
    nodes: Mutex<BTreeMap<ChainId, Arc<MemoryNode>>>,
    failing: Mutex<HashSet<ChainId>>,
    launches: Mutex<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// The node most recently launched for `chain`.
    pub fn node(&self, chain: ChainId) -> Option<Arc<MemoryNode>> {
        self.nodes.lock().ok()?.get(&chain).cloned()
    }

    /// Makes the next launches of `chain` fail like a crashed spawn.
    pub fn fail_launch(&self, chain: ChainId) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(chain);
        }
    }

    /// Total successful launches so far.
    pub fn launches(&self) -> u64 {
        self.launches.lock().map(|n| *n).unwrap_or_default()
    }
}

#[async_trait]
impl NodeBackend for MemoryBackend {
    async fn launch(&self, chain: &ChainConfig) -> ChainwebResult<LaunchedNode> {
        let cid = chain.chain_id;
        let fails = self
            .failing
            .lock()
            .map(|f| f.contains(&cid))
            .unwrap_or(false);
        if fails {
            return Err(ChainwebError::Lifecycle(format!(
                "node for chain {cid} failed with code 1"
            )));
        }

        let node = Arc::new(MemoryNode::new(cid).with_latency(self.latency));
        self.nodes
            .lock()
            .map_err(|_| ChainwebError::Internal("memory backend poisoned".into()))?
            .insert(cid, node.clone());
        if let Ok(mut n) = self.launches.lock() {
            *n += 1;
        }

        tracing::debug!(chain = %cid, "launched in-memory node");

        Ok(LaunchedNode {
            rpc: node,
            process: None,
        })
    }
}
