//! Reference-counted network handle.
//!
//! Several independent consumers (test suites, the trigger listener, the
//! CLI) share one [`ChainwebNetwork`]. The first `acquire` starts it, the
//! last `release` stops it.

use crate::network::ChainwebNetwork;
use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::ChainId;
use chainweb_provider::NodeRpc;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Default)]
struct Usage {
    users: usize,
    running: bool,
}

#[derive(Debug)]
pub struct SharedNetwork {
    network: Arc<ChainwebNetwork>,
    usage: AsyncMutex<Usage>,
    active: Mutex<ChainId>,
}

impl SharedNetwork {
    /// The active chain starts out as the lowest chain id.
    pub fn new(network: Arc<ChainwebNetwork>) -> ChainwebResult<Self> {
        let first = network
            .chain_ids()
            .first()
            .copied()
            .ok_or_else(|| ChainwebError::Config("Network has no chains".into()))?;
        Ok(Self {
            network,
            usage: AsyncMutex::new(Usage::default()),
            active: Mutex::new(first),
        })
    }

    pub fn network(&self) -> &Arc<ChainwebNetwork> {
        &self.network
    }

    /// Registers a user, starting the network for the first one.
    ///
    /// Concurrent callers wait until the start completed.
    pub async fn acquire(&self) -> ChainwebResult<()> {
        let mut usage = self.usage.lock().await;
        if !usage.running {
            self.network.start().await?;
            usage.running = true;
        }
        usage.users += 1;
        tracing::debug!(users = usage.users, "network acquired");
        Ok(())
    }

    /// Unregisters a user, stopping the network after the last one.
    pub async fn release(&self) {
        let mut usage = self.usage.lock().await;
        if usage.users == 0 {
            tracing::warn!("network released more often than acquired");
            return;
        }
        usage.users -= 1;
        tracing::debug!(users = usage.users, "network released");
        if usage.users == 0 && usage.running {
            self.network.stop().await;
            usage.running = false;
        }
    }

    /// Stops the network regardless of users. Only the first call has an
    /// effect until the network is acquired again.
    pub async fn force_stop(&self) {
        let mut usage = self.usage.lock().await;
        if !usage.running {
            return;
        }
        tracing::info!(users = usage.users, "force stopping network");
        self.network.stop().await;
        usage.running = false;
        usage.users = 0;
    }

    pub async fn users(&self) -> usize {
        self.usage.lock().await.users
    }

    pub async fn is_running(&self) -> bool {
        self.usage.lock().await.running
    }

    /// Makes `cid` the chain returned by [`Self::active_rpc`].
    pub fn switch_chain(&self, cid: ChainId) -> ChainwebResult<()> {
        self.network.chain(cid)?;
        let mut active = self
            .active
            .lock()
            .map_err(|_| ChainwebError::Internal("active chain poisoned".into()))?;
        *active = cid;
        tracing::info!(chain = %cid, "switched active chain");
        Ok(())
    }

    pub fn active_chain(&self) -> ChainwebResult<ChainId> {
        self.active
            .lock()
            .map(|a| *a)
            .map_err(|_| ChainwebError::Internal("active chain poisoned".into()))
    }

    pub fn active_rpc(&self) -> ChainwebResult<Arc<dyn NodeRpc>> {
        self.network.rpc(self.active_chain()?)
    }
}
