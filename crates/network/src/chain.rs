//! One chain of the network: node lifecycle, automine loop, and recursive
//! catch-up mining.
//!
//! Lifecycle: `Configured -> Started -> Stopped`, restartable from
//! `Stopped`. While started, a background task polls the node's pending
//! pool and mines when it is non-empty.

use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::{ChainId, EventLog};
use chainweb_provider::{contracts, ChainConfig, LaunchedNode, NodeBackend, NodeProcess, NodeRpc};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Upper bound on rounds in which an adjacent chain fell behind again
/// between its catch-up and this chain's lock. Only concurrent mining
/// elsewhere causes that; lag alone is always caught up.
const MAX_CATCH_UP_ROUNDS: usize = 64;

enum ChainState {
    Configured,
    Starting,
    Started(Running),
    Stopped,
}

struct Running {
    rpc: Arc<dyn NodeRpc>,
    process: Option<NodeProcess>,
    automine: Option<JoinHandle<()>>,
}

impl Running {
    /// Fails once the node process exited with a nonzero code.
    fn check_alive(&self) -> ChainwebResult<()> {
        match &self.process {
            Some(process) => process.check_alive(),
            None => Ok(()),
        }
    }
}

pub struct Chain {
    config: ChainConfig,
    automine_interval: Duration,
    adjacents: OnceLock<Vec<Weak<Chain>>>,
    state: Mutex<ChainState>,
    /// Serializes block production on this chain.
    mine_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("chain_id", &self.config.chain_id)
            .field("port", &self.config.port)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Chain {
    pub fn new(config: ChainConfig, automine_interval: Duration) -> Self {
        Self {
            config,
            automine_interval,
            adjacents: OnceLock::new(),
            state: Mutex::new(ChainState::Configured),
            mine_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[inline]
    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Wires the adjacent chains. Can only be done once.
    pub(crate) fn set_adjacents(&self, adjacents: Vec<Weak<Chain>>) -> ChainwebResult<()> {
        self.adjacents.set(adjacents).map_err(|_| {
            ChainwebError::Internal(format!("Adjacents of chain {} already set", self.chain_id()))
        })
    }

    pub fn adjacent_ids(&self) -> Vec<ChainId> {
        self.adjacents
            .get()
            .map(|adjs| {
                adjs.iter()
                    .filter_map(Weak::upgrade)
                    .map(|c| c.chain_id())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn adjacents(&self) -> ChainwebResult<Vec<Arc<Chain>>> {
        let Some(adjacents) = self.adjacents.get() else {
            return Ok(Vec::new());
        };
        adjacents
            .iter()
            .map(|weak| {
                weak.upgrade().ok_or_else(|| {
                    ChainwebError::Internal(format!(
                        "Adjacent chain of {} was dropped",
                        self.chain_id()
                    ))
                })
            })
            .collect()
    }

    fn lock_state(&self) -> ChainwebResult<MutexGuard<'_, ChainState>> {
        self.state.lock().map_err(|_| {
            ChainwebError::Internal(format!("State of chain {} poisoned", self.chain_id()))
        })
    }

    /// Started, whether or not the node is still alive.
    pub(crate) fn is_started(&self) -> bool {
        self.lock_state()
            .map(|s| matches!(*s, ChainState::Started(_)))
            .unwrap_or(false)
    }

    /// Started and the node has not failed.
    pub fn is_running(&self) -> bool {
        self.lock_state()
            .map(|s| matches!(&*s, ChainState::Started(r) if r.check_alive().is_ok()))
            .unwrap_or(false)
    }

    /// RPC handle of the running node. A node that exited with a nonzero
    /// code is a `Lifecycle` error until the chain is stopped.
    pub fn rpc(&self) -> ChainwebResult<Arc<dyn NodeRpc>> {
        match &*self.lock_state()? {
            ChainState::Started(running) => {
                running.check_alive()?;
                Ok(running.rpc.clone())
            }
            _ => Err(ChainwebError::NotRunning(self.chain_id())),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Launches the node, installs the system contracts, turns node-level
    /// automine off and starts the pending-transaction loop.
    pub async fn start(self: &Arc<Self>, backend: &dyn NodeBackend) -> ChainwebResult<()> {
        let was_configured = self.begin_start()?;

        match self.launch(backend).await {
            Ok(running) => {
                *self.lock_state()? = ChainState::Started(running);
                self.enable_automine();
                tracing::info!(chain = %self.chain_id(), port = self.config.port, "chain started");
                Ok(())
            }
            Err(e) => {
                *self.lock_state()? = if was_configured {
                    ChainState::Configured
                } else {
                    ChainState::Stopped
                };
                Err(e)
            }
        }
    }

    fn begin_start(&self) -> ChainwebResult<bool> {
        let mut state = self.lock_state()?;
        let was_configured = match *state {
            ChainState::Configured => true,
            ChainState::Stopped => false,
            ChainState::Starting | ChainState::Started(_) => {
                return Err(ChainwebError::Lifecycle(format!(
                    "Chain {} is already started",
                    self.chain_id()
                )))
            }
        };
        *state = ChainState::Starting;
        Ok(was_configured)
    }

    async fn launch(&self, backend: &dyn NodeBackend) -> ChainwebResult<Running> {
        let cid = self.chain_id();
        let LaunchedNode { rpc, process } = backend.launch(&self.config).await?;

        let init = async {
            contracts::install(rpc.as_ref(), cid).await?;
            rpc.set_automine(false).await
        };
        if let Err(e) = init.await {
            tracing::error!(chain = %cid, error = %e, "failed to initialize node");
            if let Some(process) = process {
                process.kill().await;
            }
            return Err(e);
        }

        Ok(Running {
            rpc,
            process,
            automine: None,
        })
    }

    /// Stops automine, drops the connection and kills the node.
    ///
    /// Logs an error when the chain is not running.
    pub async fn stop(&self) {
        let Some(mut running) = self.take_running() else {
            tracing::error!(chain = %self.chain_id(), "stop called on a chain that is not running");
            return;
        };

        if let Some(automine) = running.automine.take() {
            automine.abort();
        }
        drop(running.rpc);
        if let Some(process) = running.process {
            process.kill().await;
        }

        tracing::info!(chain = %self.chain_id(), "chain stopped");
    }

    fn take_running(&self) -> Option<Running> {
        let mut state = self.lock_state().ok()?;
        match std::mem::replace(&mut *state, ChainState::Stopped) {
            ChainState::Started(running) => Some(running),
            other => {
                *state = other;
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Automine
    // -----------------------------------------------------------------------

    /// Starts the pending-transaction loop. Returns `false` if the chain is
    /// not running or the loop is already active.
    pub fn enable_automine(self: &Arc<Self>) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let ChainState::Started(running) = &mut *state else {
            return false;
        };
        if running.automine.is_some() {
            return false;
        }

        let weak = Arc::downgrade(self);
        let interval = self.automine_interval;
        running.automine = Some(tokio::spawn(automine_loop(weak, interval)));
        true
    }

    /// Returns `false` if the loop was not active.
    pub fn disable_automine(&self) -> bool {
        let handle = match self.state.lock() {
            Ok(mut state) => match &mut *state {
                ChainState::Started(running) => running.automine.take(),
                _ => None,
            },
            Err(_) => None,
        };
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether the pending-transaction loop is still polling.
    pub fn automine_enabled(&self) -> bool {
        self.state
            .lock()
            .map(|s| {
                matches!(&*s, ChainState::Started(r)
                    if r.automine.as_ref().is_some_and(|h| !h.is_finished()))
            })
            .unwrap_or(false)
    }

    pub async fn has_pending(&self) -> ChainwebResult<bool> {
        Ok(self.rpc()?.pending_transaction_count().await? > 0)
    }

    /// One automine tick: mines when the pending pool is non-empty.
    pub async fn run_pending(&self) -> ChainwebResult<()> {
        if self.has_pending().await? {
            tracing::debug!(chain = %self.chain_id(), "pending transactions, mining");
            self.mine().await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Node queries
    // -----------------------------------------------------------------------

    /// Height read through the raw block-number call.
    pub async fn block_number(&self) -> ChainwebResult<u64> {
        self.rpc()?.block_number().await
    }

    /// Produces one block, without catching up adjacent chains.
    pub async fn make_block(&self) -> ChainwebResult<()> {
        self.rpc()?.mine_block().await?;
        tracing::debug!(chain = %self.chain_id(), "block produced");
        Ok(())
    }

    pub async fn logs_at(&self, height: u64) -> ChainwebResult<Vec<EventLog>> {
        self.rpc()?.logs_at(height).await
    }

    /// Reads the chain id back from the chain-id system contract.
    pub async fn chainweb_chain_id(&self) -> ChainwebResult<ChainId> {
        let ret = self
            .rpc()?
            .call(*contracts::CHAIN_ID_ADDRESS, Default::default())
            .await?;
        contracts::decode_chain_id(&ret)
    }

    // -----------------------------------------------------------------------
    // Mining
    // -----------------------------------------------------------------------

    /// Produces one block after every adjacent chain has caught up to this
    /// chain's height.
    ///
    /// Lagging adjacents are raised to this chain's height first, recursively,
    /// in adjacency order. The block itself is produced under this chain's
    /// lock, after re-checking that no adjacent chain is behind. The lock is
    /// never held while waiting on another chain's lock.
    pub async fn mine(&self) -> ChainwebResult<()> {
        let mut ancestors = HashSet::new();
        self.mine_on_path(&mut ancestors, None).await
    }

    /// With `until`, mining stops as soon as this chain is at least that
    /// high, so concurrent catch-ups of the same chain do not stack blocks.
    fn mine_on_path<'a>(
        &'a self,
        ancestors: &'a mut HashSet<ChainId>,
        until: Option<u64>,
    ) -> BoxFuture<'a, ChainwebResult<()>> {
        Box::pin(async move {
            let cid = self.chain_id();
            ancestors.insert(cid);
            let result = self.catch_up_and_mine(ancestors, until).await;
            ancestors.remove(&cid);
            result
        })
    }

    async fn catch_up_and_mine(
        &self,
        ancestors: &mut HashSet<ChainId>,
        until: Option<u64>,
    ) -> ChainwebResult<()> {
        let cid = self.chain_id();
        let adjacents = self.adjacents()?;
        let reached = |height: u64| until.is_some_and(|target| height >= target);

        let mut interrupted = 0;
        loop {
            let height = self.block_number().await?;
            if reached(height) {
                return Ok(());
            }
            for adjacent in &adjacents {
                if ancestors.contains(&adjacent.chain_id()) {
                    continue;
                }
                if adjacent.block_number().await? < height {
                    tracing::debug!(
                        chain = %cid,
                        adjacent = %adjacent.chain_id(),
                        height,
                        "catching up adjacent chain"
                    );
                    adjacent.mine_on_path(ancestors, Some(height)).await?;
                }
            }

            let _guard = self.mine_lock.lock().await;
            let height = self.block_number().await?;
            if reached(height) {
                return Ok(());
            }
            match self.first_lagging(&adjacents, ancestors, height).await? {
                // A catch-up keeps mining until it reaches `until`.
                None => {
                    self.make_block().await?;
                    if until.is_none() {
                        return Ok(());
                    }
                }
                Some(adjacent) => {
                    interrupted += 1;
                    if interrupted >= MAX_CATCH_UP_ROUNDS {
                        return Err(ChainwebError::Mining(format!(
                            "Chain {cid} kept falling behind adjacent chain {adjacent} \
                             in {MAX_CATCH_UP_ROUNDS} rounds"
                        )));
                    }
                    tracing::debug!(chain = %cid, %adjacent, interrupted, "adjacent chain behind again");
                }
            }
        }
    }

    async fn first_lagging(
        &self,
        adjacents: &[Arc<Chain>],
        ancestors: &HashSet<ChainId>,
        height: u64,
    ) -> ChainwebResult<Option<ChainId>> {
        for adjacent in adjacents {
            if ancestors.contains(&adjacent.chain_id()) {
                continue;
            }
            if adjacent.block_number().await? < height {
                return Ok(Some(adjacent.chain_id()));
            }
        }
        Ok(None)
    }
}

async fn automine_loop(chain: Weak<Chain>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(chain) = chain.upgrade() else {
            break;
        };
        match chain.run_pending().await {
            Ok(()) => {}
            Err(e @ ChainwebError::Lifecycle(_)) => {
                tracing::error!(chain = %chain.chain_id(), error = %e, "node failed, automine stopped");
                break;
            }
            Err(e) => {
                tracing::warn!(chain = %chain.chain_id(), error = %e, "automine tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainweb_provider::MemoryBackend;

    fn chain(cid: u32) -> Arc<Chain> {
        Arc::new(Chain::new(
            ChainConfig::new(ChainId(cid), 8545 + cid as u16),
            Duration::from_millis(10),
        ))
    }

    #[tokio::test]
    async fn start_installs_contracts_and_disables_node_automine() {
        let backend = MemoryBackend::new();
        let c = chain(3);
        c.start(&backend).await.unwrap();

        let node = backend.node(ChainId(3)).unwrap();
        assert!(!node.automine_enabled().unwrap());
        assert_eq!(c.chainweb_chain_id().await.unwrap(), ChainId(3));
        assert!(c.automine_enabled());

        c.stop().await;
        assert!(!c.is_running());
        assert!(matches!(c.block_number().await, Err(ChainwebError::NotRunning(_))));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let backend = MemoryBackend::new();
        let c = chain(0);
        c.start(&backend).await.unwrap();
        assert!(matches!(c.start(&backend).await, Err(ChainwebError::Lifecycle(_))));
        c.stop().await;
    }

    #[tokio::test]
    async fn failed_launch_leaves_chain_restartable() {
        let backend = MemoryBackend::new();
        backend.fail_launch(ChainId(0));
        let c = chain(0);
        assert!(c.start(&backend).await.is_err());
        assert!(!c.is_running());

        let healthy = MemoryBackend::new();
        c.start(&healthy).await.unwrap();
        assert!(c.is_running());
        c.stop().await;
    }

    #[tokio::test]
    async fn stop_twice_is_not_fatal() {
        let backend = MemoryBackend::new();
        let c = chain(0);
        c.start(&backend).await.unwrap();
        c.stop().await;
        c.stop().await;
        assert!(!c.is_running());
    }

    #[tokio::test]
    async fn unwired_chain_mines_alone() {
        let backend = MemoryBackend::new();
        let c = chain(0);
        c.start(&backend).await.unwrap();
        c.disable_automine();
        c.mine().await.unwrap();
        c.mine().await.unwrap();
        assert_eq!(c.block_number().await.unwrap(), 2);
        c.stop().await;
    }

    /// In-process RPC with a real process that exits with code 3 shortly
    /// after launch.
    #[cfg(unix)]
    struct FailingNodeBackend;

    #[cfg(unix)]
    #[async_trait::async_trait]
    impl NodeBackend for FailingNodeBackend {
        async fn launch(&self, chain: &ChainConfig) -> ChainwebResult<LaunchedNode> {
            let command = chainweb_provider::NodeCommand {
                program: "sh".into(),
                args: vec!["-c".into(), "sleep 0.2; exit 3".into()],
            };
            let process = NodeProcess::spawn(&command, chain, chainweb_provider::NodeLogging::None)?;
            Ok(LaunchedNode {
                rpc: Arc::new(chainweb_provider::MemoryNode::new(chain.chain_id)),
                process: Some(process),
            })
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn node_failing_after_start_is_a_lifecycle_error() {
        let c = chain(0);
        c.start(&FailingNodeBackend).await.unwrap();
        assert!(c.is_running());
        assert_eq!(c.block_number().await.unwrap(), 0);

        tokio::time::timeout(Duration::from_secs(5), async {
            while c.is_running() || c.automine_enabled() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(matches!(c.block_number().await, Err(ChainwebError::Lifecycle(_))));
        assert!(matches!(c.mine().await, Err(ChainwebError::Lifecycle(_))));

        c.stop().await;
        assert!(matches!(c.block_number().await, Err(ChainwebError::NotRunning(_))));
    }

    #[tokio::test]
    async fn automine_toggle() {
        let backend = MemoryBackend::new();
        let c = chain(0);
        assert!(!c.enable_automine());
        c.start(&backend).await.unwrap();
        assert!(!c.enable_automine());
        assert!(c.disable_automine());
        assert!(!c.disable_automine());
        assert!(c.enable_automine());
        c.stop().await;
    }

    #[tokio::test]
    async fn pending_transaction_is_mined_by_automine() {
        let backend = MemoryBackend::new();
        let c = chain(0);
        c.start(&backend).await.unwrap();

        let node = backend.node(ChainId(0)).unwrap();
        node.submit_transaction(Vec::new()).unwrap();
        assert!(c.has_pending().await.unwrap());

        tokio::time::timeout(Duration::from_secs(5), async {
            while c.block_number().await.unwrap() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!c.has_pending().await.unwrap());
        c.stop().await;
    }
}
