//! Network assembly and SPV proof synthesis.

use crate::chain::Chain;
use crate::config::{NetworkConfig, SpvConfig};
use alloy_primitives::{Bytes, B256};
use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::{spv, ChainId, EventLog, Graph, Origin};
use chainweb_provider::{NodeBackend, NodeRpc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The chains of one simulated chainweb, wired along the graph.
pub struct ChainwebNetwork {
    chains: BTreeMap<ChainId, Arc<Chain>>,
    graph: Graph,
    spv: SpvConfig,
    backend: Arc<dyn NodeBackend>,
}

impl std::fmt::Debug for ChainwebNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainwebNetwork")
            .field("chains", &self.chains.values().collect::<Vec<_>>())
            .field("spv", &self.spv)
            .finish()
    }
}

impl ChainwebNetwork {
    /// Builds every chain, then resolves each chain's adjacency list against
    /// the built set.
    pub fn new(config: NetworkConfig, backend: Arc<dyn NodeBackend>) -> ChainwebResult<Self> {
        config.validate()?;
        let automine_interval = config.automine_interval();

        let chains: BTreeMap<ChainId, Arc<Chain>> = config
            .chains
            .into_iter()
            .map(|c| (c.chain_id, Arc::new(Chain::new(c, automine_interval))))
            .collect();

        for (cid, chain) in &chains {
            let adjacent_ids = config.graph.adjacents(*cid).ok_or_else(|| {
                ChainwebError::Config(format!("Chain {cid} has no graph entry"))
            })?;
            let adjacents = adjacent_ids
                .iter()
                .map(|a| {
                    chains.get(a).map(Arc::downgrade).ok_or_else(|| {
                        ChainwebError::Config(format!(
                            "Chain {cid} lists adjacent chain {a} which is not configured"
                        ))
                    })
                })
                .collect::<ChainwebResult<Vec<_>>>()?;
            chain.set_adjacents(adjacents)?;
        }

        tracing::debug!(chains = chains.len(), "network assembled");

        Ok(Self {
            chains,
            graph: config.graph,
            spv: config.spv,
            backend,
        })
    }

    /// Network whose chains run as spawned node processes.
    pub fn with_processes(config: NetworkConfig) -> ChainwebResult<Self> {
        let backend = Arc::new(config.process_backend());
        Self::new(config, backend)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.keys().copied().collect()
    }

    pub fn chains(&self) -> impl Iterator<Item = &Arc<Chain>> {
        self.chains.values()
    }

    pub fn chain(&self, cid: ChainId) -> ChainwebResult<&Arc<Chain>> {
        self.chains
            .get(&cid)
            .ok_or(ChainwebError::ChainNotFound(cid))
    }

    /// RPC handle of a running chain.
    pub fn rpc(&self, cid: ChainId) -> ChainwebResult<Arc<dyn NodeRpc>> {
        self.chain(cid)?.rpc()
    }

    pub fn is_running(&self) -> bool {
        self.chains.values().all(|c| c.is_running())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Starts all chains concurrently.
    ///
    /// If any chain fails, the chains that did start are stopped again and
    /// the first failure is returned.
    pub async fn start(&self) -> ChainwebResult<()> {
        tracing::info!(chains = self.chains.len(), "starting network");

        let backend = self.backend.as_ref();
        let results = join_all(self.chains.values().map(|c| c.start(backend))).await;

        let mut failure = None;
        for (cid, result) in self.chains.keys().zip(results) {
            if let Err(e) = result {
                tracing::error!(chain = %cid, error = %e, "chain failed to start");
                failure.get_or_insert(e);
            }
        }

        match failure {
            None => {
                tracing::info!("network started");
                Ok(())
            }
            Some(e) => {
                let running = self.chains.values().filter(|c| c.is_started());
                join_all(running.map(|c| c.stop())).await;
                Err(e)
            }
        }
    }

    pub async fn stop(&self) {
        join_all(self.chains.values().map(|c| c.stop())).await;
        tracing::info!("network stopped");
    }

    // -----------------------------------------------------------------------
    // SPV
    // -----------------------------------------------------------------------

    /// Proof that the event at `origin` happened, usable on `target`.
    ///
    /// Returns only once `target` is at least
    /// `origin.block_height + distance(source, target)` high, mining it as
    /// needed.
    pub async fn get_spv_proof(&self, target: ChainId, origin: &Origin) -> ChainwebResult<Bytes> {
        let source = self.chain(origin.source_chain_id)?;
        let target_chain = self.chain(target)?;

        let logs = source.logs_at(origin.block_height).await?;
        let log = select_origin_log(logs, origin)?;
        let msg = spv::message_from_log(&log, origin)?;

        let distance = self.graph.distance(origin.source_chain_id, target)?;
        let required = origin.block_height + u64::from(distance);
        self.wait_for_height(target_chain, required).await?;

        tracing::debug!(
            source = %origin.source_chain_id,
            %target,
            height = origin.block_height,
            "SPV proof ready"
        );

        Ok(spv::encode_proof(&msg))
    }

    /// [`Self::get_spv_proof`] with one byte flipped.
    pub async fn create_tampered_proof(
        &self,
        target: ChainId,
        origin: &Origin,
    ) -> ChainwebResult<Bytes> {
        let proof = self.get_spv_proof(target, origin).await?;
        Ok(spv::tamper_proof(&proof))
    }

    pub fn compute_origin_hash(origin: &Origin) -> B256 {
        spv::compute_origin_hash(origin)
    }

    async fn wait_for_height(&self, chain: &Chain, required: u64) -> ChainwebResult<()> {
        let mut attempts = 0u32;
        let mut height = chain.block_number().await?;

        while height < required {
            if self.spv.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(ChainwebError::SpvTimeout {
                    target: chain.chain_id(),
                    current: height,
                    required,
                    attempts,
                });
            }

            tracing::info!(
                chain = %chain.chain_id(),
                height,
                required,
                "waiting for SPV proof to become available"
            );
            chain.mine().await?;
            attempts += 1;
            tokio::time::sleep(self.spv.poll_interval()).await;
            height = chain.block_number().await?;
        }
        Ok(())
    }
}

/// The `event_index`-th log of the origin transaction.
fn select_origin_log(logs: Vec<EventLog>, origin: &Origin) -> ChainwebResult<EventLog> {
    let not_found = || ChainwebError::LogNotFound {
        chain: origin.source_chain_id,
        height: origin.block_height,
        tx_index: origin.transaction_index,
        event_index: origin.event_index,
    };

    let index = usize::try_from(origin.event_index).map_err(|_| not_found())?;
    logs.into_iter()
        .filter(|log| log.transaction_index == Some(origin.transaction_index))
        .nth(index)
        .filter(|log| !log.removed)
        .ok_or_else(not_found)
}
