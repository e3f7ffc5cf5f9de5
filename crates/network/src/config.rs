//! Network configuration: chain endpoints, graph, node command and timing.
//!
//! Loadable from a JSON file; every timing field has a default so a config
//! only needs `chains` and `graph`.

use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::{ChainId, Graph};
use chainweb_provider::{ChainConfig, NodeCommand, NodeLogging, ProcessBackend};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// First port used by [`NetworkConfig::for_chains`].
pub const DEFAULT_BASE_PORT: u16 = 8545;

/// How long `get_spv_proof` keeps mining the destination chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpvConfig {
    /// Sleep between two mining rounds.
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,
    /// `None` waits until the height is reached.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for SpvConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_interval_ms(),
            max_attempts: None,
        }
    }
}

impl SpvConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chains: Vec<ChainConfig>,
    pub graph: Graph,
    #[serde(default)]
    pub node: NodeCommand,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub automine_interval_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub rpc_poll_interval_ms: u64,
    #[serde(default)]
    pub spv: SpvConfig,
    #[serde(default)]
    pub logging: NodeLogging,
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_interval_ms() -> u64 {
    100
}

impl NetworkConfig {
    /// Default configuration for `chains` chains on the canonical graph.
    pub fn for_chains(chains: usize) -> ChainwebResult<Self> {
        Self::with_graph(Graph::canonical(chains)?, Some(chains))
    }

    /// One chain per graph key, ports assigned from [`DEFAULT_BASE_PORT`] in
    /// chain-id order.
    ///
    /// `declared_chains`, when given, must match the number of graph keys.
    pub fn with_graph(graph: Graph, declared_chains: Option<usize>) -> ChainwebResult<Self> {
        if let Some(declared) = declared_chains {
            if declared != graph.len() {
                return Err(ChainwebError::Config(format!(
                    "Declared {declared} chains but the graph has {} entries",
                    graph.len()
                )));
            }
        }
        graph.validate()?;

        let chains = assign_ports(graph.chain_ids(), DEFAULT_BASE_PORT)?;

        Ok(Self {
            chains,
            graph,
            node: NodeCommand::default(),
            settle_delay_ms: default_settle_delay_ms(),
            automine_interval_ms: default_interval_ms(),
            rpc_poll_interval_ms: default_interval_ms(),
            spv: SpvConfig::default(),
            logging: NodeLogging::default(),
        })
    }

    /// Shifts every chain id (graph and chain entries) by `offset`.
    ///
    /// Ports are kept; EVM chain ids follow the new chain ids.
    pub fn with_chain_id_offset(mut self, offset: u32) -> Self {
        if offset == 0 {
            return self;
        }
        self.graph = self.graph.offset(offset);
        for chain in &mut self.chains {
            let port = chain.port;
            let host = std::mem::take(&mut chain.host);
            *chain = ChainConfig::new(ChainId(chain.chain_id.as_u32() + offset), port);
            chain.host = host;
        }
        self
    }

    /// Reassigns ports as `base_port + index` in chain-id order.
    pub fn with_base_port(mut self, base_port: u16) -> ChainwebResult<Self> {
        let ids: Vec<ChainId> = self.chains.iter().map(|c| c.chain_id).collect();
        let mut renumbered = assign_ports(ids.into_iter(), base_port)?;
        for (new, old) in renumbered.iter_mut().zip(&self.chains) {
            new.host = old.host.clone();
            new.evm_chain_id = old.evm_chain_id;
        }
        self.chains = renumbered;
        Ok(self)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ChainwebResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChainwebError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ChainwebError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-checks chain entries against the graph.
    pub fn validate(&self) -> ChainwebResult<()> {
        self.graph.validate()?;

        if self.chains.len() != self.graph.len() {
            return Err(ChainwebError::Config(format!(
                "Declared {} chains but the graph has {} entries",
                self.chains.len(),
                self.graph.len()
            )));
        }

        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for chain in &self.chains {
            if !ids.insert(chain.chain_id) {
                return Err(ChainwebError::Config(format!(
                    "Chain {} is declared twice",
                    chain.chain_id
                )));
            }
            if !ports.insert((chain.host.as_str(), chain.port)) {
                return Err(ChainwebError::Config(format!(
                    "Port {} is used by more than one chain",
                    chain.port
                )));
            }
            if !self.graph.contains(chain.chain_id) {
                return Err(ChainwebError::Config(format!(
                    "Chain {} has no graph entry",
                    chain.chain_id
                )));
            }
        }
        Ok(())
    }

    pub fn automine_interval(&self) -> Duration {
        Duration::from_millis(self.automine_interval_ms)
    }

    /// Backend spawning one node process per chain with this config's
    /// command and timing.
    pub fn process_backend(&self) -> ProcessBackend {
        ProcessBackend {
            command: self.node.clone(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            poll_interval: Duration::from_millis(self.rpc_poll_interval_ms),
            logging: self.logging,
        }
    }
}

fn assign_ports(
    ids: impl Iterator<Item = ChainId>,
    base_port: u16,
) -> ChainwebResult<Vec<ChainConfig>> {
    ids.enumerate()
        .map(|(i, cid)| {
            u16::try_from(i)
                .ok()
                .and_then(|i| base_port.checked_add(i))
                .map(|port| ChainConfig::new(cid, port))
                .ok_or_else(|| {
                    ChainwebError::Config(format!("No port left for chain {cid} above {base_port}"))
                })
        })
        .collect()
}
