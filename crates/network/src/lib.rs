//! A simulated chainweb: independent chains wired along a graph, mined with
//! catch-up semantics, and able to produce SPV proofs for cross-chain
//! messages.
//!
//! ```ignore
//! let config = NetworkConfig::for_chains(2)?;
//! let network = ChainwebNetwork::with_processes(config)?;
//! network.start().await?;
//! let proof = network.get_spv_proof(ChainId(1), &origin).await?;
//! ```

pub mod chain;
pub mod config;
pub mod network;
pub mod shared;

pub use chain::Chain;
pub use config::{NetworkConfig, SpvConfig, DEFAULT_BASE_PORT};
pub use network::ChainwebNetwork;
pub use shared::SharedNetwork;
