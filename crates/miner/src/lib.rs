//! Decides when blocks get produced in an unattended network.
//!
//! Three drivers share one [`MiningBackend`]:
//! - [`trigger`]: mines a chain shortly after a transaction was sent to it,
//!   with a fallback timer for idle periods
//! - [`continuous`]: polls the cut height and requests blocks with an
//!   adaptive retry budget
//! - [`local`]: the backend for a simulated [`chainweb_network::ChainwebNetwork`]

pub mod client;
pub mod config;
pub mod continuous;
pub mod local;
pub mod trigger;

use async_trait::async_trait;
use chainweb_core::error::ChainwebResult;
use chainweb_core::ChainId;
use std::collections::BTreeMap;

pub use client::MinerClient;
pub use config::{ContinuousConfig, MinerConfig, TriggerConfig};
pub use continuous::{AdaptiveBudget, Decision};
pub use trigger::TriggerState;

/// Number of blocks to produce per chain. Serializes as
/// `{"<chain id>": <count>}`.
pub type BlockRequest = BTreeMap<ChainId, u32>;

/// Something that can produce blocks and report the cut height.
#[async_trait]
pub trait MiningBackend: Send + Sync {
    async fn make_blocks(&self, request: &BlockRequest) -> ChainwebResult<()>;

    /// Sum of all chain heights.
    async fn cut_height(&self) -> ChainwebResult<u64>;
}

/// One block on each of `chains`.
pub fn one_block_each(chains: &[ChainId]) -> BlockRequest {
    chains.iter().map(|cid| (*cid, 1)).collect()
}

pub(crate) fn log_request(request: &BlockRequest) {
    let uniform = request
        .values()
        .next()
        .copied()
        .filter(|n| request.values().all(|c| c == n));
    match uniform {
        Some(n) => {
            let chains: Vec<ChainId> = request.keys().copied().collect();
            tracing::info!(blocks = n, ?chains, "requesting blocks");
        }
        _ => tracing::info!(?request, "requesting blocks"),
    }
}
