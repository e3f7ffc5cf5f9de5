//! Miner settings, read from flags with environment fallbacks.

use chainweb_core::ChainId;
use clap::Args;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_CUT_ENDPOINT: &str = "http://localhost:1848/chainweb/0.0/evm-development/cut";

/// Chains `0..98`.
pub fn default_chains() -> Vec<ChainId> {
    (0..98).map(ChainId).collect()
}

/// Where the external miner and the consensus cut live.
#[derive(Debug, Clone, Args)]
pub struct MinerConfig {
    /// Seconds between fallback mining rounds.
    #[arg(long, env = "MINING_CONFIRMATION_PERIOD", default_value_t = 12.0)]
    pub confirmation_period: f64,

    #[arg(long, env = "MINER_HOSTNAME", default_value = "localhost")]
    pub miner_host: String,

    #[arg(long, env = "MINER_PORT", default_value_t = 1917)]
    pub miner_port: u16,

    #[arg(long, env = "CONSENSUS_CUT_ENDPOINT", default_value = DEFAULT_CUT_ENDPOINT)]
    pub cut_endpoint: String,

    /// Comma-separated chain ids to mine.
    #[arg(long, env = "CHAINS", value_delimiter = ',', default_values_t = default_chains())]
    pub chains: Vec<ChainId>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            confirmation_period: 12.0,
            miner_host: "localhost".into(),
            miner_port: 1917,
            cut_endpoint: DEFAULT_CUT_ENDPOINT.into(),
            chains: default_chains(),
        }
    }
}

impl MinerConfig {
    pub fn make_blocks_url(&self) -> String {
        format!("http://{}:{}/make-blocks", self.miner_host, self.miner_port)
    }

    /// Falls back to 12 s for non-positive or non-finite periods.
    pub fn confirmation_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.confirmation_period)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(12))
    }
}

/// Transaction-triggered mining.
#[derive(Debug, Clone, Args)]
pub struct TriggerConfig {
    #[arg(long, env = "TRIGGER_LISTEN_ADDR", default_value = "0.0.0.0:11848")]
    pub listen: SocketAddr,

    /// Wait between seeing a transaction and requesting its block.
    #[arg(long, env = "TRIGGER_DELAY_MS", default_value_t = 500)]
    pub trigger_delay_ms: u64,

    /// How long a trigger suppresses the fallback timer.
    #[arg(long, env = "TRIGGER_COOLDOWN_MS", default_value_t = 5000)]
    pub cooldown_ms: u64,

    /// Disable the fallback timer.
    #[arg(long, default_value_t = false)]
    pub no_fallback: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 11848)),
            trigger_delay_ms: 500,
            cooldown_ms: 5000,
            no_fallback: false,
        }
    }
}

impl TriggerConfig {
    pub fn trigger_delay(&self) -> Duration {
        Duration::from_millis(self.trigger_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Cut-height driven mining.
#[derive(Debug, Clone, Args)]
pub struct ContinuousConfig {
    #[arg(long, env = "CONTINUOUS_INTERVAL_MS", default_value_t = 1000)]
    pub interval_ms: u64,

    /// Height deltas kept in the rolling window.
    #[arg(long, default_value_t = 10)]
    pub window_size: usize,

    /// Oldest deltas averaged for the retry budget.
    #[arg(long, default_value_t = 5)]
    pub sample_size: usize,

    /// Attempts for the first cut-height read.
    #[arg(long, default_value_t = 5)]
    pub initial_attempts: u32,

    #[arg(long, default_value_t = 2000)]
    pub initial_retry_delay_ms: u64,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            window_size: 10,
            sample_size: 5,
            initial_attempts: 5,
            initial_retry_delay_ms: 2000,
        }
    }
}

impl ContinuousConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }
}
