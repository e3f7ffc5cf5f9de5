//! Continuous mining with an adaptive retry budget.
//!
//! Every interval the cut height is polled. After a block request for `n`
//! chains the cut is expected to grow by `n`. The loop waits for that, but
//! only for as many polls as the observed throughput suggests are needed;
//! then it forces a new request.
//!
//! Throughput is the average of the *oldest* deltas in a rolling window, so
//! a short burst does not immediately shrink the budget.

use crate::config::ContinuousConfig;
use crate::{one_block_each, MiningBackend};
use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::ChainId;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

/// What to do after one cut-height observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Expected height not reached and the budget is not spent.
    Wait { retries: u64, max_retries: u64 },
    /// Request one block on every chain. `forced` when the budget ran out.
    Request { forced: bool },
}

#[derive(Debug, Clone)]
pub struct AdaptiveBudget {
    chains: u64,
    window: VecDeque<u64>,
    window_size: usize,
    sample_size: usize,
    last_height: u64,
    expected_height: u64,
    retries: u64,
}

impl AdaptiveBudget {
    /// Budget right after an initial request at `height`.
    pub fn new(chains: usize, height: u64, window_size: usize, sample_size: usize) -> Self {
        let chains = chains as u64;
        Self {
            chains,
            window: VecDeque::with_capacity(window_size + 1),
            window_size: window_size.max(1),
            sample_size: sample_size.max(1),
            last_height: height,
            expected_height: height + chains,
            retries: 0,
        }
    }

    pub fn from_config(chains: usize, height: u64, config: &ContinuousConfig) -> Self {
        Self::new(chains, height, config.window_size, config.sample_size)
    }

    pub fn expected_height(&self) -> u64 {
        self.expected_height
    }

    /// Average delta over the oldest `sample_size` window entries, divided
    /// by `sample_size` even while the window is still filling. Rounded to
    /// two decimals.
    pub fn average(&self) -> f64 {
        let sum: u64 = self.window.iter().take(self.sample_size).sum();
        let avg = sum as f64 / self.sample_size as f64;
        (avg * 100.0).round() / 100.0
    }

    /// `None` when no growth was observed yet (unbounded budget).
    pub fn max_retries(&self) -> Option<u64> {
        let avg = self.average();
        (avg > 0.0).then(|| (self.chains as f64 / avg).floor() as u64)
    }

    pub fn observe(&mut self, height: u64) -> Decision {
        self.window.push_back(height.saturating_sub(self.last_height));
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }
        self.last_height = height;

        let max_retries = self.max_retries();
        if let Some(max_retries) = max_retries {
            if height < self.expected_height {
                self.retries += 1;
                if self.retries <= max_retries {
                    return Decision::Wait {
                        retries: self.retries,
                        max_retries,
                    };
                }
            }
        }

        let forced = max_retries.is_some_and(|max| self.retries > max);
        self.retries = 0;
        self.expected_height = height + self.chains;
        Decision::Request { forced }
    }
}

/// Reads the cut height, retrying with a fixed delay.
pub async fn initial_height(
    backend: &dyn MiningBackend,
    config: &ContinuousConfig,
) -> ChainwebResult<u64> {
    let attempts = config.initial_attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match backend.cut_height().await {
            Ok(height) => return Ok(height),
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "reading cut height failed");
                last_err = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.initial_retry_delay()).await;
        }
    }
    Err(last_err.unwrap_or_else(|| ChainwebError::Internal("No cut height attempt made".into())))
}

/// Mines `chains` until `shutdown` resolves.
///
/// The first request failing is fatal; later failures are logged and
/// retried on the next tick.
pub async fn run<F>(
    backend: Arc<dyn MiningBackend>,
    chains: Vec<ChainId>,
    config: ContinuousConfig,
    shutdown: F,
) -> ChainwebResult<()>
where
    F: Future<Output = ()>,
{
    let height = initial_height(backend.as_ref(), &config).await?;
    let request = one_block_each(&chains);
    backend.make_blocks(&request).await?;

    let mut budget = AdaptiveBudget::from_config(chains.len(), height, &config);
    tracing::info!(
        height,
        expected = budget.expected_height(),
        "continuous mining started"
    );

    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let height = match backend.cut_height().await {
                    Ok(height) => height,
                    Err(e) => {
                        tracing::warn!(error = %e, "reading cut height failed");
                        continue;
                    }
                };

                match budget.observe(height) {
                    Decision::Wait { retries, max_retries } => {
                        tracing::info!(
                            height,
                            expected = budget.expected_height(),
                            retries,
                            max_retries,
                            avg = budget.average(),
                            "waiting for cut height"
                        );
                    }
                    Decision::Request { forced } => {
                        if forced {
                            tracing::info!("retry budget exhausted, forcing block request");
                        }
                        tracing::info!(
                            height,
                            expected = budget.expected_height(),
                            "requesting new blocks"
                        );
                        if let Err(e) = backend.make_blocks(&request).await {
                            tracing::warn!(error = %e, "block request failed");
                        }
                    }
                }
            }
        }
    }

    tracing::info!("continuous mining stopped");
    Ok(())
}
