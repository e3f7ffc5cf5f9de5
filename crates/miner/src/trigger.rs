//! Transaction-triggered mining.
//!
//! A reverse proxy mirrors every chain RPC request to `POST /trigger`,
//! passing the original path in `X-Original-URI`. When the body carries a
//! transaction submission, one block is requested for that chain after a
//! short delay. A fallback timer mines every chain when nothing was
//! triggered within the cooldown window.

use crate::{one_block_each, BlockRequest, MiningBackend};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;
use chainweb_core::error::{ChainwebError, ChainwebResult};
use chainweb_core::ChainId;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const ORIGINAL_URI_HEADER: &str = "x-original-uri";

/// JSON-RPC methods that submit a transaction.
pub const WRITE_METHODS: [&str; 2] = ["eth_sendRawTransaction", "eth_sendTransaction"];

/// Fixed acknowledgement returned for every trigger request.
pub const ACK: &str = "OK";

pub struct TriggerState {
    backend: Arc<dyn MiningBackend>,
    chains: Vec<ChainId>,
    delay: Duration,
    cooldown: Duration,
    /// Triggers between their request and the end of their cooldown.
    active: AtomicUsize,
}

impl TriggerState {
    pub fn new(
        backend: Arc<dyn MiningBackend>,
        chains: Vec<ChainId>,
        delay: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            backend,
            chains,
            delay,
            cooldown,
            active: AtomicUsize::new(0),
        }
    }

    /// Whether a trigger happened within the last cooldown window.
    pub fn is_triggered(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    /// Requests one block on `chain` after the trigger delay.
    pub fn trigger(self: &Arc<Self>, chain: ChainId) -> JoinHandle<()> {
        self.active.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(chain = %chain, "transaction seen, mining triggered");

        let state = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(state.delay).await;
            let request = BlockRequest::from([(chain, 1)]);
            if let Err(e) = state.backend.make_blocks(&request).await {
                tracing::warn!(chain = %chain, error = %e, "triggered block request failed");
            }
            tokio::time::sleep(state.cooldown).await;
            state.active.fetch_sub(1, Ordering::SeqCst);
        })
    }

    /// One fallback round. Returns `true` when blocks were requested.
    pub async fn fallback_tick(&self) -> ChainwebResult<bool> {
        if self.is_triggered() {
            tracing::debug!("recently triggered, skipping fallback round");
            return Ok(false);
        }
        let request = one_block_each(&self.chains);
        self.backend.make_blocks(&request).await?;
        Ok(true)
    }
}

/// Chain id from a `/chain/{id}/evm/rpc` path, ignoring any prefix and
/// query string.
pub fn chain_from_uri(uri: &str) -> Option<ChainId> {
    let path = uri.split(['?', '#']).next()?;
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.windows(4).find_map(|w| match w {
        ["chain", id, "evm", "rpc"] => id.parse().ok(),
        _ => None,
    })
}

/// Whether a JSON-RPC body (single request or batch) submits a transaction.
pub fn is_write_request(body: &[u8]) -> bool {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return false;
    };
    let is_write = |v: &Value| {
        v.get("method")
            .and_then(Value::as_str)
            .is_some_and(|m| WRITE_METHODS.contains(&m))
    };
    match &value {
        Value::Array(batch) => batch.iter().any(is_write),
        single => is_write(single),
    }
}

async fn handle_trigger(
    State(state): State<Arc<TriggerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    let chain = headers
        .get(ORIGINAL_URI_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(chain_from_uri);

    match chain {
        Some(chain) if is_write_request(&body) => {
            state.trigger(chain);
        }
        Some(_) => {}
        None => tracing::debug!("trigger request without a chain path"),
    }
    ACK
}

pub fn router(state: Arc<TriggerState>) -> Router {
    Router::new()
        .route("/trigger", post(handle_trigger))
        .with_state(state)
}

/// Serves the trigger endpoint until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<TriggerState>, shutdown: F) -> ChainwebResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| ChainwebError::Internal(format!("Listener has no address: {e}")))?;
    tracing::info!(%addr, "mining trigger listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ChainwebError::Internal(format!("Trigger server failed: {e}")))
}

/// Runs fallback rounds every `period` until `shutdown` resolves.
///
/// Failed rounds are logged; the next tick tries again.
pub async fn run_fallback<F>(state: Arc<TriggerState>, period: Duration, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Err(e) = state.fallback_tick().await {
                    tracing::warn!(error = %e, "fallback block request failed");
                }
            }
        }
    }
    tracing::info!("fallback miner stopped");
}
