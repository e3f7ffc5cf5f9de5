//! HTTP client for an external on-demand miner and the consensus cut.

use crate::config::MinerConfig;
use crate::{log_request, BlockRequest, MiningBackend};
use async_trait::async_trait;
use chainweb_core::error::{ChainwebError, ChainwebResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Cut {
    height: u64,
}

/// `POST /make-blocks` against the miner, `GET` against the cut endpoint.
#[derive(Debug, Clone)]
pub struct MinerClient {
    http: reqwest::Client,
    make_blocks_url: String,
    cut_url: String,
}

impl MinerClient {
    pub fn new(config: &MinerConfig) -> Self {
        Self::with_urls(config.make_blocks_url(), config.cut_endpoint.clone())
    }

    pub fn with_urls(make_blocks_url: String, cut_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            make_blocks_url,
            cut_url,
        }
    }

    pub fn make_blocks_url(&self) -> &str {
        &self.make_blocks_url
    }
}

fn log_unreachable_hints() {
    tracing::error!("Unable to connect to the miner.");
    tracing::error!("Check if the docker `networks` are configured correctly.");
    tracing::error!("Check if the miner is set to `--worker=on-demand`.");
}

#[async_trait]
impl MiningBackend for MinerClient {
    async fn make_blocks(&self, request: &BlockRequest) -> ChainwebResult<()> {
        log_request(request);

        let response = match self
            .http
            .post(&self.make_blocks_url)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.is_connect() {
                    log_unreachable_hints();
                }
                return Err(ChainwebError::Mining(format!(
                    "Error making blocks at {}: {e}",
                    self.make_blocks_url
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("Unable to connect") {
                log_unreachable_hints();
            }
            tracing::warn!(%status, body = %body, "miner rejected block request");
            return Err(ChainwebError::Mining(format!(
                "Error making blocks: {status}"
            )));
        }

        Ok(())
    }

    async fn cut_height(&self) -> ChainwebResult<u64> {
        let response = self
            .http
            .get(&self.cut_url)
            .send()
            .await
            .map_err(|e| ChainwebError::Rpc(format!("Error fetching cut height: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainwebError::Rpc(format!(
                "Error fetching cut height: {status}"
            )));
        }

        let cut: Cut = response
            .json()
            .await
            .map_err(|e| ChainwebError::Rpc(format!("Malformed cut response: {e}")))?;
        Ok(cut.height)
    }
}
