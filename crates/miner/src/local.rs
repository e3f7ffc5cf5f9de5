//! Mining a simulated network in-process.

use crate::{log_request, BlockRequest, MiningBackend};
use async_trait::async_trait;
use chainweb_core::error::ChainwebResult;
use chainweb_network::ChainwebNetwork;
use futures::future::try_join_all;

/// Each requested block is one catch-up `mine()` on its chain. Chains are
/// mined concurrently, blocks on one chain one after the other.
#[async_trait]
impl MiningBackend for ChainwebNetwork {
    async fn make_blocks(&self, request: &BlockRequest) -> ChainwebResult<()> {
        log_request(request);

        let per_chain = request.iter().map(|(cid, count)| async move {
            let chain = self.chain(*cid)?;
            for _ in 0..*count {
                chain.mine().await?;
            }
            ChainwebResult::Ok(())
        });
        try_join_all(per_chain).await?;
        Ok(())
    }

    async fn cut_height(&self) -> ChainwebResult<u64> {
        let mut height = 0;
        for chain in self.chains() {
            height += chain.block_number().await?;
        }
        Ok(height)
    }
}
