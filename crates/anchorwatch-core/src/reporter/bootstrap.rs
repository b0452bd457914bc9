use tracing::{debug, info};

use crate::cache::BlockCache;
use crate::error::{CacheError, CoreError};
use crate::rpc::BtcRpc;
use crate::types::{BlockHeight, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The cache tip already was the best block; nothing was fetched.
    UpToDate,
    Rebuilt { tip: Point, blocks: usize },
}

/// Rebuild `cache` from the trailing window of the node's best chain.
///
/// The replacement is built on the side and swapped in only once it is
/// verified, so on error `cache` is left untouched. Unless `force` is set, a
/// cache whose tip is the current best block is kept as is.
pub async fn bootstrap(
    rpc: &dyn BtcRpc,
    cache: &mut BlockCache,
    force: bool,
) -> Result<BootstrapOutcome, CoreError> {
    let best = rpc.get_best_block().await?;
    if !force && cache.tip().map(|tip| tip.hash()) == Some(best.hash) {
        debug!(height = %best.height, "block cache already at best block");
        return Ok(BootstrapOutcome::UpToDate);
    }

    let window = u32::try_from(cache.capacity() - 1).unwrap_or(u32::MAX);
    let base = BlockHeight(best.height.0.saturating_sub(window));
    let blocks = rpc.find_tail_blocks_by_height(base).await?;

    let tip = blocks.last().ok_or(CoreError::EmptyChain)?.point();
    if tip.hash != best.hash {
        // a block arrived while the window was being fetched
        return Err(CacheError::InvalidChain {
            expected: best.hash,
            found: tip.hash,
        }
        .into());
    }

    let count = blocks.len();
    *cache = BlockCache::from_blocks(cache.capacity(), blocks)?;
    info!(
        base = %base,
        tip = %tip.height,
        hash = %tip.hash,
        blocks = count,
        "bootstrapped block cache"
    );
    Ok(BootstrapOutcome::Rebuilt { tip, blocks: count })
}
