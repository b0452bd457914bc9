use std::time::Duration;

use anchorwatch_core::reporter::CacheHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Log the dispatcher's cache window every `interval` until cancelled or
/// the dispatcher stops answering.
pub async fn log_cache_window(cache: CacheHandle, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let window = match (cache.tip().await, cache.base().await) {
                    (Ok(tip), Ok(base)) => (tip, base),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(error = %e, "cache status unavailable");
                        return;
                    }
                };
                match window {
                    (Some(tip), Some(base)) => info!(
                        tip = %tip.height,
                        tip_hash = %tip.hash,
                        base = %base.height,
                        "block cache window"
                    ),
                    _ => info!("block cache is empty"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anchorwatch_core::consensus::{CheckpointCodec, HttpConsensusClient};
    use anchorwatch_core::reporter::{CheckpointExtractor, Dispatcher, Reporter};
    use anchorwatch_core::rpc::HttpRpcClient;
    use anchorwatch_core::{BlockCache, RetryPolicy};

    use super::*;

    fn idle_dispatcher() -> (Dispatcher, CacheHandle) {
        let rpc = HttpRpcClient::new("http://127.0.0.1:1", Some("u"), Some("p"), None, None, 10)
            .expect("rpc client");
        let consensus = HttpConsensusClient::new("http://127.0.0.1:1").expect("consensus client");
        let reporter = Reporter::new(
            Arc::new(consensus),
            CheckpointExtractor::new(CheckpointCodec::new(*b"anc0", 0), 8),
            false,
        );
        Dispatcher::new(
            Arc::new(rpc),
            Arc::new(reporter),
            BlockCache::new(4).expect("capacity"),
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn stops_when_dispatcher_is_gone() {
        let (dispatcher, cache) = idle_dispatcher();
        drop(dispatcher);
        time::timeout(
            Duration::from_secs(5),
            log_cache_window(cache, Duration::from_millis(10), CancellationToken::new()),
        )
        .await
        .expect("status logger returns once the dispatcher is dropped");
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (dispatcher, cache) = idle_dispatcher();
        let cancel = CancellationToken::new();
        cancel.cancel();
        time::timeout(
            Duration::from_secs(5),
            log_cache_window(cache, Duration::from_secs(60), cancel),
        )
        .await
        .expect("status logger returns on cancel");
        drop(dispatcher);
    }
}
