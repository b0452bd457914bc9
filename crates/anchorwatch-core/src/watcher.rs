use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::block::Header;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::rpc::BtcRpc;
use crate::types::{BlockEvent, BlockEventType, BlockHeight};

/// Turns best-block polling into a stream of block events.
///
/// Remembers the last `max_depth` best-chain blocks it announced. When the
/// best block moves it walks back from the new tip to the first remembered
/// block, announcing the abandoned blocks as disconnected (tip first) and
/// the new ones as connected (oldest first). A fork deeper than `max_depth`
/// is announced as just the new tip, which the dispatcher answers with a
/// resync.
pub struct PollingWatcher {
    rpc: Arc<dyn BtcRpc>,
    interval: Duration,
    max_depth: usize,
    recent: VecDeque<(BlockHeight, Header)>,
}

impl PollingWatcher {
    pub fn new(rpc: Arc<dyn BtcRpc>, interval: Duration, max_depth: usize) -> Self {
        Self {
            rpc,
            interval,
            max_depth: max_depth.max(1),
            recent: VecDeque::new(),
        }
    }

    /// Poll until cancelled, sending every event as `T`. Feeds either a
    /// full `BlockEvent` channel or a hash-only `SequenceNotice` one.
    pub async fn run<T>(mut self, out: mpsc::Sender<T>, cancel: CancellationToken)
    where
        T: From<BlockEvent> + Send + 'static,
    {
        info!(interval = ?self.interval, "starting block watcher");
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("block watcher cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    let events = match self.poll().await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!(error = %e, "best block poll failed");
                            continue;
                        }
                    };
                    for event in events {
                        if out.send(T::from(event)).await.is_err() {
                            info!("block dispatcher gone, stopping watcher");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn poll(&mut self) -> Result<Vec<BlockEvent>, CoreError> {
        let best = self.rpc.get_best_block().await?;
        let Some(known) = self.recent.back().map(|(_, header)| header.block_hash()) else {
            let block = self.rpc.get_block_by_hash(&best.hash).await?;
            debug!(height = %block.height, hash = %best.hash, "watching from best block");
            self.recent.push_back((block.height, block.header));
            return Ok(Vec::new());
        };
        if known == best.hash {
            return Ok(Vec::new());
        }

        // newest first
        let mut fresh: Vec<(BlockHeight, Header)> = Vec::new();
        let mut cursor = best.hash;
        let fork = loop {
            if let Some(i) = self
                .recent
                .iter()
                .rposition(|(_, header)| header.block_hash() == cursor)
            {
                break Some(i);
            }
            if fresh.len() >= self.max_depth {
                break None;
            }
            let block = self.rpc.get_block_by_hash(&cursor).await?;
            cursor = block.prev_hash();
            fresh.push((block.height, block.header));
        };

        let mut events = Vec::new();
        match fork {
            Some(i) => {
                while self.recent.len() > i + 1 {
                    if let Some((height, header)) = self.recent.pop_back() {
                        events.push(BlockEvent {
                            event_type: BlockEventType::Disconnected,
                            height,
                            header,
                        });
                    }
                }
            }
            None => {
                warn!(
                    height = %best.height,
                    depth = self.max_depth,
                    "best chain moved further than watched depth"
                );
                self.recent.clear();
                fresh.truncate(1);
            }
        }

        for (height, header) in fresh.into_iter().rev() {
            events.push(BlockEvent {
                event_type: BlockEventType::Connected,
                height,
                header,
            });
            self.recent.push_back((height, header));
            if self.recent.len() > self.max_depth {
                self.recent.pop_front();
            }
        }
        debug!(count = events.len(), tip = %best.height, "best chain moved");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockRpc;
    use crate::test_util::*;
    use crate::types::{IndexedBlock, SequenceNotice};

    fn connected(block: &IndexedBlock) -> BlockEvent {
        BlockEvent {
            event_type: BlockEventType::Connected,
            height: block.height,
            header: block.header,
        }
    }

    fn disconnected(block: &IndexedBlock) -> BlockEvent {
        BlockEvent {
            event_type: BlockEventType::Disconnected,
            height: block.height,
            header: block.header,
        }
    }

    fn watcher(rpc: Arc<MockRpc>, depth: usize) -> PollingWatcher {
        PollingWatcher::new(rpc, Duration::from_secs(1), depth)
    }

    #[tokio::test]
    async fn announces_new_blocks_oldest_first() {
        let chain = build_chain(BlockHeight(0), 10);
        let rpc = Arc::new(MockRpc::builder().with_chain(chain[..6].to_vec()).build());
        let mut watcher = watcher(rpc.clone(), 10);

        assert!(watcher.poll().await.expect("poll").is_empty());
        assert!(watcher.poll().await.expect("poll").is_empty());

        rpc.set_chain(chain.clone());
        let events = watcher.poll().await.expect("poll");
        assert_eq!(events, chain[6..].iter().map(connected).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn reorg_disconnects_before_connecting() {
        let chain = build_chain(BlockHeight(0), 6);
        let rpc = Arc::new(MockRpc::builder().with_chain(chain[..4].to_vec()).build());
        let mut watcher = watcher(rpc.clone(), 10);
        watcher.poll().await.expect("poll");
        rpc.set_chain(chain.clone());
        watcher.poll().await.expect("poll");

        let fork = extend_chain(&chain[3], 3, 8);
        let mut reorged = chain[..4].to_vec();
        reorged.extend(fork.iter().cloned());
        rpc.set_chain(reorged);

        let events = watcher.poll().await.expect("poll");
        let mut expected = vec![disconnected(&chain[5]), disconnected(&chain[4])];
        expected.extend(fork.iter().map(connected));
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn deep_move_announces_only_the_new_tip() {
        let chain = build_chain(BlockHeight(0), 12);
        let rpc = Arc::new(MockRpc::builder().with_chain(chain[..3].to_vec()).build());
        let mut watcher = watcher(rpc.clone(), 2);
        watcher.poll().await.expect("poll");

        rpc.set_chain(chain.clone());
        let events = watcher.poll().await.expect("poll");
        assert_eq!(events, vec![connected(&chain[11])]);

        // the watch window restarts from the new tip
        let next = extend_chain(&chain[11], 1, 0);
        let mut extended = chain.clone();
        extended.extend(next.iter().cloned());
        rpc.set_chain(extended);
        assert_eq!(watcher.poll().await.expect("poll"), vec![connected(&next[0])]);
    }

    #[tokio::test]
    async fn poll_errors_surface() {
        let rpc = Arc::new(MockRpc::builder().with_chain(build_chain(BlockHeight(0), 2)).build());
        rpc.set_unreachable(true);
        assert!(watcher(rpc, 4).poll().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run_streams_block_events_until_cancelled() {
        let chain = build_chain(BlockHeight(0), 4);
        let rpc = Arc::new(MockRpc::builder().with_chain(chain[..3].to_vec()).build());
        let watcher = watcher(rpc.clone(), 8);
        let (tx, mut rx) = mpsc::channel::<BlockEvent>(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watcher.run(tx, cancel.clone()));

        // let the first tick record the starting tip
        time::sleep(Duration::from_millis(10)).await;
        rpc.set_chain(chain.clone());

        let event = rx.recv().await.expect("watcher announces the new block");
        assert_eq!(event, connected(&chain[3]));

        cancel.cancel();
        task.await.expect("watcher joins");
    }

    #[tokio::test(start_paused = true)]
    async fn run_reduces_events_to_notices() {
        let chain = build_chain(BlockHeight(0), 4);
        let rpc = Arc::new(MockRpc::builder().with_chain(chain[..3].to_vec()).build());
        let watcher = watcher(rpc.clone(), 8);
        let (tx, mut rx) = mpsc::channel::<SequenceNotice>(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watcher.run(tx, cancel.clone()));

        time::sleep(Duration::from_millis(10)).await;
        rpc.set_chain(chain.clone());

        let notice = rx.recv().await.expect("watcher announces the new block");
        assert_eq!(
            notice,
            SequenceNotice {
                hash: chain[3].hash(),
                event_type: BlockEventType::Connected,
            }
        );

        cancel.cancel();
        task.await.expect("watcher joins");
    }
}
