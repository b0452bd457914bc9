use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CheckpointStatus, ConsensusClient, RawCheckpointWithMeta};

/// Polls the consensus chain for checkpoints and feeds lifecycle changes
/// into the sealed-checkpoint channel.
///
/// A checkpoint is forwarded when its status changes. One that stays
/// `Sealed` is forwarded again every `resend_after`, which is how a failed
/// submission gets another attempt.
pub struct CheckpointPoller {
    client: Arc<dyn ConsensusClient>,
    poll_interval: Duration,
    resend_after: Duration,
    next_epoch: u64,
    seen: HashMap<u64, (CheckpointStatus, Instant)>,
}

impl CheckpointPoller {
    pub fn new(
        client: Arc<dyn ConsensusClient>,
        start_epoch: u64,
        poll_interval: Duration,
        resend_after: Duration,
    ) -> Self {
        Self {
            client,
            poll_interval,
            resend_after,
            next_epoch: start_epoch,
            seen: HashMap::new(),
        }
    }

    pub async fn run(
        mut self,
        out: mpsc::Sender<RawCheckpointWithMeta>,
        cancel: CancellationToken,
    ) {
        info!(from_epoch = self.next_epoch, "starting checkpoint poller");
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("checkpoint poller cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    let batch = match self.client.raw_checkpoints_since(self.next_epoch).await {
                        Ok(batch) => batch,
                        Err(e) => {
                            warn!(error = %e, from_epoch = self.next_epoch, "checkpoint poll failed");
                            continue;
                        }
                    };
                    for ckpt in self.select_updates(batch, Instant::now()) {
                        debug!(epoch = ckpt.epoch(), status = %ckpt.status, "forwarding checkpoint");
                        if out.send(ckpt).await.is_err() {
                            info!("checkpoint consumer gone, stopping poller");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Pick the checkpoints worth forwarding and advance past epochs that
    /// can no longer change.
    fn select_updates(
        &mut self,
        batch: Vec<RawCheckpointWithMeta>,
        now: Instant,
    ) -> Vec<RawCheckpointWithMeta> {
        let mut updates = Vec::new();
        for ckpt in batch {
            let epoch = ckpt.epoch();
            if epoch < self.next_epoch {
                continue;
            }
            let forward = match self.seen.get(&epoch) {
                None => true,
                Some((status, _)) if *status != ckpt.status => true,
                Some((_, sent_at)) => {
                    ckpt.status == CheckpointStatus::Sealed
                        && now.duration_since(*sent_at) >= self.resend_after
                }
            };
            if forward {
                self.seen.insert(epoch, (ckpt.status, now));
                updates.push(ckpt);
            }
        }

        while matches!(
            self.seen.get(&self.next_epoch),
            Some((CheckpointStatus::Finalized, _))
        ) {
            self.seen.remove(&self.next_epoch);
            self.next_epoch += 1;
        }
        updates
    }
}
