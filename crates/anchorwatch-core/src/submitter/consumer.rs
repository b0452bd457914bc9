use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::consensus::{CheckpointStatus, RawCheckpointWithMeta};
use crate::reporter::DispatchError;

use super::Submitter;

/// Feeds sealed checkpoints to a [`Submitter`], one at a time.
///
/// A failed submission is logged and dropped; the next checkpoint is handled
/// regardless. Re-delivery of still-sealed checkpoints is the poller's job.
pub struct SealedCheckpointConsumer {
    submitter: Submitter,
}

impl SealedCheckpointConsumer {
    pub fn new(submitter: Submitter) -> Self {
        Self { submitter }
    }

    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<RawCheckpointWithMeta>,
        cancel: CancellationToken,
    ) -> Result<(), DispatchError> {
        info!("checkpoint submitter running");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("checkpoint submitter cancelled");
                    return Ok(());
                }
                ckpt = rx.recv() => {
                    let ckpt = ckpt.ok_or(DispatchError::StreamEnded("checkpoints"))?;
                    self.handle(ckpt).await;
                }
            }
        }
    }

    async fn handle(&mut self, ckpt: RawCheckpointWithMeta) {
        if ckpt.status != CheckpointStatus::Sealed {
            debug!(epoch = ckpt.epoch(), status = %ckpt.status, "skipping checkpoint that is not sealed");
            return;
        }
        if let Err(failure) = self.submitter.submit(&ckpt).await {
            error!(
                epoch = failure.epoch,
                stage = %failure.stage,
                first_txid = ?failure.first_txid,
                error = %failure.source,
                "checkpoint submission failed"
            );
        }
    }
}
