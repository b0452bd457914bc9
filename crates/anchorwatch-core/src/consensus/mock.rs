use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::block::Header;

use super::{ConsensusClient, ConsensusError, ExtractedCheckpoint, RawCheckpointWithMeta};

/// A consensus-chain client that records every submission and serves a
/// canned checkpoint list.
#[derive(Default)]
pub struct RecordingConsensus {
    headers: Mutex<Vec<Header>>,
    header_batches: AtomicUsize,
    checkpoints: Mutex<Vec<ExtractedCheckpoint>>,
    available: Mutex<Vec<RawCheckpointWithMeta>>,
    checkpoint_queries: AtomicUsize,
    rejecting: AtomicBool,
}

impl RecordingConsensus {
    pub fn set_checkpoints(&self, checkpoints: Vec<RawCheckpointWithMeta>) {
        *self.available.lock().expect("mock state lock") = checkpoints;
    }

    /// Make every submission fail with a 503.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub fn headers(&self) -> Vec<Header> {
        self.headers.lock().expect("mock state lock").clone()
    }

    pub fn header_batches(&self) -> usize {
        self.header_batches.load(Ordering::SeqCst)
    }

    pub fn checkpoints(&self) -> Vec<ExtractedCheckpoint> {
        self.checkpoints.lock().expect("mock state lock").clone()
    }

    pub fn checkpoint_queries(&self) -> usize {
        self.checkpoint_queries.load(Ordering::SeqCst)
    }

    fn check_accepting(&self) -> Result<(), ConsensusError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(ConsensusError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConsensusClient for RecordingConsensus {
    async fn submit_headers(&self, headers: &[Header]) -> Result<(), ConsensusError> {
        self.check_accepting()?;
        self.header_batches.fetch_add(1, Ordering::SeqCst);
        self.headers
            .lock()
            .expect("mock state lock")
            .extend_from_slice(headers);
        Ok(())
    }

    async fn submit_checkpoint(&self, ckpt: &ExtractedCheckpoint) -> Result<(), ConsensusError> {
        self.check_accepting()?;
        self.checkpoints
            .lock()
            .expect("mock state lock")
            .push(ckpt.clone());
        Ok(())
    }

    async fn raw_checkpoints_since(
        &self,
        epoch: u64,
    ) -> Result<Vec<RawCheckpointWithMeta>, ConsensusError> {
        self.checkpoint_queries.fetch_add(1, Ordering::SeqCst);
        let available = self.available.lock().expect("mock state lock");
        Ok(available
            .iter()
            .filter(|ckpt| ckpt.epoch() >= epoch)
            .cloned()
            .collect())
    }
}
