//! Reporter side of the relayer: keeps the block cache in step with the base
//! chain and forwards headers and checkpoints to the consensus chain.
//!
//! - [`bootstrap`] rebuilds the cache from the node's best chain.
//! - [`Dispatcher`] owns the cache and applies block events to it.
//! - [`Reporter`] is the default [`BlockReporter`], extracting checkpoints
//!   with [`CheckpointExtractor`].

mod bootstrap;
mod dispatcher;
mod extract;

pub use bootstrap::{bootstrap, BootstrapOutcome};
pub use dispatcher::{CacheHandle, DispatchError, Dispatcher, DispatcherGone};
pub use extract::CheckpointExtractor;

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::block::Header;
use tracing::{debug, info};

use crate::consensus::{ConsensusClient, ConsensusError};
use crate::types::IndexedBlock;

/// Receives blocks accepted into the cache. Errors are logged by the
/// dispatcher and never retried.
#[async_trait]
pub trait BlockReporter: Send + Sync {
    async fn report_headers(&self, blocks: &[IndexedBlock]) -> Result<(), ConsensusError>;

    async fn report_checkpoints(&self, blocks: &[IndexedBlock]) -> Result<(), ConsensusError>;

    /// Called with the whole window after the cache was rebuilt.
    async fn on_bootstrap(&self, _blocks: &[IndexedBlock]) -> Result<(), ConsensusError> {
        Ok(())
    }
}

/// Forwards headers and extracted checkpoints to a [`ConsensusClient`].
pub struct Reporter {
    consensus: Arc<dyn ConsensusClient>,
    extractor: CheckpointExtractor,
    report_on_bootstrap: bool,
}

impl Reporter {
    pub fn new(
        consensus: Arc<dyn ConsensusClient>,
        extractor: CheckpointExtractor,
        report_on_bootstrap: bool,
    ) -> Self {
        Self {
            consensus,
            extractor,
            report_on_bootstrap,
        }
    }
}

#[async_trait]
impl BlockReporter for Reporter {
    async fn report_headers(&self, blocks: &[IndexedBlock]) -> Result<(), ConsensusError> {
        if blocks.is_empty() {
            return Ok(());
        }
        let headers: Vec<Header> = blocks.iter().map(|b| b.header).collect();
        self.consensus.submit_headers(&headers).await?;
        debug!(
            count = headers.len(),
            tip = %blocks[blocks.len() - 1].height,
            "reported headers"
        );
        Ok(())
    }

    async fn report_checkpoints(&self, blocks: &[IndexedBlock]) -> Result<(), ConsensusError> {
        for block in blocks {
            for ckpt in self.extractor.scan(block) {
                info!(
                    epoch = ckpt.ckpt.epoch_num,
                    height = %block.height,
                    first_txid = %ckpt.first.txid,
                    second_txid = %ckpt.second.txid,
                    "found checkpoint on base chain"
                );
                self.consensus.submit_checkpoint(&ckpt).await?;
            }
        }
        Ok(())
    }

    async fn on_bootstrap(&self, blocks: &[IndexedBlock]) -> Result<(), ConsensusError> {
        if !self.report_on_bootstrap {
            return Ok(());
        }
        info!(count = blocks.len(), "catching up reports after bootstrap");
        self.report_headers(blocks).await?;
        self.report_checkpoints(blocks).await
    }
}
