use std::sync::Arc;

use bitcoin::BlockHash;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::BlockCache;
use crate::error::CoreError;
use crate::retry::{RetryError, RetryPolicy};
use crate::rpc::BtcRpc;
use crate::types::{BlockEvent, BlockEventType, IndexedBlock, Point, SequenceNotice};

use super::bootstrap::{bootstrap, BootstrapOutcome};
use super::BlockReporter;

const QUERY_QUEUE_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0} stream ended")]
    StreamEnded(&'static str),

    #[error("could not bootstrap block cache: {0}")]
    Bootstrap(#[source] CoreError),
}

#[derive(Debug, thiserror::Error)]
#[error("block dispatcher is not running")]
pub struct DispatcherGone;

enum CacheQuery {
    Tip(oneshot::Sender<Option<Point>>),
    Base(oneshot::Sender<Option<Point>>),
    Points(oneshot::Sender<Vec<Point>>),
}

/// Read-only access to the dispatcher's block cache.
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::Sender<CacheQuery>,
}

impl CacheHandle {
    pub async fn tip(&self) -> Result<Option<Point>, DispatcherGone> {
        self.ask(CacheQuery::Tip).await
    }

    pub async fn base(&self) -> Result<Option<Point>, DispatcherGone> {
        self.ask(CacheQuery::Base).await
    }

    pub async fn points(&self) -> Result<Vec<Point>, DispatcherGone> {
        self.ask(CacheQuery::Points).await
    }

    async fn ask<T>(
        &self,
        query: impl FnOnce(oneshot::Sender<T>) -> CacheQuery,
    ) -> Result<T, DispatcherGone> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(query(reply)).await.map_err(|_| DispatcherGone)?;
        rx.await.map_err(|_| DispatcherGone)
    }
}

/// Applies base-chain block events to the block cache it owns.
///
/// An event is applied incrementally only when it lines up with the cache
/// tip; anything else rebuilds the cache from the node's best chain. Blocks
/// added to the cache are handed to the [`BlockReporter`], headers first.
pub struct Dispatcher {
    rpc: Arc<dyn BtcRpc>,
    reporter: Arc<dyn BlockReporter>,
    cache: BlockCache,
    retry: RetryPolicy,
    events: Option<mpsc::Receiver<BlockEvent>>,
    notices: Option<mpsc::Receiver<SequenceNotice>>,
    queries: Option<mpsc::Receiver<CacheQuery>>,
}

impl Dispatcher {
    pub fn new(
        rpc: Arc<dyn BtcRpc>,
        reporter: Arc<dyn BlockReporter>,
        cache: BlockCache,
        retry: RetryPolicy,
    ) -> (Self, CacheHandle) {
        let (tx, rx) = mpsc::channel(QUERY_QUEUE_SIZE);
        let dispatcher = Self {
            rpc,
            reporter,
            cache,
            retry,
            events: None,
            notices: None,
            queries: Some(rx),
        };
        (dispatcher, CacheHandle { tx })
    }

    pub fn with_block_events(mut self, events: mpsc::Receiver<BlockEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_sequence_notices(mut self, notices: mpsc::Receiver<SequenceNotice>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Bring the cache up to the best block, then apply events until
    /// cancelled or an input stream ends.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), DispatchError> {
        if !self.resync(false, &cancel).await? {
            return Ok(());
        }
        info!(
            tip = ?self.cache.tip().map(IndexedBlock::point),
            "block dispatcher running"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("block dispatcher cancelled");
                    return Ok(());
                }
                event = recv(&mut self.events) => {
                    let event = event.ok_or(DispatchError::StreamEnded("block events"))?;
                    if !self.apply_event(event, &cancel).await? {
                        return Ok(());
                    }
                }
                notice = recv(&mut self.notices) => {
                    let notice = notice.ok_or(DispatchError::StreamEnded("sequence notices"))?;
                    if !self.apply_notice(notice, &cancel).await? {
                        return Ok(());
                    }
                }
                query = recv(&mut self.queries) => match query {
                    Some(query) => self.answer(query),
                    None => self.queries = None,
                },
            }
        }
    }

    // The `bool` returned by the handlers below is false once cancellation
    // interrupted a resync.

    async fn apply_event(
        &mut self,
        event: BlockEvent,
        cancel: &CancellationToken,
    ) -> Result<bool, DispatchError> {
        debug!(kind = %event.event_type, height = %event.height, hash = %event.hash(), "block event");
        match event.event_type {
            BlockEventType::Connected => match self.rpc.get_block_by_hash(&event.hash()).await {
                Ok(block) => self.connect(block, cancel).await,
                Err(e) => {
                    warn!(hash = %event.hash(), error = %e, "could not fetch connected block");
                    self.resync(true, cancel).await
                }
            },
            BlockEventType::Disconnected => self.disconnect(event.hash(), cancel).await,
        }
    }

    async fn apply_notice(
        &mut self,
        notice: SequenceNotice,
        cancel: &CancellationToken,
    ) -> Result<bool, DispatchError> {
        debug!(kind = %notice.event_type, hash = %notice.hash, "sequence notice");
        match notice.event_type {
            BlockEventType::Connected => match self.rpc.get_block_by_hash(&notice.hash).await {
                Ok(block) => self.connect(block, cancel).await,
                Err(e) => {
                    warn!(hash = %notice.hash, error = %e, "could not fetch announced block");
                    self.resync(true, cancel).await
                }
            },
            BlockEventType::Disconnected => self.disconnect(notice.hash, cancel).await,
        }
    }

    async fn connect(
        &mut self,
        block: IndexedBlock,
        cancel: &CancellationToken,
    ) -> Result<bool, DispatchError> {
        let Some(tip) = self.cache.tip() else {
            warn!(height = %block.height, "block cache is empty, resyncing");
            return self.resync(true, cancel).await;
        };
        if block.hash() == tip.hash() {
            debug!(height = %block.height, "block already at cache tip");
            return Ok(true);
        }
        if block.prev_hash() != tip.hash() {
            warn!(
                height = %block.height,
                parent = %block.prev_hash(),
                tip = %tip.hash(),
                "connected block does not extend cache tip, resyncing"
            );
            return self.resync(true, cancel).await;
        }
        if let Err(e) = self.cache.add(block) {
            warn!(error = %e, "block rejected by cache, resyncing");
            return self.resync(true, cancel).await;
        }

        if let Some(added) = self.cache.tip() {
            let added = std::slice::from_ref(added);
            if let Err(e) = self.reporter.report_headers(added).await {
                error!(height = %added[0].height, error = %e, "failed to report header");
            }
            if let Err(e) = self.reporter.report_checkpoints(added).await {
                error!(height = %added[0].height, error = %e, "failed to report checkpoints");
            }
        }
        Ok(true)
    }

    async fn disconnect(
        &mut self,
        hash: BlockHash,
        cancel: &CancellationToken,
    ) -> Result<bool, DispatchError> {
        match self.cache.tip() {
            Some(tip) if tip.hash() == hash => {}
            tip => {
                warn!(
                    hash = %hash,
                    tip = ?tip.map(IndexedBlock::hash),
                    "disconnected block is not the cache tip, resyncing"
                );
                return self.resync(true, cancel).await;
            }
        }
        match self.cache.remove_last() {
            Ok(removed) => {
                info!(height = %removed.height, hash = %hash, "disconnected block");
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "failed to remove cache tip");
                self.resync(true, cancel).await
            }
        }
    }

    /// Rebuild the cache, retrying with backoff. Exhausted retries are fatal
    /// to the dispatcher.
    async fn resync(
        &mut self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<bool, DispatchError> {
        let rpc = self.rpc.as_ref();
        let current = &self.cache;
        let capacity = current.capacity();
        let outcome = self
            .retry
            .run("bootstrap", cancel, || async move {
                let mut cache = if force {
                    BlockCache::new(capacity)?
                } else {
                    current.clone()
                };
                let outcome = bootstrap(rpc, &mut cache, force).await?;
                Ok::<_, CoreError>((cache, outcome))
            })
            .await;

        match outcome {
            Ok((_, BootstrapOutcome::UpToDate)) => Ok(true),
            Ok((cache, BootstrapOutcome::Rebuilt { .. })) => {
                self.cache = cache;
                self.catch_up().await;
                Ok(true)
            }
            Err(RetryError::Cancelled) => Ok(false),
            Err(RetryError::Exhausted(e)) => Err(DispatchError::Bootstrap(e)),
        }
    }

    async fn catch_up(&mut self) {
        if let Err(e) = self.reporter.on_bootstrap(self.cache.as_slice()).await {
            error!(error = %e, "failed to report bootstrapped blocks");
        }
    }

    fn answer(&self, query: CacheQuery) {
        // replies to requesters that gave up are dropped
        match query {
            CacheQuery::Tip(reply) => {
                let _ = reply.send(self.cache.tip().map(IndexedBlock::point));
            }
            CacheQuery::Base(reply) => {
                let _ = reply.send(self.cache.base().map(IndexedBlock::point));
            }
            CacheQuery::Points(reply) => {
                let _ = reply.send(self.cache.points());
            }
        }
    }
}

/// Receive from an optional channel; a missing channel never yields.
async fn recv<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
