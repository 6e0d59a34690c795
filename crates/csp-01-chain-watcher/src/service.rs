//! # Chain Watcher Service
//!
//! Turns polling of the node's best chain into an ordered, restartable
//! stream of [`ChainEvent`]s.
//!
//! The watcher keeps a cursor (the last emitted block). The next block is
//! only emitted once it is `min_confirmations` deep and its parent hash
//! matches the cursor; a mismatch yields `Reorg` for the cursor height, and
//! keeps yielding it until the consumer resets the cursor.

use crate::domain::{ChainEvent, WatcherConfig, WatcherError};
use crate::ports::outbound::{ChainEventHandler, ChainSource};
use shared_types::{
    BlockHeight, ChainBlock, ChainTip, HealthMonitor, NodeError, ProcessedHeightMarker,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Confirmed-block event producer.
pub struct ChainWatcher {
    source: Arc<dyn ChainSource>,
    config: WatcherConfig,
    health: Arc<HealthMonitor>,
    cursor: Option<ProcessedHeightMarker>,
    pending_reorg: Option<BlockHeight>,
    known_tip: Option<ChainTip>,
}

impl ChainWatcher {
    /// Create a watcher starting from `cursor` (normally the ledger marker).
    pub fn new(
        source: Arc<dyn ChainSource>,
        config: WatcherConfig,
        health: Arc<HealthMonitor>,
        cursor: Option<ProcessedHeightMarker>,
    ) -> Self {
        Self {
            source,
            config,
            health,
            cursor,
            pending_reorg: None,
            known_tip: None,
        }
    }

    /// Last emitted (or reset) block.
    pub fn cursor(&self) -> Option<ProcessedHeightMarker> {
        self.cursor
    }

    /// Height the next `Block` event will carry.
    pub fn next_height(&self) -> BlockHeight {
        ProcessedHeightMarker::next_height(self.cursor.as_ref(), self.config.start_height)
    }

    /// Re-align the cursor with the consumer, clearing a pending reorg.
    pub fn reset_to(&mut self, marker: Option<ProcessedHeightMarker>) {
        if self.cursor != marker {
            debug!(
                "[csp-01] Cursor reset from {:?} to {:?}",
                self.cursor.map(|m| m.height),
                marker.map(|m| m.height)
            );
        }
        self.cursor = marker;
        self.pending_reorg = None;
    }

    /// Next event, or `None` when no further block is confirmed yet.
    ///
    /// Node errors are retried per the retry policy; an error is only
    /// returned once retries are exhausted, and the following call resumes
    /// from the same cursor.
    pub async fn next_event(&mut self) -> Result<Option<ChainEvent>, WatcherError> {
        if let Some(height) = self.pending_reorg {
            return Ok(Some(ChainEvent::Reorg { height }));
        }

        let next = self.next_height();
        let confirmed = match self.confirmed_tip(next).await? {
            Some(height) => height,
            None => return Ok(None),
        };
        if next > confirmed {
            return Ok(None);
        }

        let block = match self.fetch_block(next).await {
            Ok(block) => block,
            Err(NodeError::BlockNotFound(_)) => {
                // Tip moved backwards since it was cached.
                self.known_tip = None;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(cursor) = self.cursor {
            if cursor.height + 1 == block.height && block.prev_hash != cursor.hash {
                warn!(
                    "[csp-01] Block {} at height {} does not extend cursor {} at {}",
                    block.hash, block.height, cursor.hash, cursor.height
                );
                self.pending_reorg = Some(cursor.height);
                self.known_tip = None;
                return Ok(Some(ChainEvent::Reorg {
                    height: cursor.height,
                }));
            }
        }

        self.cursor = Some(ProcessedHeightMarker::new(block.height, block.hash));
        Ok(Some(ChainEvent::Block(block)))
    }

    async fn confirmed_tip(&mut self, next: BlockHeight) -> Result<Option<BlockHeight>, WatcherError> {
        if let Some(tip) = self.known_tip {
            if let Some(confirmed) = self.config.confirmed_height(tip.height) {
                if confirmed >= next {
                    return Ok(Some(confirmed));
                }
            }
        }
        let source = Arc::clone(&self.source);
        let tip = self.observe(self.config.retry.run("tip", || source.tip()).await)?;
        self.known_tip = Some(tip);
        Ok(self.config.confirmed_height(tip.height))
    }

    async fn fetch_block(&mut self, height: BlockHeight) -> Result<ChainBlock, NodeError> {
        let source = Arc::clone(&self.source);
        let result = self.config.retry.run("block", || source.block(height)).await;
        let block = match result {
            Err(NodeError::BlockNotFound(h)) => return Err(NodeError::BlockNotFound(h)),
            other => self.observe(other)?,
        };
        if block.height != height {
            return Err(NodeError::Protocol(format!(
                "asked for block {} but node returned {}",
                height, block.height
            )));
        }
        Ok(block)
    }

    fn observe<T>(&self, result: Result<T, NodeError>) -> Result<T, NodeError> {
        match &result {
            Ok(_) => self.health.record_success(),
            Err(e) => {
                self.health.record_failure(&e.to_string());
            }
        }
        result
    }

    /// Drain every available event into `handler`.
    ///
    /// Re-aligns with the handler's marker first and after each event.
    /// Returns the number of events handled.
    pub async fn poll_once(
        &mut self,
        handler: &dyn ChainEventHandler,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<usize, WatcherError> {
        self.reset_to(handler.marker().await?);

        let mut handled = 0;
        while !*shutdown.borrow() {
            let event = match self.next_event().await? {
                Some(event) => event,
                None => break,
            };
            let marker = handler.handle(event).await?;
            self.reset_to(marker);
            handled += 1;
        }
        Ok(handled)
    }

    /// Poll loop; returns when `shutdown` flips to `true`.
    pub async fn run(&mut self, handler: Arc<dyn ChainEventHandler>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[csp-01] Chain watcher started at height {} (min confirmations {})",
            self.next_height(),
            self.config.min_confirmations
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once(handler.as_ref(), &shutdown).await {
                        Ok(0) => {}
                        Ok(n) => debug!("[csp-01] Handled {} chain events, cursor {:?}", n, self.cursor.map(|m| m.height)),
                        Err(e) => warn!("[csp-01] Poll failed, retrying next interval: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("[csp-01] Chain watcher stopped at {:?}", self.cursor.map(|m| m.height));
    }
}
