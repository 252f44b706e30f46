//! Durable-store flush scheduler
//!
//! Accepted points are buffered in memory and drained to sqlite on a fixed
//! interval. The producer path never waits on the database; the trade-off
//! is at-least-once, best-effort durability with a bounded amount of
//! unflushed data.

use crate::cache::PointCache;
use grt_common::db::PointStore;
use grt_common::{time, PointRecord};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Consecutive failed flush cycles tolerated before the oldest batch is
/// dropped to bound memory. Dropping is the documented data-loss boundary:
/// the live cache is unaffected, only durable history goes incomplete.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Write buffer between the ingestion pipeline and the durable store
#[derive(Debug, Default)]
pub struct FlushBuffer {
    inner: Mutex<Vec<PointRecord>>,
}

impl FlushBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: PointRecord) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    /// Atomically swap the buffer for an empty one.
    ///
    /// Records arriving concurrently land in the fresh buffer and are picked
    /// up next cycle, never lost mid-swap.
    pub fn swap(&self) -> Vec<PointRecord> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodic task draining the flush buffer into the point store
pub struct FlushScheduler {
    buffer: Arc<FlushBuffer>,
    store: PointStore,
    cache: Arc<PointCache>,
    period: Duration,
    /// Failed batches waiting for retry, oldest first
    pending: VecDeque<Vec<PointRecord>>,
    consecutive_failures: u32,
}

impl FlushScheduler {
    pub fn new(
        buffer: Arc<FlushBuffer>,
        store: PointStore,
        cache: Arc<PointCache>,
        period: Duration,
    ) -> Self {
        Self {
            buffer,
            store,
            cache,
            period,
            pending: VecDeque::new(),
            consecutive_failures: 0,
        }
    }

    /// Run until the shutdown signal fires. A final flush attempt is made on
    /// shutdown so a clean stop loses nothing.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        info!(period_secs = self.period.as_secs(), "Flush scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_cycle().await;
                    // Batch eviction piggybacks on the flush tick; one sweep
                    // over the cache replaces any per-record deletion timers
                    self.cache.evict(time::now());
                }
                _ = shutdown.changed() => {
                    info!("Flush scheduler stopping, attempting final flush");
                    self.flush_cycle().await;
                    if !self.pending.is_empty() {
                        warn!(
                            batches = self.pending.len(),
                            "Shutting down with unflushed batches"
                        );
                    }
                    return;
                }
            }
        }
    }

    /// Number of batches waiting on retry
    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    /// One cycle: swap the buffer out, then try to land every pending batch
    /// oldest-first. On failure, batches stay queued for the next cycle;
    /// past the retry budget the oldest batch is dropped out loud.
    pub async fn flush_cycle(&mut self) {
        let batch = self.buffer.swap();
        if !batch.is_empty() {
            self.pending.push_back(batch);
        }
        if self.pending.is_empty() {
            debug!("Flush cycle: nothing to store");
            return;
        }

        while let Some(batch) = self.pending.front() {
            match self.store.append_points(batch).await {
                Ok(()) => {
                    info!(points = batch.len(), "Stored point batch");
                    self.pending.pop_front();
                    self.consecutive_failures = 0;
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    warn!(
                        error = %e,
                        attempt = self.consecutive_failures,
                        "Failed to store point batch, re-queued for next cycle"
                    );
                    if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        if let Some(dropped) = self.pending.pop_front() {
                            error!(
                                points = dropped.len(),
                                "Dropping oldest point batch after {} failed flush cycles; \
                                 durable history for this window will be incomplete",
                                self.consecutive_failures
                            );
                        }
                        self.consecutive_failures = 0;
                    }
                    // One failure ends the cycle; later batches wait their turn
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grt_common::PointSource;

    #[test]
    fn test_swap_leaves_empty_buffer() {
        let buffer = FlushBuffer::new();
        buffer.push(PointRecord {
            user_id: 1,
            guild_id: 2,
            source: PointSource::Message,
            timestamp: time::now(),
        });
        assert_eq!(buffer.len(), 1);

        let batch = buffer.swap();
        assert_eq!(batch.len(), 1);
        assert!(buffer.is_empty());
        assert!(buffer.swap().is_empty());
    }
}
