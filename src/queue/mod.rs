//! Bounded in-memory priority queue for burst broadcasts.
//!
//! Messages are kept in descending priority order, first in first out among
//! equal priorities. When the queue is full the oldest message of the lowest
//! priority is evicted to make room.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::metrics::QueueMetrics;
use crate::pool::ConnectionId;
use crate::transport::Payload;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100_000;
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Connection a queued message is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Destination {
    pub pool_id: String,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub destination: Destination,
    pub payload: Payload,
    pub priority: i32,
    pub queued_at: DateTime<Utc>,
}

/// Outcome of one `process_queue` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
    pub batches: usize,
}

pub struct MessageQueue {
    entries: Mutex<VecDeque<QueuedMessage>>,
    max_size: usize,
    batch_size: usize,
    processing: AtomicBool,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_SIZE)
    }
}

/// Clears the processing flag when a drain ends, even if it is cancelled
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MessageQueue {
    pub fn new(max_size: usize) -> Self {
        Self::with_batch_size(max_size, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(max_size: usize, batch_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_size: max_size.max(1),
            batch_size: batch_size.max(1),
            processing: AtomicBool::new(false),
        }
    }

    /// Queue a message. Returns the message evicted to make room, if any.
    pub fn enqueue(
        &self,
        destination: Destination,
        payload: Payload,
        priority: i32,
    ) -> Option<QueuedMessage> {
        let message = QueuedMessage {
            destination,
            payload,
            priority,
            queued_at: Utc::now(),
        };

        let mut entries = self.entries.lock();

        let evicted = if entries.len() >= self.max_size {
            // Lowest priorities sit at the back; take the oldest of them
            let lowest = entries.back().map(|m| m.priority);
            lowest
                .map(|lowest| entries.partition_point(|m| m.priority > lowest))
                .and_then(|index| entries.remove(index))
        } else {
            None
        };

        let position = entries.partition_point(|m| m.priority >= message.priority);
        entries.insert(position, message);
        QueueMetrics::set_size(entries.len());
        drop(entries);

        if let Some(dropped) = &evicted {
            QueueMetrics::record_dropped();
            tracing::debug!(
                pool_id = %dropped.destination.pool_id,
                connection_id = %dropped.destination.connection_id,
                priority = dropped.priority,
                "Dropped lowest priority message from full queue"
            );
        }

        evicted
    }

    /// Deliver queued messages in batches until the queue is empty.
    ///
    /// Yields to the runtime between batches. If a drain is already running
    /// this returns immediately with an empty report.
    pub async fn process_queue<F>(&self, mut send: F) -> DrainReport
    where
        F: FnMut(&Destination, &Payload) -> bool,
    {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return DrainReport::default();
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut report = DrainReport::default();
        loop {
            let batch: Vec<QueuedMessage> = {
                let mut entries = self.entries.lock();
                let take = entries.len().min(self.batch_size);
                let batch = entries.drain(..take).collect();
                QueueMetrics::set_size(entries.len());
                batch
            };
            if batch.is_empty() {
                break;
            }

            report.batches += 1;
            for message in &batch {
                if send(&message.destination, &message.payload) {
                    report.delivered += 1;
                } else {
                    report.failed += 1;
                }
            }

            tokio::task::yield_now().await;
        }

        QueueMetrics::record_failed(report.failed as u64);
        tracing::debug!(
            delivered = report.delivered,
            failed = report.failed,
            batches = report.batches,
            "Message queue drained"
        );

        report
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Priorities in queue order
    pub fn priorities(&self) -> Vec<i32> {
        self.entries.lock().iter().map(|m| m.priority).collect()
    }
}
