//! Message Bus and the private per-user queue used by
//! [`crate::topic`] for role-filtered `CASE_DATA` delivery.
//!
//! Topics are per-session and ephemeral: there is no
//! cross-process fan-out here, a single-process authority is assumed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::trace;

use crate::types::{BusError, Envelope, SessionCode, UserId};

/// Bounded capacity for a topic's broadcast ring buffer. A subscriber that
/// falls this far behind loses the oldest unconsumed envelopes (tokio
/// broadcast's native lag behavior) rather than stalling the publisher.
const TOPIC_CAPACITY: usize = 256;

/// Bounded capacity for one user's private queue.
const PRIVATE_QUEUE_CAPACITY: usize = 32;

/// A subscription handle to a session topic.
pub struct Subscription {
    pub receiver: broadcast::Receiver<Envelope>,
}

/// A single user's private, ordered envelope queue. Bounded at
/// [`PRIVATE_QUEUE_CAPACITY`]; a publish against a full queue drops the
/// oldest queued envelope rather than the incoming one, so a lagging
/// subscriber always catches up to the latest `CASE_DATA`/`SESSION_UPDATE`
/// snapshot instead of getting stuck behind stale ones.
pub struct PrivateQueue {
    buffer: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    closed: AtomicBool,
}

impl PrivateQueue {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(PRIVATE_QUEUE_CAPACITY)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns `true` if the oldest queued envelope was dropped to make room.
    fn push(&self, envelope: Envelope) -> bool {
        let mut buffer = self.buffer.lock();
        let dropped = if buffer.len() >= PRIVATE_QUEUE_CAPACITY {
            buffer.pop_front();
            true
        } else {
            false
        };
        buffer.push_back(envelope);
        drop(buffer);
        self.notify.notify_one();
        dropped
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Awaits the next envelope, `None` once closed with nothing left queued.
    pub async fn recv(&self) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.buffer.lock().pop_front() {
                return Some(envelope);
            }
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            self.notify.notified().await;
        }
    }
}

/// Accepts `(topic, envelope)` publishes and delivers to every current
/// subscriber of that topic.
pub struct MessageBus {
    topics: DashMap<String, broadcast::Sender<Envelope>>,
    private_queues: DashMap<(SessionCode, UserId), Arc<PrivateQueue>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            private_queues: DashMap::new(),
        }
    }

    /// Idempotent subscribe: the first subscriber for a topic creates its
    /// broadcast channel; later subscribers join the same one.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let sender = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone();
        Subscription {
            receiver: sender.subscribe(),
        }
    }

    /// Idempotent unsubscribe: drops the topic's sender once nobody is
    /// listening, so ephemeral per-session topics do not leak.
    pub fn unsubscribe_if_empty(&self, topic: &str) {
        if let Some(entry) = self.topics.get(topic) {
            if entry.value().receiver_count() == 0 {
                drop(entry);
                self.topics.remove(topic);
            }
        }
    }

    /// Delivers `envelope` to every current subscriber of `topic`.
    /// Non-blocking: a slow subscriber only ever drops its own backlog, it
    /// never stalls the publisher.
    pub fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), BusError> {
        match self.topics.get(topic) {
            Some(sender) => {
                // send() only errors when there are zero receivers, which is
                // a normal and harmless race with the last subscriber
                // leaving; it is not a delivery failure worth surfacing.
                let _ = sender.send(envelope);
                Ok(())
            }
            None => {
                trace!(topic, "publish with no subscribers");
                Err(BusError::NoSubscribers)
            }
        }
    }

    /// Registers (or replaces) the private queue for `(session, user)`,
    /// returning the handle the caller's connection task awaits on.
    pub fn open_private_queue(&self, code: SessionCode, user: UserId) -> Arc<PrivateQueue> {
        let queue = Arc::new(PrivateQueue::new());
        self.private_queues.insert((code, user), queue.clone());
        queue
    }

    pub fn close_private_queue(&self, code: &SessionCode, user: &UserId) {
        if let Some((_, queue)) = self.private_queues.remove(&(code.clone(), user.clone())) {
            queue.close();
        }
    }

    /// Delivers directly to one user's private queue (used for `CASE_DATA`
    /// and role-filtered `SESSION_UPDATE` snapshots). Drops the oldest queued
    /// envelope on overflow rather than blocking the orchestrator, matching
    /// the shared-topic policy.
    pub fn publish_private(
        &self,
        code: &SessionCode,
        user: &UserId,
        envelope: Envelope,
    ) -> Result<(), BusError> {
        let Some(queue) = self.private_queues.get(&(code.clone(), user.clone())) else {
            return Err(BusError::NoSubscribers);
        };
        if queue.push(envelope) {
            trace!(
                session = %code,
                user = %user.0,
                "private queue full, dropped oldest envelope"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Phase, SessionCode};

    fn marker(n: u64) -> Envelope {
        Envelope::TimerStart {
            session_code: SessionCode::from_raw("000000"),
            phase: Phase::Reading,
            duration_seconds: n,
            start_timestamp: 0,
        }
    }

    fn duration_of(envelope: &Envelope) -> u64 {
        match envelope {
            Envelope::TimerStart { duration_seconds, .. } => *duration_seconds,
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[tokio::test]
    async fn private_queue_drops_oldest_on_overflow() {
        let queue = PrivateQueue::new();
        for n in 0..PRIVATE_QUEUE_CAPACITY as u64 + 2 {
            queue.push(marker(n));
        }
        // The first two pushes (0, 1) should have been dropped to make room.
        let first = queue.recv().await.unwrap();
        assert_eq!(duration_of(&first), 2);
    }

    #[tokio::test]
    async fn private_queue_recv_returns_none_once_closed_and_drained() {
        let queue = PrivateQueue::new();
        queue.push(marker(1));
        queue.close();
        assert_eq!(duration_of(&queue.recv().await.unwrap()), 1);
        assert!(queue.recv().await.is_none());
    }
}
