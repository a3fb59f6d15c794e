//! Topic Subscription Endpoint.
//!
//! The long-lived per-connection object the edge holds for one subscriber of
//! one session topic. Merges the shared broadcast stream with the
//! subscriber's private queue and forwards activity pings to the Activity
//! Tracker; owns no session state itself.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::bus::PrivateQueue;
use crate::orchestrator::SessionOrchestrator;
use crate::types::{Envelope, SessionCode, UserId};

pub struct TopicSubscription {
    orchestrator: Arc<SessionOrchestrator>,
    code: SessionCode,
    user: UserId,
    topic_rx: broadcast::Receiver<Envelope>,
    private: Arc<PrivateQueue>,
    private_closed: bool,
}

impl TopicSubscription {
    /// Subscribes `user` to `code`'s topic and opens their private queue.
    /// Counts as activity, same as any inbound client message.
    pub fn open(orchestrator: Arc<SessionOrchestrator>, code: SessionCode, user: UserId) -> Self {
        let bus = orchestrator.bus();
        let topic_rx = bus.subscribe(&code.topic()).receiver;
        let private = bus.open_private_queue(code.clone(), user.clone());
        orchestrator.touch_activity(code.clone(), user.clone());
        Self {
            orchestrator,
            code,
            user,
            topic_rx,
            private,
            private_closed: false,
        }
    }

    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Next envelope addressed to this subscriber, merging the shared topic
    /// and the private queue. `None` once the shared topic itself closes
    /// (no path exists to re-subscribe a dropped topic).
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            if self.private_closed {
                return match self.topic_rx.recv().await {
                    Ok(envelope) => Some(envelope),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session = %self.code, user = %self.user.0, skipped, "subscriber lagged, envelopes dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => None,
                };
            }

            tokio::select! {
                biased;
                private = self.private.recv() => {
                    match private {
                        Some(envelope) => return Some(envelope),
                        None => {
                            self.private_closed = true;
                            continue;
                        }
                    }
                }
                shared = self.topic_rx.recv() => {
                    match shared {
                        Ok(envelope) => return Some(envelope),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(session = %self.code, user = %self.user.0, skipped, "subscriber lagged, envelopes dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        }
    }

    /// Forwarded to the Activity Tracker on every inbound client message.
    pub fn touch_activity(&self) {
        self.orchestrator
            .touch_activity(self.code.clone(), self.user.clone());
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        let bus = self.orchestrator.bus();
        bus.close_private_queue(&self.code, &self.user);
        bus.unsubscribe_if_empty(&self.code.topic());
    }
}
