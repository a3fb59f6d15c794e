//! Activity Tracker.
//!
//! Holds one pending idle-timeout callback per `(sessionCode, userId)`.
//! `touch_activity` cancels and re-arms it; on expiry the tracker invokes the
//! injected `on_idle` callback, which the orchestrator wires to `Leave`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::scheduler::{BoxFuture, Scheduler, TimerHandle};
use crate::types::{SessionCode, UserId, DEFAULT_IDLE_TIMEOUT_SECS};

type IdleCallback = Arc<dyn Fn(SessionCode, UserId) -> BoxFuture + Send + Sync>;
type TimerMap = Arc<DashMap<(SessionCode, UserId), TimerHandle>>;

pub struct ActivityTracker {
    scheduler: Arc<dyn Scheduler>,
    idle_timeout: Duration,
    timers: TimerMap,
    on_idle: IdleCallback,
}

impl ActivityTracker {
    pub fn new(scheduler: Arc<dyn Scheduler>, on_idle: IdleCallback) -> Self {
        Self {
            scheduler,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            timers: Arc::new(DashMap::new()),
            on_idle,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Cancels and re-arms the watchdog for `(code, user)`.
    pub fn touch_activity(&self, code: SessionCode, user: UserId) {
        self.cancel_for(&code, &user);

        let key = (code.clone(), user.clone());
        let timers = self.timers.clone();
        let on_idle = self.on_idle.clone();
        let fire_code = code.clone();
        let fire_user = user.clone();

        let callback: BoxFuture = Box::pin(async move {
            timers.remove(&(fire_code.clone(), fire_user.clone()));
            debug!(session = %fire_code, user = %fire_user.0, "idle timeout expired");
            on_idle(fire_code, fire_user).await;
        });

        let handle = self.scheduler.schedule(self.idle_timeout, callback);
        self.timers.insert(key, handle);
    }

    /// Removes the watchdog for `(code, user)` without firing `on_idle`.
    /// Called on `Leave` and on session end.
    pub fn remove(&self, code: &SessionCode, user: &UserId) {
        self.cancel_for(code, user);
    }

    /// Removes every watchdog for a session (used on `endSession`).
    pub fn remove_session(&self, code: &SessionCode) {
        let keys: Vec<(SessionCode, UserId)> = self
            .timers
            .iter()
            .filter(|e| &e.key().0 == code)
            .map(|e| e.key().clone())
            .collect();
        for (code, user) in keys {
            self.cancel_for(&code, &user);
        }
    }

    fn cancel_for(&self, code: &SessionCode, user: &UserId) {
        if let Some((_, handle)) = self.timers.remove(&(code.clone(), user.clone())) {
            self.scheduler.cancel(handle);
        }
    }
}
