//! Session Orchestration Core.
//!
//! Phase state machine, participant registry, timers, message bus and
//! repository contracts backing live, timed, role-based practice sessions.
//! The HTTP/WebSocket edge lives behind the `http-api` feature; this crate is
//! usable standalone (e.g. embedded, or driven directly in tests) without it.

pub mod activity;
pub mod bus;
pub mod config;
pub mod feedback_store;
pub mod orchestrator;
pub mod phase;
pub mod projection;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod topic;
pub mod types;

#[cfg(feature = "http-api")]
pub mod api;

pub use config::{Config, ConfigError};
pub use orchestrator::{CreateSessionInput, SessionOrchestrator};
pub use scheduler::{Scheduler, TokioScheduler};
pub use topic::TopicSubscription;

#[cfg(feature = "http-api")]
pub use api::HttpApiServer;
