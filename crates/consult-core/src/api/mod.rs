//! HTTP/WebSocket edge.
//!
//! Thin adapter over [`crate::orchestrator::SessionOrchestrator`]: parses
//! requests, maps [`crate::types::OrchestratorError`] to status codes, and
//! upgrades topic subscriptions to WebSocket connections. Authentication,
//! authorization and rate limiting are the caller's responsibility — the
//! edge trusts the `userId`/`userName` it is given.

pub mod routes;
pub mod server;
pub mod types;
pub mod ws_handler;

pub use server::{HttpApiServer, SharedOrchestrator};
