//! # tally-server
//!
//! Axum HTTP + `WebSocket` server for the tally expense service.
//!
//! - HTTP endpoints: expense CRUD under `/api/expenses`, health, Prometheus metrics
//! - `WebSocket` change stream at `/api/stream/expenses`: credential handshake,
//!   per-owner routing, ping/pong liveness, single-fire eviction
//! - Publishing from mutation handlers via a non-blocking [`websocket::ingress::Publisher`]
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::TallyServer;
pub use websocket::hub::StreamHub;
pub use websocket::ingress::Publisher;
