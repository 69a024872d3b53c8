//! Authenticated change stream: per-owner push of expense mutations over
//! WebSocket.
//!
//! Each accepted socket runs a credential handshake, then two tasks until it
//! dies: a read-loop enforcing the inbound deadline and a keep-alive task that
//! owns all writes (queued frames and pings). A single broadcaster drains the
//! publish queue and routes each event to its owner's connections.

pub mod broadcast;
pub mod connection;
pub mod errors;
pub mod handler;
pub mod handshake;
pub mod heartbeat;
pub mod hub;
pub mod ingress;
pub mod reader;
pub mod registry;
pub mod session;
