//! Relay Transport Layer
//!
//! Provides the WebSocket transport for the relay server.
//! The transport layer handles:
//! - Connection lifecycle (open, frame, close)
//! - Per-connection outbound queues
//! - Heartbeat pings
//! - Connection cap and health endpoint
//!
//! The transport is decoupled from command routing via the `FrameHandler` trait.

pub mod client;
pub mod server;

pub use client::{ClientSocket, Outbound};
pub use server::{FrameHandler, FrameVerdict, TransportConfig, TransportServer};
