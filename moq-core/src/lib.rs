//! # moq-core: Media over QUIC session engine
//!
//! A client-side publish/subscribe engine for live data, multiplexing many
//! broadcasts over a single QUIC connection.
//!
//! The API is built around producer/consumer pairs, with the hierarchy:
//! - [Origin]: A collection of [Broadcast]s announced within a session.
//! - [Broadcast]: A collection of [Track]s, produced by a single publisher.
//! - [Track]: A collection of [Group]s, delivered in arrival order.
//! - [Group]: An ordered sequence of frames, each an opaque byte payload.
//!
//! The QUIC connection itself is an external capability; the engine is
//! generic over the [transport] traits and only assumes byte streams with
//! priorities.

mod coding;
mod error;
mod message;
mod model;
mod session;

pub mod transport;

pub use error::*;
pub use model::*;
pub use session::*;

// Re-export the bytes crate; payloads are `bytes::Bytes`.
pub use bytes;

/// The ALPN identifier negotiated during the QUIC handshake.
pub const ALPN: &str = "moq-sesame-00";
