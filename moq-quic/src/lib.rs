//! QUIC client glue for the `moq-core` session engine.
//!
//! Binds the engine's transport traits to [quinn], owns the TLS
//! configuration, and classifies connect failures into the coarse result
//! codes reported across the library boundary.

mod client;
mod connect;
mod log;
mod quic;

pub use client::*;
pub use connect::*;
pub use log::*;
pub use quic::*;

// Re-export the underlying ecosystem for callers that need it.
pub use quinn;
pub use url;
