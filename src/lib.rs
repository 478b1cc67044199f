//! A cluster-aware client for an append-only, optimistically-versioned
//! event log, speaking bidirectional gRPC to a replicated server.
//!
//! The entry point is [`client::Client`]: construct one from a connection
//! string with [`Client::connect`](client::Client::connect), or build a
//! [`uri::ConnectionSpec`] programmatically and pass it to
//! [`client::Client::new`]. From there, append/read/delete/tombstone
//! streams, or open a catch-up or persistent subscription.
//!
//! This crate never installs a `tracing` subscriber; wire it up in your own
//! binary if you want to see the `debug`/`warn`/`error` events it emits.

pub mod catchup;
pub mod client;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod event;
pub mod filter;
pub mod metadata;
pub mod persistent;
pub mod registry;
pub mod server_features;
pub mod streams;
pub mod uri;
pub mod wire;

pub use client::Client;
pub use error::{Error, Result};
pub use event::{NewEvent, RecordedEvent, StreamState};
pub use uri::ConnectionSpec;
