//! Generated gRPC client stubs.
//!
//! The message and service definitions live under `proto/` and are compiled
//! by `tonic-build` in `build.rs`. Nothing in this crate hand-rolls message
//! framing; everything downstream talks to these generated types.

pub mod shared {
    tonic::include_proto!("eventlog.shared");
}

pub mod streams {
    tonic::include_proto!("eventlog.streams");
}

pub mod persistent_subscriptions {
    tonic::include_proto!("eventlog.persistent_subscriptions");
}

pub mod gossip {
    tonic::include_proto!("eventlog.gossip");
}

pub mod server_features {
    tonic::include_proto!("eventlog.server_features");
}
