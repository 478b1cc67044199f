fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Server stubs are compiled too (not just client), even though this
    // crate never runs a server in production: the integration tests under
    // tests/ stand up an in-process fake server against these same traits.
    tonic_build::configure().compile(
        &[
            "proto/shared.proto",
            "proto/streams.proto",
            "proto/persistent_subscriptions.proto",
            "proto/gossip.proto",
            "proto/server_features.proto",
        ],
        &["proto/"],
    )?;
    Ok(())
}
