//! Connection manager: holds at most one active transport channel and
//! coordinates reconnect-on-demand.
//!
//! Grounded on `transport/client.rs`'s `Client<Protocol>`, which holds a
//! `Backoff` and serializes `connect()` attempts; here the session-typed
//! `retry::Connector` chain is replaced by a hand-rolled discovery-then-
//! connect retry loop since there is no dialectic `Chan` to resume, only a
//! tonic `Channel` to rebuild from scratch.

use std::sync::Arc;

use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use crate::discovery::{self, ClusterMember};
use crate::error::Result;
use crate::uri::ConnectionSpec;

/// Exponential backoff with a cap, used between reconnect attempts.
///
/// Grounded on `transport/client.rs`'s `Backoff` (initial/max delay, factor).
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: std::time::Duration,
    max: std::time::Duration,
    factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            initial: std::time::Duration::from_millis(50),
            max: std::time::Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl Backoff {
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let scaled = self.initial.as_secs_f64() * self.factor.powi(attempt as i32);
        std::time::Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }
}

struct Inner {
    channel: Option<(Channel, ClusterMember)>,
}

/// Holds at most one channel; safe for concurrent use, with reconnects
/// serialized behind a mutex so a storm of failed calls produces exactly
/// one discovery pass (SPEC_FULL.md §5).
pub struct ConnectionManager {
    spec: ConnectionSpec,
    backoff: Backoff,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(spec: ConnectionSpec) -> Self {
        ConnectionManager {
            spec,
            backoff: Backoff::default(),
            inner: Mutex::new(Inner { channel: None }),
        }
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    /// Return the current channel, discovering and connecting one if none is
    /// held yet.
    pub async fn acquire(self: &Arc<Self>) -> Result<Channel> {
        let mut guard = self.inner.lock().await;
        if let Some((channel, _)) = &guard.channel {
            return Ok(channel.clone());
        }
        let (channel, member) = self.discover_and_connect().await?;
        guard.channel = Some((channel.clone(), member));
        Ok(channel)
    }

    /// Drop the held channel and run discovery again. Called by the facade
    /// whenever translation yields `ServiceUnavailable`, `NodeIsNotLeader`,
    /// or a closed-channel error.
    pub async fn reopen(self: &Arc<Self>) -> Result<Channel> {
        let mut guard = self.inner.lock().await;
        guard.channel = None;
        let (channel, member) = self.discover_and_connect().await?;
        guard.channel = Some((channel.clone(), member));
        Ok(channel)
    }

    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        guard.channel = None;
    }

    async fn discover_and_connect(&self) -> Result<(Channel, ClusterMember)> {
        let member = discovery::discover(&self.spec).await?;

        let mut attempt = 0u32;
        let mut last_err = None;
        while attempt < self.spec.options.max_discover_attempts {
            match discovery::connect_to(&member, &self.spec).await {
                Ok(channel) => {
                    info!(address = %member.address, port = member.port, "connected");
                    return Ok((channel, member));
                }
                Err(e) => {
                    warn!(error = %e, attempt, "connect to discovered node failed");
                    last_err = Some(e);
                }
            }
            attempt += 1;
            let delay = self.backoff.delay_for_attempt(attempt);
            debug!(?delay, attempt, "backing off before reconnect attempt");
            tokio::time::sleep(delay).await;
        }
        Err(last_err.expect("loop runs at least once since max_discover_attempts >= 1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let b = Backoff::default();
        let d0 = b.delay_for_attempt(0);
        let d5 = b.delay_for_attempt(5);
        let d50 = b.delay_for_attempt(50);
        assert!(d5 > d0);
        assert!(d50 <= b.max);
    }
}
