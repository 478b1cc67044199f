//! Top-level client facade: composes the connection manager, streams
//! facade, persistent-subscription admin surface, and the streamer
//! registry into one entry point.
//!
//! Grounded on `transport/client.rs`'s `Client<Protocol>` for the
//! "one struct owns the connection and exposes the public surface" shape.

use std::sync::Arc;

use crate::catchup::{CatchupOptions, CatchupSubscription, StartFrom as CatchupStartFrom};
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::event::{NewEvent, RecordedEvent, StreamState};
use crate::filter::StreamFilter;
use crate::metadata::CallOptions;
use crate::persistent::subscription::PersistentSubscription;
use crate::persistent::{PersistentSubscriptionsAdmin, StartFrom as PersistentStartFrom, SubscriptionSettings};
use crate::registry::{Registry, Stoppable};
use crate::server_features::ServerFeatures;
use crate::streams::{Direction, Streams};
use crate::uri::ConnectionSpec;
use crate::wire::server_features::SupportedMethods;

/// The event-log client. Cheap to clone (an `Arc` wrapper internally would
/// be redundant — callers wrap it in `Arc` themselves if they need to share
/// it across tasks, matching how the connection manager is already `Arc`'d).
pub struct Client {
    connection: Arc<ConnectionManager>,
    streams: Streams,
    persistent_admin: PersistentSubscriptionsAdmin,
    server_features: ServerFeatures,
    registry: Arc<Registry>,
}

impl Client {
    pub fn new(spec: ConnectionSpec) -> Self {
        let connection = Arc::new(ConnectionManager::new(spec));
        Client {
            streams: Streams::new(connection.clone()),
            persistent_admin: PersistentSubscriptionsAdmin::new(connection.clone()),
            server_features: ServerFeatures::new(connection.clone()),
            registry: Registry::new(),
            connection,
        }
    }

    pub async fn supported_methods(&self, call: &CallOptions) -> Result<SupportedMethods> {
        self.server_features.supported_methods(call).await
    }

    pub fn connect(uri: &str) -> Result<Self> {
        let spec: ConnectionSpec = uri.parse()?;
        Ok(Self::new(spec))
    }

    pub async fn append(
        &self,
        stream: &str,
        expected: StreamState,
        events: &[NewEvent],
        call: &CallOptions,
    ) -> Result<u64> {
        self.streams.append(stream, expected, events, call).await
    }

    pub async fn read_stream(
        &self,
        stream: &str,
        from: StreamState,
        direction: Direction,
        count: u64,
        resolve_links: bool,
        call: &CallOptions,
    ) -> Result<Vec<RecordedEvent>> {
        self.streams
            .read_stream(stream, from, direction, count, resolve_links, call)
            .await
    }

    pub async fn read_all(
        &self,
        from_commit: Option<u64>,
        direction: Direction,
        count: u64,
        filter: Option<&StreamFilter>,
        resolve_links: bool,
        call: &CallOptions,
    ) -> Result<Vec<RecordedEvent>> {
        self.streams
            .read_all(from_commit, direction, count, filter, resolve_links, call)
            .await
    }

    pub async fn delete(&self, stream: &str, expected: StreamState, call: &CallOptions) -> Result<Option<u64>> {
        self.streams.delete(stream, expected, call).await
    }

    pub async fn tombstone(
        &self,
        stream: &str,
        expected: StreamState,
        call: &CallOptions,
    ) -> Result<Option<u64>> {
        self.streams.tombstone(stream, expected, call).await
    }

    pub async fn get_stream_metadata(
        &self,
        stream: &str,
        call: &CallOptions,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        self.streams.get_stream_metadata(stream, call).await
    }

    pub async fn set_stream_metadata(
        &self,
        stream: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
        expected: StreamState,
        call: &CallOptions,
    ) -> Result<u64> {
        self.streams
            .set_stream_metadata(stream, metadata, expected, call)
            .await
    }

    /// Open a catch-up subscription. `stream` of `None` subscribes to
    /// `$all`. The returned handle self-registers with the client's
    /// streamer registry so it is stopped by `close()`.
    pub async fn subscribe_catchup(
        &self,
        stream: Option<String>,
        from: CatchupStartFrom,
        options: CatchupOptions,
        call: CallOptions,
    ) -> Result<Arc<CatchupSubscription>> {
        let subscription = CatchupSubscription::open(self.connection.clone(), stream, from, options, call).await?;
        let as_stoppable: Arc<dyn Stoppable> = subscription.clone();
        self.registry.register(&as_stoppable);
        Ok(subscription)
    }

    /// Open the read side of a persistent subscription. The returned handle
    /// self-registers with the client's streamer registry.
    pub async fn subscribe_persistent(
        &self,
        stream: Option<String>,
        group: String,
        buffer_size: i32,
        call: CallOptions,
    ) -> Result<Arc<PersistentSubscription>> {
        let subscription =
            PersistentSubscription::open(self.connection.clone(), stream, group, buffer_size, call).await?;
        let as_stoppable: Arc<dyn Stoppable> = subscription.clone();
        self.registry.register(&as_stoppable);
        Ok(subscription)
    }

    pub async fn create_persistent_subscription(
        &self,
        stream: Option<&str>,
        group: &str,
        settings: &SubscriptionSettings,
        start_from: PersistentStartFrom,
        call: &CallOptions,
    ) -> Result<()> {
        self.persistent_admin
            .create(stream, group, settings, start_from, call)
            .await
    }

    pub async fn update_persistent_subscription(
        &self,
        stream: Option<&str>,
        group: &str,
        settings: &SubscriptionSettings,
        start_from: Option<PersistentStartFrom>,
        call: &CallOptions,
    ) -> Result<()> {
        self.persistent_admin
            .update(stream, group, settings, start_from, call)
            .await
    }

    pub async fn delete_persistent_subscription(
        &self,
        stream: Option<&str>,
        group: &str,
        call: &CallOptions,
    ) -> Result<()> {
        self.persistent_admin.delete(stream, group, call).await
    }

    pub async fn replay_parked_events(
        &self,
        stream: Option<&str>,
        group: &str,
        stop_at: Option<i64>,
        call: &CallOptions,
    ) -> Result<()> {
        self.persistent_admin
            .replay_parked(stream, group, stop_at, call)
            .await
    }

    /// Stop every open subscription and drop the held transport channel.
    /// Idempotent.
    pub async fn close(&self) {
        self.registry.close_all();
        self.connection.close().await;
    }
}
