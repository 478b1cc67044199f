//! Persistent-subscription admin operations: create, update, delete,
//! get-info, list, replay-parked. All run against the leader and retry once
//! on `NodeIsNotLeader`, per SPEC_FULL.md §4.7.

use std::sync::Arc;

use tonic::Request;

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::metadata::CallOptions;
use crate::persistent::{ConsumerStrategy, StartFrom, SubscriptionSettings};
use crate::wire::persistent_subscriptions::create_req::options::StreamOption as CreateStreamOption;
use crate::wire::persistent_subscriptions::create_req::options::StartFrom as CreateStartFrom;
use crate::wire::persistent_subscriptions::persistent_subscriptions_client::PersistentSubscriptionsClient;
use crate::wire::persistent_subscriptions::update_req::options::StartFrom as UpdateStartFrom;
use crate::wire::persistent_subscriptions::{
    self as wire, ConsumerStrategy as WireConsumerStrategy, CreateReq, DeleteReq, GetInfoReq,
    GetInfoResp, ListReq, ListResp, ReplayParkedReq, SubscriptionInfo, UpdateReq,
};
use crate::wire::shared::{Empty, StreamIdentifier};

fn wire_settings(s: &SubscriptionSettings) -> wire::SubscriptionSettings {
    wire::SubscriptionSettings {
        resolve_links: s.resolve_links,
        consumer_strategy: match s.consumer_strategy {
            ConsumerStrategy::DispatchToSingle => WireConsumerStrategy::DispatchToSingle as i32,
            ConsumerStrategy::RoundRobin => WireConsumerStrategy::RoundRobin as i32,
            ConsumerStrategy::Pinned => WireConsumerStrategy::Pinned as i32,
        },
        message_timeout_ms: s.message_timeout.as_millis() as i32,
        max_retry_count: s.max_retry_count,
        min_checkpoint_count: s.min_checkpoint_count,
        max_checkpoint_count: s.max_checkpoint_count,
        max_subscriber_count: s.max_subscriber_count,
        live_buffer_size: s.live_buffer_size,
        read_batch_size: s.read_batch_size,
        history_buffer_size: s.history_buffer_size,
        extra_statistics: s.extra_statistics,
        checkpoint_after_ms: s.checkpoint_after.as_millis() as i32,
    }
}

fn stream_identifier(name: &str) -> StreamIdentifier {
    StreamIdentifier {
        stream_name: name.as_bytes().to_vec(),
    }
}

/// Admin surface for persistent subscriptions, sharing the connection
/// manager with the streams facade.
pub struct PersistentSubscriptionsAdmin {
    connection: Arc<ConnectionManager>,
}

impl PersistentSubscriptionsAdmin {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        PersistentSubscriptionsAdmin { connection }
    }

    async fn client(&self) -> Result<PersistentSubscriptionsClient<tonic::transport::Channel>> {
        Ok(PersistentSubscriptionsClient::new(
            self.connection.acquire().await?,
        ))
    }

    async fn with_leader_retry<F, Fut, T>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match call().await {
            Err(e) if e.triggers_rediscovery(true) => {
                self.connection.reopen().await?;
                call().await
            }
            other => other,
        }
    }

    pub async fn create(
        &self,
        stream: Option<&str>,
        group: &str,
        settings: &SubscriptionSettings,
        start_from: StartFrom,
        call: &CallOptions,
    ) -> Result<()> {
        self.with_leader_retry(|| async {
            let mut client = self.client().await?;
            let options = crate::wire::persistent_subscriptions::create_req::Options {
                stream_identifier: stream.map(stream_identifier),
                group_name: group.to_string(),
                settings: Some(wire_settings(settings)),
                stream_option: Some(CreateStreamOption::All(Empty {})),
                start_from: Some(match start_from {
                    StartFrom::Start => CreateStartFrom::Start(Empty {}),
                    StartFrom::End => CreateStartFrom::End(Empty {}),
                    StartFrom::Revision(n) => CreateStartFrom::Revision(n),
                }),
            };
            let request = crate::metadata::apply_metadata(
                Request::new(CreateReq {
                    options: Some(options),
                }),
                call,
                self.connection.spec().credentials.as_ref(),
                self.connection.spec().options.node_preference,
                self.connection.spec().options.default_deadline,
            );
            client.create(request).await.map_err(Error::from_status)?;
            Ok(())
        })
        .await
    }

    pub async fn update(
        &self,
        stream: Option<&str>,
        group: &str,
        settings: &SubscriptionSettings,
        start_from: Option<StartFrom>,
        call: &CallOptions,
    ) -> Result<()> {
        self.with_leader_retry(|| async {
            let mut client = self.client().await?;
            let options = crate::wire::persistent_subscriptions::update_req::Options {
                stream_identifier: stream.map(stream_identifier),
                group_name: group.to_string(),
                settings: Some(wire_settings(settings)),
                start_from: start_from.map(|s| match s {
                    StartFrom::Start => UpdateStartFrom::Start(Empty {}),
                    StartFrom::End => UpdateStartFrom::End(Empty {}),
                    StartFrom::Revision(n) => UpdateStartFrom::Revision(n),
                }),
            };
            let request = crate::metadata::apply_metadata(
                Request::new(UpdateReq {
                    options: Some(options),
                }),
                call,
                self.connection.spec().credentials.as_ref(),
                self.connection.spec().options.node_preference,
                self.connection.spec().options.default_deadline,
            );
            client.update(request).await.map_err(Error::from_status)?;
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, stream: Option<&str>, group: &str, call: &CallOptions) -> Result<()> {
        self.with_leader_retry(|| async {
            let mut client = self.client().await?;
            let request = crate::metadata::apply_metadata(
                Request::new(DeleteReq {
                    stream_identifier: stream.map(stream_identifier),
                    group_name: group.to_string(),
                }),
                call,
                self.connection.spec().credentials.as_ref(),
                self.connection.spec().options.node_preference,
                self.connection.spec().options.default_deadline,
            );
            client.delete(request).await.map_err(Error::from_status)?;
            Ok(())
        })
        .await
    }

    pub async fn get_info(
        &self,
        stream: Option<&str>,
        group: &str,
        call: &CallOptions,
    ) -> Result<SubscriptionInfo> {
        self.with_leader_retry(|| async {
            let mut client = self.client().await?;
            let request = crate::metadata::apply_metadata(
                Request::new(GetInfoReq {
                    stream_identifier: stream.map(stream_identifier),
                    group_name: group.to_string(),
                }),
                call,
                self.connection.spec().credentials.as_ref(),
                self.connection.spec().options.node_preference,
                self.connection.spec().options.default_deadline,
            );
            let resp: GetInfoResp = client
                .get_info(request)
                .await
                .map_err(Error::from_status)?
                .into_inner();
            resp.subscription_info
                .ok_or_else(|| Error::SubscriptionNotFound)
        })
        .await
    }

    pub async fn list(&self, stream: Option<&str>, call: &CallOptions) -> Result<Vec<SubscriptionInfo>> {
        self.with_leader_retry(|| async {
            let mut client = self.client().await?;
            let list_option = match stream {
                Some(name) => {
                    crate::wire::persistent_subscriptions::list_req::options::ListOption::ListForStream(
                        stream_identifier(name),
                    )
                }
                None => crate::wire::persistent_subscriptions::list_req::options::ListOption::ListAllSubscriptions(
                    Empty {},
                ),
            };
            let request = crate::metadata::apply_metadata(
                Request::new(ListReq {
                    options: Some(crate::wire::persistent_subscriptions::list_req::Options {
                        list_option: Some(list_option),
                    }),
                }),
                call,
                self.connection.spec().credentials.as_ref(),
                self.connection.spec().options.node_preference,
                self.connection.spec().options.default_deadline,
            );
            let resp: ListResp = client.list(request).await.map_err(Error::from_status)?.into_inner();
            Ok(resp.subscriptions)
        })
        .await
    }

    pub async fn replay_parked(
        &self,
        stream: Option<&str>,
        group: &str,
        stop_at: Option<i64>,
        call: &CallOptions,
    ) -> Result<()> {
        self.with_leader_retry(|| async {
            let mut client = self.client().await?;
            let limit_option = match stop_at {
                Some(n) => crate::wire::persistent_subscriptions::replay_parked_req::LimitOption::StopAt(n),
                None => crate::wire::persistent_subscriptions::replay_parked_req::LimitOption::NoLimit(
                    Empty {},
                ),
            };
            let request = crate::metadata::apply_metadata(
                Request::new(ReplayParkedReq {
                    stream_identifier: stream.map(stream_identifier),
                    group_name: group.to_string(),
                    limit_option: Some(limit_option),
                }),
                call,
                self.connection.spec().credentials.as_ref(),
                self.connection.spec().options.node_preference,
                self.connection.spec().options.default_deadline,
            );
            client
                .replay_parked(request)
                .await
                .map_err(Error::from_status)?;
            Ok(())
        })
        .await
    }
}
