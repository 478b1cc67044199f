//! Persistent-subscription runtime: admin operations plus the bidirectional
//! read stream with its ack/nack batcher.
//!
//! Grounded on SPEC_FULL.md §4.7; default constants carried verbatim from
//! `esdbclient/common.py` (see §3 of SPEC_FULL.md).

pub mod admin;
pub mod batcher;
pub mod subscription;

pub use admin::PersistentSubscriptionsAdmin;
pub use subscription::{NackAction, PersistentSubscription};

/// Consumer strategy for a persistent subscription group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStrategy {
    DispatchToSingle,
    RoundRobin,
    Pinned,
}

/// Subscription settings, with the concrete defaults carried over from the
/// original implementation (SPEC_FULL.md §3).
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    pub resolve_links: bool,
    pub consumer_strategy: ConsumerStrategy,
    pub message_timeout: std::time::Duration,
    pub max_retry_count: i32,
    pub min_checkpoint_count: i32,
    pub max_checkpoint_count: i32,
    pub max_subscriber_count: i32,
    pub live_buffer_size: i32,
    pub read_batch_size: i32,
    pub history_buffer_size: i32,
    pub extra_statistics: bool,
    pub checkpoint_after: std::time::Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        SubscriptionSettings {
            resolve_links: false,
            consumer_strategy: ConsumerStrategy::DispatchToSingle,
            message_timeout: std::time::Duration::from_secs_f64(30.0),
            max_retry_count: 10,
            min_checkpoint_count: 10,
            max_checkpoint_count: 1000,
            max_subscriber_count: 5,
            live_buffer_size: 500,
            read_batch_size: 200,
            history_buffer_size: 500,
            extra_statistics: false,
            checkpoint_after: std::time::Duration::from_secs_f64(2.0),
        }
    }
}

/// Where a newly created (or updated) subscription's cursor starts.
#[derive(Debug, Clone, Copy)]
pub enum StartFrom {
    Start,
    End,
    Revision(u64),
}
