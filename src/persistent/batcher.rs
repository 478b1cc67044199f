//! Ack/nack batcher: coalesces outbound ack/nack frames to reduce chatter.
//!
//! Grounded on SPEC_FULL.md §4.7.1 / §9 ("Ack batcher is naturally a
//! producer/consumer... implemented with an mpsc channel plus
//! `tokio::time::Interval`, not per-call timers").

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use uuid::Uuid;

use crate::wire::persistent_subscriptions::read_req::{Ack, Nack, NackAction as WireNackAction};
use crate::wire::persistent_subscriptions::ReadReq;
use crate::wire::shared::{uuid as wire_uuid, Uuid as WireUuid};

pub const MAX_ACK_BATCH_SIZE: usize = 50;
pub const MAX_ACK_DELAY: Duration = Duration::from_millis(200);
pub const STOPPING_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackAction {
    Park,
    Retry,
    Skip,
    Stop,
}

impl From<NackAction> for WireNackAction {
    fn from(a: NackAction) -> Self {
        match a {
            NackAction::Park => WireNackAction::Park,
            NackAction::Retry => WireNackAction::Retry,
            NackAction::Skip => WireNackAction::Skip,
            NackAction::Stop => WireNackAction::Stop,
        }
    }
}

/// A single producer-side request fed into the batcher.
#[derive(Debug, Clone)]
pub enum BatchItem {
    Ack(Uuid),
    Nack(Uuid, NackAction, String),
}

/// The single *action* a batch in progress carries; a new item with a
/// different action forces the in-progress batch to flush first.
#[derive(Debug, Clone, PartialEq)]
enum CurrentAction {
    None,
    Ack,
    Nack(NackAction, String),
}

fn wire_id(id: Uuid) -> WireUuid {
    let (high, low) = id.as_u64_pair();
    WireUuid {
        value: Some(wire_uuid::Value::Structured(wire_uuid::Structured {
            most_significant_bits: high as i64,
            least_significant_bits: low as i64,
        })),
    }
}

struct PendingBatch {
    action: CurrentAction,
    ids: Vec<Uuid>,
}

impl PendingBatch {
    fn empty() -> Self {
        PendingBatch {
            action: CurrentAction::None,
            ids: Vec::new(),
        }
    }

    fn into_frame(self) -> Option<ReadReq> {
        if self.ids.is_empty() {
            return None;
        }
        let wire_ids: Vec<WireUuid> = self.ids.iter().map(|id| wire_id(*id)).collect();
        let content = match self.action {
            CurrentAction::Ack => crate::wire::persistent_subscriptions::read_req::Content::Ack(Ack {
                id: Vec::new(),
                ids: wire_ids,
            }),
            CurrentAction::Nack(action, reason) => {
                crate::wire::persistent_subscriptions::read_req::Content::Nack(Nack {
                    id: Vec::new(),
                    ids: wire_ids,
                    action: WireNackAction::from(action) as i32,
                    reason,
                })
            }
            CurrentAction::None => return None,
        };
        Some(ReadReq {
            content: Some(content),
        })
    }
}

/// Runs as a background task: drains `items`, coalesces by action, and
/// writes completed batches to `outbound`. Returns when `items` closes,
/// after flushing whatever remains (allowing `STOPPING_GRACE` for
/// last-minute arrivals).
pub async fn run(
    mut items: mpsc::Receiver<BatchItem>,
    outbound: mpsc::Sender<ReadReq>,
) {
    let mut pending = PendingBatch::empty();
    let mut ticker = tokio::time::interval(MAX_ACK_DELAY);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = items.recv() => {
                match item {
                    Some(item) => {
                        if let Some(flushed) = accept(&mut pending, item) {
                            if outbound.send(flushed).await.is_err() {
                                return;
                            }
                        }
                        if pending.ids.len() >= MAX_ACK_BATCH_SIZE {
                            if let Some(frame) = std::mem::replace(&mut pending, PendingBatch::empty()).into_frame() {
                                if outbound.send(frame).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if !pending.ids.is_empty() {
                    if let Some(frame) = std::mem::replace(&mut pending, PendingBatch::empty()).into_frame() {
                        if outbound.send(frame).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    // Drain: allow one grace window for anything already in flight, then
    // flush whatever remains.
    let deadline = tokio::time::sleep(STOPPING_GRACE);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            item = items.recv() => {
                match item {
                    Some(item) => {
                        if let Some(flushed) = accept(&mut pending, item) {
                            let _ = outbound.send(flushed).await;
                        }
                    }
                    None => break,
                }
            }
            _ = &mut deadline => break,
        }
    }
    if let Some(frame) = pending.into_frame() {
        let _ = outbound.send(frame).await;
    }
    debug!("ack/nack batcher drained and stopped");
}

/// Fold `item` into `pending`; if the item's action differs from the batch
/// in progress, flush the old batch first (returned) and start a new one.
fn accept(pending: &mut PendingBatch, item: BatchItem) -> Option<ReadReq> {
    let (id, action) = match item {
        BatchItem::Ack(id) => (id, CurrentAction::Ack),
        BatchItem::Nack(id, nack_action, reason) => (id, CurrentAction::Nack(nack_action, reason)),
    };

    if pending.action != CurrentAction::None && pending.action != action {
        let flushed = std::mem::replace(pending, PendingBatch::empty()).into_frame();
        pending.action = action;
        pending.ids.push(id);
        flushed
    } else {
        pending.action = action;
        pending.ids.push(id);
        None
    }
}
