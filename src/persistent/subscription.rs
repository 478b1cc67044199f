//! The persistent-subscription read operation: a bidirectional stream
//! wrapping inbound events/pings and an ack/nack batcher for the outbound
//! side.
//!
//! Grounded on SPEC_FULL.md §4.7/§4.7.2 (state machine) and §4.7.3 (edge
//! cases): ping/pong echo, ProgrammingError on misuse after stop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tonic::Request;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::event::RecordedEvent;
use crate::metadata::CallOptions;
use crate::persistent::batcher::{self, BatchItem};
pub use crate::persistent::batcher::NackAction;
use crate::registry::Stoppable;
use crate::wire::persistent_subscriptions::persistent_subscriptions_client::PersistentSubscriptionsClient;
use crate::wire::persistent_subscriptions::read_req::options::UuidOption;
use crate::wire::persistent_subscriptions::read_resp::read_event::CountOption;
use crate::wire::persistent_subscriptions::read_resp::Content as ReadContent;
use crate::wire::persistent_subscriptions::ReadReq;
use crate::wire::shared::{uuid as wire_uuid, Empty, StreamIdentifier, Uuid as WireUuid};

const RUNNING: u8 = 1;
const STOPPING: u8 = 2;
const STOPPED: u8 = 3;

fn uuid_of_wire(id: Option<WireUuid>) -> Uuid {
    match id.and_then(|w| w.value) {
        Some(wire_uuid::Value::Structured(s)) => {
            Uuid::from_u64_pair(s.most_significant_bits as u64, s.least_significant_bits as u64)
        }
        Some(wire_uuid::Value::String(s)) => Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil()),
        None => Uuid::nil(),
    }
}

fn recorded_event_from_wire(
    wire: crate::wire::persistent_subscriptions::read_resp::read_event::RecordedEvent,
    retry_count: Option<i32>,
) -> RecordedEvent {
    RecordedEvent::from_wire_fields(
        uuid_of_wire(wire.id.clone()),
        wire.stream_identifier
            .map(|s| String::from_utf8_lossy(&s.stream_name).into_owned())
            .unwrap_or_default(),
        wire.stream_revision,
        Some(wire.commit_position),
        wire.metadata,
        wire.custom_metadata,
        wire.data,
        None,
        retry_count,
    )
}

/// A single delivered item: an event (with retry count, when redelivered)
/// paired with the identifier the consumer must use to ack/nack it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub ack_id: Uuid,
    pub event: RecordedEvent,
}

pub struct PersistentSubscription {
    inbound: AsyncMutex<mpsc::Receiver<Result<Delivery>>>,
    acks: SyncMutex<Option<mpsc::Sender<BatchItem>>>,
    cancel: mpsc::Sender<()>,
    state: Arc<AtomicU8>,
    batcher_handle: SyncMutex<Option<JoinHandle<()>>>,
    inbound_handle: SyncMutex<Option<JoinHandle<()>>>,
}

impl PersistentSubscription {
    /// Open the bidirectional read stream for `group` on `stream_source`
    /// (`None` means `$all`).
    pub async fn open(
        connection: Arc<ConnectionManager>,
        stream_source: Option<String>,
        group: String,
        buffer_size: i32,
        call: CallOptions,
    ) -> Result<Arc<PersistentSubscription>> {
        let channel = connection.acquire().await?;
        let mut client = PersistentSubscriptionsClient::new(channel);

        let options_frame = ReadReq {
            content: Some(crate::wire::persistent_subscriptions::read_req::Content::Options(
                crate::wire::persistent_subscriptions::read_req::Options {
                    stream_identifier: stream_source.as_deref().map(|name| StreamIdentifier {
                        stream_name: name.as_bytes().to_vec(),
                    }),
                    group_name: group.clone(),
                    buffer_size,
                    uuid_option: Some(UuidOption::String(Empty {})),
                },
            )),
        };

        let (ack_tx, ack_rx) = mpsc::channel::<BatchItem>(1024);
        let (outbound_tx, outbound_rx) = mpsc::channel::<ReadReq>(64);
        let batcher_handle = tokio::spawn(batcher::run(ack_rx, outbound_tx.clone()));

        outbound_tx
            .send(options_frame)
            .await
            .map_err(|_| Error::ProgrammingError("outbound channel closed before open".to_string()))?;

        let outbound_stream = tokio_stream::wrappers::ReceiverStream::new(outbound_rx);
        let request = crate::metadata::apply_metadata(
            Request::new(outbound_stream),
            &call,
            connection.spec().credentials.as_ref(),
            connection.spec().options.node_preference,
            connection.spec().options.default_deadline,
        );

        let mut wire_stream = client.read(request).await.map_err(Error::from_status)?.into_inner();

        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        let (cancel_tx, mut cancel_rx) = mpsc::channel(1);
        let pong_tx = outbound_tx.clone();

        let inbound_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_rx.recv() => break,
                    item = wire_stream.next() => {
                        let Some(item) = item else { break };
                        match item.map_err(Error::from_status) {
                            Ok(resp) => match resp.content {
                                Some(ReadContent::Event(ev)) => {
                                    let retry_count = match ev.count_option {
                                        Some(CountOption::RetryCount(n)) => Some(n),
                                        _ => None,
                                    };
                                    if let Some(recorded) = ev.event.clone() {
                                        let ack_id = uuid_of_wire(recorded.id.clone());
                                        let delivery = Delivery {
                                            ack_id,
                                            event: recorded_event_from_wire(recorded, retry_count),
                                        };
                                        if inbound_tx.send(Ok(delivery)).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                                Some(ReadContent::Ping(ping)) => {
                                    debug!("echoing persistent-subscription ping");
                                    let pong = ReadReq {
                                        content: Some(
                                            crate::wire::persistent_subscriptions::read_req::Content::Pong(
                                                crate::wire::persistent_subscriptions::read_req::Pong {
                                                    payload: ping.payload,
                                                },
                                            ),
                                        ),
                                    };
                                    if pong_tx.send(pong).await.is_err() {
                                        break;
                                    }
                                }
                                Some(ReadContent::SubscriptionConfirmation(_)) | None => {}
                            },
                            Err(e) => {
                                warn!(error = %e, "persistent subscription transport error");
                                let _ = inbound_tx.send(Err(e)).await;
                                break;
                            }
                        }
                    }
                }
            }
            debug!("persistent subscription inbound task exiting");
        });

        Ok(Arc::new(PersistentSubscription {
            inbound: AsyncMutex::new(inbound_rx),
            acks: SyncMutex::new(Some(ack_tx)),
            cancel: cancel_tx,
            state: Arc::new(AtomicU8::new(RUNNING)),
            batcher_handle: SyncMutex::new(Some(batcher_handle)),
            inbound_handle: SyncMutex::new(Some(inbound_handle)),
        }))
    }

    pub async fn next(&self) -> Option<Result<Delivery>> {
        if self.state.load(Ordering::SeqCst) == STOPPED {
            return None;
        }
        self.inbound.lock().await.recv().await
    }

    pub async fn ack(&self, ack_id: Uuid) -> Result<()> {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return Err(Error::ProgrammingError(
                "ack called after subscription stopped".to_string(),
            ));
        }
        let sender = self.acks.lock().unwrap().clone();
        match sender {
            Some(sender) => sender
                .send(BatchItem::Ack(ack_id))
                .await
                .map_err(|_| Error::ProgrammingError("ack batcher is gone".to_string())),
            None => Err(Error::ProgrammingError("ack called after subscription stopped".to_string())),
        }
    }

    pub async fn nack(&self, ack_id: Uuid, action: NackAction, reason: impl Into<String>) -> Result<()> {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return Err(Error::ProgrammingError(
                "nack called after subscription stopped".to_string(),
            ));
        }
        let sender = self.acks.lock().unwrap().clone();
        match sender {
            Some(sender) => sender
                .send(BatchItem::Nack(ack_id, action, reason.into()))
                .await
                .map_err(|_| Error::ProgrammingError("ack batcher is gone".to_string())),
            None => Err(Error::ProgrammingError("nack called after subscription stopped".to_string())),
        }
    }

    /// RUNNING -> STOPPING -> (drain batcher, close outbound) -> STOPPED.
    /// Idempotent: a second call is a no-op. `stop` is synchronous (per the
    /// `Stoppable` trait), so the actual drain runs in a detached task; a
    /// caller that needs to observe completion should await `next()` until
    /// it returns `None`.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // Dropping the sender closes the batcher's `items` channel, which
            // unblocks its `recv()` and lets it run its grace-window drain.
            self.acks.lock().unwrap().take();
            let _ = self.cancel.try_send(());

            let batcher_handle = self.batcher_handle.lock().unwrap().take();
            let inbound_handle = self.inbound_handle.lock().unwrap().take();
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Some(handle) = batcher_handle {
                    let _ = handle.await;
                }
                if let Some(handle) = inbound_handle {
                    let _ = handle.await;
                }
                state.store(STOPPED, Ordering::SeqCst);
            });
        }
    }
}

impl Stoppable for PersistentSubscription {
    fn stop(&self) {
        PersistentSubscription::stop(self)
    }
}
