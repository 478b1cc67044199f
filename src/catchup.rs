//! Catch-up subscription runtime: a server-streaming RPC yielding recorded
//! events interleaved with checkpoints and caught-up/fell-behind markers.
//!
//! Grounded on SPEC_FULL.md §4.6; the registry integration follows
//! `esdbclient/common.py`'s `GrpcStreamers` (weak-referenced, stoppable
//! entries enumerated on client close).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tonic::Request;
use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::event::RecordedEvent;
use crate::filter::StreamFilter;
use crate::metadata::CallOptions;
use crate::registry::Stoppable;
use crate::wire::shared::Empty;
use crate::wire::streams::read_req::options::{CommitPositionOption, ReadDirection, RevisionOption};
use crate::wire::streams::read_resp::Content as ReadContent;
use crate::wire::streams::streams_client::StreamsClient;
use crate::wire::streams::ReadReq;

/// One item yielded by a catch-up subscription's iterator.
#[derive(Debug, Clone)]
pub enum CatchupItem {
    Event(RecordedEvent),
    Checkpoint { commit_position: u64, prepare_position: u64 },
    CaughtUp,
    FellBehind,
}

#[derive(Debug, Clone)]
pub struct CatchupOptions {
    pub filter: Option<StreamFilter>,
    pub resolve_links: bool,
    pub include_checkpoints: bool,
    pub include_caught_up: bool,
    pub window_size: i64,
    pub checkpoint_interval_multiplier: i64,
}

impl Default for CatchupOptions {
    fn default() -> Self {
        CatchupOptions {
            filter: None,
            resolve_links: false,
            include_checkpoints: false,
            include_caught_up: false,
            window_size: 30,
            checkpoint_interval_multiplier: 5,
        }
    }
}

/// Start cursor for a catch-up subscription.
#[derive(Debug, Clone, Copy)]
pub enum StartFrom {
    Start,
    End,
    CommitPosition(u64),
    StreamPosition(u64),
}

/// A handle to a live catch-up subscription. `next()` is a single-slot
/// hand-off (a bounded mpsc channel of capacity 1) so a slow consumer
/// naturally throttles the server-side RPC rather than buffering
/// unboundedly.
pub struct CatchupSubscription {
    items: Mutex<mpsc::Receiver<Result<CatchupItem>>>,
    stopped: Arc<AtomicBool>,
    cancel: mpsc::Sender<()>,
}

impl CatchupSubscription {
    /// Open a catch-up subscription against `$all` or a single stream (when
    /// `stream` is `Some`).
    pub async fn open(
        connection: Arc<ConnectionManager>,
        stream: Option<String>,
        from: StartFrom,
        options: CatchupOptions,
        call: CallOptions,
    ) -> Result<Arc<CatchupSubscription>> {
        let channel = connection.acquire().await?;
        let mut client = StreamsClient::new(channel);

        let (filter_include, filter_exclude, filter_on_stream_id) = match &options.filter {
            Some(f) => {
                let (inc, exc) = f.to_wire();
                (inc, exc, f.on_stream_id_enabled())
            }
            None => (String::new(), String::new(), false),
        };

        let revision_option = match from {
            StartFrom::Start => RevisionOption::Start(Empty {}),
            StartFrom::End => RevisionOption::End(Empty {}),
            StartFrom::StreamPosition(n) => RevisionOption::Revision(n),
            StartFrom::CommitPosition(_) => RevisionOption::Start(Empty {}),
        };
        let commit_position_option = match from {
            StartFrom::CommitPosition(p) => Some(CommitPositionOption::CommitPosition(p)),
            _ => None,
        };

        let req_options = crate::wire::streams::read_req::Options {
            stream_identifier: stream
                .as_deref()
                .map(|name| crate::wire::shared::StreamIdentifier {
                    stream_name: name.as_bytes().to_vec(),
                }),
            all: stream.is_none(),
            read_direction: ReadDirection::Forwards as i32,
            revision_option: Some(revision_option),
            commit_position_option,
            count: u64::MAX,
            resolve_links: options.resolve_links,
            filter_include,
            filter_exclude,
            filter_on_stream_id,
            window_size: options.window_size.max(0) as u32,
            checkpoint_interval_multiplier: options.checkpoint_interval_multiplier.max(0) as u32,
        };

        let request = crate::metadata::apply_metadata(
            Request::new(ReadReq {
                options: Some(req_options),
            }),
            &call,
            connection.spec().credentials.as_ref(),
            connection.spec().options.node_preference,
            connection.spec().options.default_deadline,
        );

        let mut wire_stream = client.read(request).await.map_err(Error::from_status)?.into_inner();

        let (tx, rx) = mpsc::channel(1);
        let (cancel_tx, mut cancel_rx) = mpsc::channel(1);
        let stopped = Arc::new(AtomicBool::new(false));

        let task_stopped = stopped.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_rx.recv() => {
                        task_stopped.store(true, Ordering::SeqCst);
                        break;
                    }
                    item = wire_stream.next() => {
                        let Some(item) = item else { break };
                        let outcome = item.map_err(Error::from_status).and_then(|resp| {
                            translate(resp, &options).ok_or_else(|| {
                                Error::InternalError("empty catch-up subscription frame".to_string())
                            })
                        });
                        match outcome {
                            Ok(Translated::Skip) => {}
                            Ok(Translated::Item(item)) => {
                                if tx.send(Ok(item)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                        }
                    }
                }
            }
            debug!("catch-up subscription task exiting");
        });

        Ok(Arc::new(CatchupSubscription {
            items: Mutex::new(rx),
            stopped,
            cancel: cancel_tx,
        }))
    }

    /// Await the next item. Returns `None` once the subscription has been
    /// stopped or the underlying stream is exhausted.
    pub async fn next(&self) -> Option<Result<CatchupItem>> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        self.items.lock().await.recv().await
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.cancel.try_send(());
        }
    }
}

impl Stoppable for CatchupSubscription {
    fn stop(&self) {
        CatchupSubscription::stop(self)
    }
}

/// Result of translating one wire frame: either an item the consumer should
/// see, or a frame that exists on the wire but isn't surfaced (a
/// subscription confirmation, or a checkpoint/caught-up marker the caller
/// didn't ask for via `include_checkpoints`/`include_caught_up`).
enum Translated {
    Item(CatchupItem),
    Skip,
}

fn translate(resp: crate::wire::streams::ReadResp, options: &CatchupOptions) -> Option<Translated> {
    match resp.content? {
        ReadContent::Event(ev) => Some(match ev.event {
            Some(recorded) => Translated::Item(CatchupItem::Event(crate::streams::recorded_event_from_wire(recorded))),
            None => Translated::Skip,
        }),
        ReadContent::Checkpoint(c) => Some(if options.include_checkpoints {
            Translated::Item(CatchupItem::Checkpoint {
                commit_position: c.commit_position,
                prepare_position: c.prepare_position,
            })
        } else {
            Translated::Skip
        }),
        ReadContent::CaughtUp(_) => {
            Some(if options.include_caught_up { Translated::Item(CatchupItem::CaughtUp) } else { Translated::Skip })
        }
        ReadContent::FellBehind(_) => {
            Some(if options.include_caught_up { Translated::Item(CatchupItem::FellBehind) } else { Translated::Skip })
        }
        ReadContent::Confirmation(_) => Some(Translated::Skip),
        ReadContent::StreamNotFound(_) => {
            warn!("stream not found while iterating catch-up subscription");
            Some(Translated::Skip)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catchup_options_match_documented_constants() {
        let opts = CatchupOptions::default();
        assert_eq!(opts.window_size, 30);
        assert_eq!(opts.checkpoint_interval_multiplier, 5);
    }

    fn checkpoint_resp() -> crate::wire::streams::ReadResp {
        crate::wire::streams::ReadResp {
            content: Some(ReadContent::Checkpoint(crate::wire::streams::read_resp::Checkpoint {
                commit_position: 1,
                prepare_position: 1,
            })),
        }
    }

    fn caught_up_resp() -> crate::wire::streams::ReadResp {
        crate::wire::streams::ReadResp {
            content: Some(ReadContent::CaughtUp(crate::wire::streams::read_resp::CaughtUp {})),
        }
    }

    #[test]
    fn checkpoint_is_skipped_unless_requested() {
        let without = CatchupOptions::default();
        assert!(matches!(translate(checkpoint_resp(), &without), Some(Translated::Skip)));

        let with = CatchupOptions {
            include_checkpoints: true,
            ..CatchupOptions::default()
        };
        assert!(matches!(
            translate(checkpoint_resp(), &with),
            Some(Translated::Item(CatchupItem::Checkpoint { .. }))
        ));
    }

    #[test]
    fn caught_up_is_skipped_unless_requested() {
        let without = CatchupOptions::default();
        assert!(matches!(translate(caught_up_resp(), &without), Some(Translated::Skip)));

        let with = CatchupOptions {
            include_caught_up: true,
            ..CatchupOptions::default()
        };
        assert!(matches!(translate(caught_up_resp(), &with), Some(Translated::Item(CatchupItem::CaughtUp))));
    }

    #[test]
    fn confirmation_is_always_skipped() {
        let resp = crate::wire::streams::ReadResp {
            content: Some(ReadContent::Confirmation(
                crate::wire::streams::read_resp::SubscriptionConfirmation {
                    subscription_id: "sub-1".to_string(),
                },
            )),
        };
        assert!(matches!(translate(resp, &CatchupOptions::default()), Some(Translated::Skip)));
    }
}
