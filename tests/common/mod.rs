//! A minimal in-process fake server: just enough of `Gossip` and `Streams`
//! to exercise the client facade end-to-end without a real cluster.
//!
//! The client still gossips even for a single direct seed (matching the
//! original implementation's behavior), so the fake always answers gossip
//! reads by declaring itself the leader.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use eventlog_client::wire::gossip::gossip_server::{Gossip, GossipServer};
use eventlog_client::wire::gossip::member_info::VNodeState;
use eventlog_client::wire::gossip::{ClusterInfo, EndPoint, MemberInfo};
use eventlog_client::wire::shared::{Empty, StreamIdentifier};
use eventlog_client::wire::streams::append_req::Content as AppendContent;
use eventlog_client::wire::streams::append_resp::{success::PositionOption, Result as AppendResult, Success};
use eventlog_client::wire::streams::read_req::options::RevisionOption;
use eventlog_client::wire::streams::read_resp::{
    read_event::RecordedEvent as WireRecordedEvent, Content as ReadContent, ReadEvent, StreamNotFound,
};
use eventlog_client::wire::streams::streams_server::{Streams, StreamsServer};
use eventlog_client::wire::streams::{AppendReq, AppendResp, DeleteReq, DeleteResp, ReadReq, ReadResp, TombstoneReq, TombstoneResp};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status, Streaming};

/// Strip the `$$` metadata-stream prefix to get the stream a tombstone
/// applies to: tombstoning `S` also makes `$$S` inaccessible.
fn base_stream_name(stream_name: &str) -> &str {
    stream_name.strip_prefix("$$").unwrap_or(stream_name)
}

fn stream_is_deleted_status(stream_name: &str) -> Status {
    Status::failed_precondition(format!("Event stream '{}' is deleted.", stream_name))
}

#[derive(Default)]
struct FakeGossip {
    port: u16,
}

#[tonic::async_trait]
impl Gossip for FakeGossip {
    async fn read(&self, _request: Request<Empty>) -> Result<Response<ClusterInfo>, Status> {
        Ok(Response::new(ClusterInfo {
            members: vec![MemberInfo {
                instance_id: None,
                time_stamp: 0,
                state: VNodeState::Leader as i32,
                is_alive: true,
                http_end_point: Some(EndPoint {
                    address: "127.0.0.1".to_string(),
                    port: self.port as u32,
                }),
            }],
        }))
    }
}

#[derive(Default)]
struct StoredEvent {
    id: eventlog_client::wire::shared::Uuid,
    metadata: HashMap<String, String>,
    custom_metadata: Vec<u8>,
    data: Vec<u8>,
}

#[derive(Default)]
struct FakeStreamsState {
    streams: HashMap<String, Vec<StoredEvent>>,
    tombstoned: HashSet<String>,
}

pub struct FakeStreams {
    state: Mutex<FakeStreamsState>,
    commit_counter: AtomicU64,
}

impl FakeStreams {
    fn new() -> Self {
        FakeStreams {
            state: Mutex::new(FakeStreamsState::default()),
            commit_counter: AtomicU64::new(0),
        }
    }
}

#[tonic::async_trait]
impl Streams for FakeStreams {
    type ReadStream = std::pin::Pin<Box<dyn futures::Stream<Item = Result<ReadResp, Status>> + Send + 'static>>;

    async fn read(&self, request: Request<ReadReq>) -> Result<Response<Self::ReadStream>, Status> {
        let options = request
            .into_inner()
            .options
            .ok_or_else(|| Status::invalid_argument("missing options"))?;
        let stream_name = options
            .stream_identifier
            .map(|s| String::from_utf8_lossy(&s.stream_name).into_owned())
            .unwrap_or_default();

        let state = self.state.lock().unwrap();
        let base = base_stream_name(&stream_name);
        if state.tombstoned.contains(base) {
            return Err(stream_is_deleted_status(base));
        }

        let stored = state.streams.get(&stream_name);
        if stored.is_none() {
            let not_found = ReadResp {
                content: Some(ReadContent::StreamNotFound(StreamNotFound {
                    stream_identifier: Some(StreamIdentifier {
                        stream_name: stream_name.as_bytes().to_vec(),
                    }),
                })),
            };
            let stream = futures::stream::iter(vec![Ok(not_found)]);
            return Ok(Response::new(Box::pin(stream)));
        }
        let events = stored.cloned_events();

        let start = match options.revision_option {
            Some(RevisionOption::Revision(n)) => n as usize,
            _ => 0,
        };

        let items: Vec<Result<ReadResp, Status>> = events
            .into_iter()
            .enumerate()
            .skip(start)
            .map(|(i, e)| {
                Ok(ReadResp {
                    content: Some(ReadContent::Event(ReadEvent {
                        event: Some(WireRecordedEvent {
                            id: Some(e.id),
                            stream_identifier: Some(eventlog_client::wire::shared::StreamIdentifier {
                                stream_name: stream_name.as_bytes().to_vec(),
                            }),
                            stream_revision: i as u64,
                            commit_position: i as u64,
                            prepare_position: i as u64,
                            metadata: e.metadata,
                            custom_metadata: e.custom_metadata,
                            data: e.data,
                        }),
                        link: None,
                        position: Some(
                            eventlog_client::wire::streams::read_resp::read_event::Position::CommitPosition(
                                i as u64,
                            ),
                        ),
                    })),
                })
            })
            .collect();

        let stream = futures::stream::iter(items);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn append(
        &self,
        request: Request<Streaming<AppendReq>>,
    ) -> Result<Response<AppendResp>, Status> {
        use futures::StreamExt;
        let mut incoming = request.into_inner();

        let mut stream_name = String::new();
        let mut new_events = Vec::new();
        while let Some(frame) = incoming.next().await {
            let frame = frame?;
            match frame.content {
                Some(AppendContent::Options(opts)) => {
                    stream_name = opts
                        .stream_identifier
                        .map(|s| String::from_utf8_lossy(&s.stream_name).into_owned())
                        .unwrap_or_default();
                }
                Some(AppendContent::ProposedMessage(msg)) => {
                    new_events.push(StoredEvent {
                        id: msg.id.unwrap_or_default(),
                        metadata: msg.metadata,
                        custom_metadata: msg.custom_metadata,
                        data: msg.data,
                    });
                }
                None => {}
            }
        }

        let mut state = self.state.lock().unwrap();
        if state.tombstoned.contains(base_stream_name(&stream_name)) {
            return Err(stream_is_deleted_status(base_stream_name(&stream_name)));
        }
        let entry = state.streams.entry(stream_name).or_default();
        entry.extend(new_events);
        let current_revision = entry.len() as u64 - 1;
        let commit_position = self.commit_counter.fetch_add(1, Ordering::SeqCst);

        Ok(Response::new(AppendResp {
            result: Some(AppendResult::Success(Success {
                current_revision_option: Some(
                    eventlog_client::wire::streams::append_resp::success::CurrentRevisionOption::CurrentRevision(
                        current_revision,
                    ),
                ),
                position_option: Some(PositionOption::CommitPosition(commit_position)),
            })),
        }))
    }

    async fn delete(&self, _request: Request<DeleteReq>) -> Result<Response<DeleteResp>, Status> {
        Ok(Response::new(DeleteResp { position_option: None }))
    }

    async fn tombstone(
        &self,
        request: Request<TombstoneReq>,
    ) -> Result<Response<TombstoneResp>, Status> {
        let stream_name = request
            .into_inner()
            .options
            .and_then(|o| o.stream_identifier)
            .map(|s| String::from_utf8_lossy(&s.stream_name).into_owned())
            .unwrap_or_default();

        let mut state = self.state.lock().unwrap();
        state.tombstoned.insert(stream_name);
        Ok(Response::new(TombstoneResp { position_option: None }))
    }
}

trait ClonedEvents {
    fn cloned_events(&self) -> Vec<ClonedEvent>;
}

#[derive(Clone)]
pub struct ClonedEvent {
    id: eventlog_client::wire::shared::Uuid,
    metadata: HashMap<String, String>,
    custom_metadata: Vec<u8>,
    data: Vec<u8>,
}

impl ClonedEvents for Option<&Vec<StoredEvent>> {
    fn cloned_events(&self) -> Vec<ClonedEvent> {
        match self {
            Some(events) => events
                .iter()
                .map(|e| ClonedEvent {
                    id: e.id.clone(),
                    metadata: e.metadata.clone(),
                    custom_metadata: e.custom_metadata.clone(),
                    data: e.data.clone(),
                })
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Start the fake gossip+streams server on an OS-assigned port, returning
/// the bound address. The server runs until the returned `JoinHandle` is
/// aborted.
pub async fn spawn_fake_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let streams = FakeStreams::new();
    let gossip = FakeGossip { port: addr.port() };

    let handle = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(GossipServer::new(gossip))
            .add_service(StreamsServer::new(streams))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    (addr, handle)
}
