//! Streams-service facade: append, read, delete, tombstone, and the
//! stream-metadata convenience methods built on top of them.
//!
//! Grounded on `esdbclient/common.py`'s `construct_recorded_event` for the
//! wire-to-`RecordedEvent` mapping and on the generated `Streams` client
//! (`src/wire.rs`) for the RPC shapes.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tonic::Request;
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::event::{NewEvent, RecordedEvent, StreamState};
use crate::filter::StreamFilter;
use crate::metadata::{apply_metadata, CallOptions};
use crate::wire::shared::{uuid as wire_uuid, Empty, StreamIdentifier, Uuid as WireUuid};
use crate::wire::streams::append_req::{self, Options as AppendOptions};
use crate::wire::streams::append_resp;
use crate::wire::streams::delete_resp;
use crate::wire::streams::read_req::options::{
    CommitPositionOption, ReadDirection, RevisionOption,
};
use crate::wire::streams::read_resp::Content as ReadContent;
use crate::wire::streams::streams_client::StreamsClient;
use crate::wire::streams::tombstone_resp;
use crate::wire::streams::{
    AppendReq, AppendResp, DeleteReq, ReadReq, TombstoneReq,
};

pub enum Direction {
    Forwards,
    Backwards,
}

fn stream_identifier(name: &str) -> StreamIdentifier {
    StreamIdentifier {
        stream_name: name.as_bytes().to_vec(),
    }
}

fn stream_name_of(id: &StreamIdentifier) -> String {
    String::from_utf8_lossy(&id.stream_name).into_owned()
}

fn wire_uuid_of(id: Uuid) -> WireUuid {
    let (high, low) = id.as_u64_pair();
    WireUuid {
        value: Some(wire_uuid::Value::Structured(wire_uuid::Structured {
            most_significant_bits: high as i64,
            least_significant_bits: low as i64,
        })),
    }
}

fn uuid_of_wire(id: Option<WireUuid>) -> Uuid {
    match id.and_then(|w| w.value) {
        Some(wire_uuid::Value::Structured(s)) => {
            Uuid::from_u64_pair(s.most_significant_bits as u64, s.least_significant_bits as u64)
        }
        Some(wire_uuid::Value::String(s)) => Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil()),
        None => Uuid::nil(),
    }
}

fn expected_revision_option(expected: StreamState) -> append_req::options::ExpectedStreamRevision {
    use append_req::options::ExpectedStreamRevision as R;
    match expected {
        StreamState::Revision(n) => R::Revision(n),
        StreamState::NoStream => R::NoStream(Empty {}),
        StreamState::Any => R::Any(Empty {}),
        StreamState::Exists => R::StreamExists(Empty {}),
    }
}

fn delete_revision_option(
    expected: StreamState,
) -> crate::wire::streams::delete_req::options::ExpectedStreamRevision {
    use crate::wire::streams::delete_req::options::ExpectedStreamRevision as R;
    match expected {
        StreamState::Revision(n) => R::Revision(n),
        StreamState::NoStream => R::NoStream(Empty {}),
        StreamState::Any => R::Any(Empty {}),
        StreamState::Exists => R::StreamExists(Empty {}),
    }
}

fn tombstone_revision_option(
    expected: StreamState,
) -> crate::wire::streams::tombstone_req::options::ExpectedStreamRevision {
    use crate::wire::streams::tombstone_req::options::ExpectedStreamRevision as R;
    match expected {
        StreamState::Revision(n) => R::Revision(n),
        StreamState::NoStream => R::NoStream(Empty {}),
        StreamState::Any => R::Any(Empty {}),
        StreamState::Exists => R::StreamExists(Empty {}),
    }
}

fn proposed_message(event: &NewEvent) -> append_req::ProposedMessage {
    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), event.event_type.clone());
    metadata.insert("content-type".to_string(), event.content_type.clone());
    append_req::ProposedMessage {
        id: Some(wire_uuid_of(event.id)),
        metadata,
        custom_metadata: event.metadata.clone(),
        data: event.data.clone(),
    }
}

pub(crate) fn recorded_event_from_wire(
    wire: crate::wire::streams::read_resp::read_event::RecordedEvent,
) -> RecordedEvent {
    RecordedEvent::from_wire_fields(
        uuid_of_wire(wire.id),
        wire.stream_identifier.map(|s| stream_name_of(&s)).unwrap_or_default(),
        wire.stream_revision,
        Some(wire.commit_position),
        wire.metadata,
        wire.custom_metadata,
        wire.data,
        None,
        None,
    )
}

/// The streams-service facade. One instance is shared by a top-level client;
/// every method acquires a channel from the connection manager and retries
/// once on `ServiceUnavailable` / (leader-preferring) `NodeIsNotLeader`.
pub struct Streams {
    connection: Arc<ConnectionManager>,
}

impl Streams {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Streams { connection }
    }

    fn prefers_leader(&self) -> bool {
        matches!(
            self.connection.spec().options.node_preference,
            crate::uri::NodePreference::Leader
        )
    }

    async fn client(&self) -> Result<StreamsClient<tonic::transport::Channel>> {
        Ok(StreamsClient::new(self.connection.acquire().await?))
    }

    /// Append one or more events to `stream` under the given expected
    /// version, returning the commit position assigned to the last event.
    pub async fn append(
        &self,
        stream: &str,
        expected: StreamState,
        events: &[NewEvent],
        call: &CallOptions,
    ) -> Result<u64> {
        let mut attempted_retry = false;
        loop {
            let result = self.append_once(stream, expected, events, call).await;
            match result {
                Err(e) if e.triggers_rediscovery(self.prefers_leader()) && !attempted_retry => {
                    attempted_retry = true;
                    self.connection.reopen().await?;
                }
                other => return other,
            }
        }
    }

    async fn append_once(
        &self,
        stream: &str,
        expected: StreamState,
        events: &[NewEvent],
        call: &CallOptions,
    ) -> Result<u64> {
        let mut client = self.client().await?;

        let options_frame = AppendReq {
            content: Some(append_req::Content::Options(AppendOptions {
                stream_identifier: Some(stream_identifier(stream)),
                expected_stream_revision: Some(expected_revision_option(expected)),
            })),
        };
        let event_frames = events.iter().map(|e| AppendReq {
            content: Some(append_req::Content::ProposedMessage(proposed_message(e))),
        });

        let frames: Vec<AppendReq> = std::iter::once(options_frame).chain(event_frames).collect();
        let request = apply_metadata(
            Request::new(futures::stream::iter(frames)),
            call,
            self.connection.spec().credentials.as_ref(),
            self.connection.spec().options.node_preference,
            self.connection.spec().options.default_deadline,
        );

        let response: AppendResp = client
            .append(request)
            .await
            .map_err(Error::from_status)?
            .into_inner();

        match response.result {
            Some(append_resp::Result::Success(success)) => {
                Ok(match success.position_option {
                    Some(append_resp::success::PositionOption::CommitPosition(p)) => p,
                    _ => 0,
                })
            }
            Some(append_resp::Result::WrongExpectedVersion(w)) => {
                let actual = match w.current_revision_option {
                    Some(append_resp::wrong_expected_version::CurrentRevisionOption::CurrentRevision(r)) => {
                        r.to_string()
                    }
                    _ => "<no stream>".to_string(),
                };
                Err(Error::WrongCurrentVersion {
                    expected: expected.to_string(),
                    actual,
                })
            }
            None => Err(Error::InternalError("empty append response".to_string())),
        }
    }

    /// Read a single named stream.
    pub async fn read_stream(
        &self,
        stream: &str,
        from: StreamState,
        direction: Direction,
        count: u64,
        resolve_links: bool,
        call: &CallOptions,
    ) -> Result<Vec<RecordedEvent>> {
        let mut options = crate::wire::streams::read_req::Options {
            stream_identifier: Some(stream_identifier(stream)),
            all: false,
            read_direction: match direction {
                Direction::Forwards => ReadDirection::Forwards as i32,
                Direction::Backwards => ReadDirection::Backwards as i32,
            },
            revision_option: None,
            commit_position_option: None,
            count,
            resolve_links,
            filter_include: String::new(),
            filter_exclude: String::new(),
            filter_on_stream_id: false,
        };
        options.revision_option = Some(match from {
            StreamState::Revision(n) => RevisionOption::Revision(n),
            StreamState::NoStream | StreamState::Any => RevisionOption::Start(Empty {}),
            StreamState::Exists => RevisionOption::Start(Empty {}),
        });

        self.read(options, call).await
    }

    /// Read the `$all` global log.
    pub async fn read_all(
        &self,
        from_commit: Option<u64>,
        direction: Direction,
        count: u64,
        filter: Option<&StreamFilter>,
        resolve_links: bool,
        call: &CallOptions,
    ) -> Result<Vec<RecordedEvent>> {
        let (filter_include, filter_exclude, on_stream_id) = match filter {
            Some(f) => {
                let (inc, exc) = f.to_wire();
                (inc, exc, f.on_stream_id_enabled())
            }
            None => (String::new(), String::new(), false),
        };

        let options = crate::wire::streams::read_req::Options {
            stream_identifier: None,
            all: true,
            read_direction: match direction {
                Direction::Forwards => ReadDirection::Forwards as i32,
                Direction::Backwards => ReadDirection::Backwards as i32,
            },
            revision_option: Some(RevisionOption::Start(Empty {})),
            commit_position_option: from_commit.map(CommitPositionOption::CommitPosition),
            count,
            resolve_links,
            filter_include,
            filter_exclude,
            filter_on_stream_id: on_stream_id,
        };

        self.read(options, call).await
    }

    async fn read(
        &self,
        options: crate::wire::streams::read_req::Options,
        call: &CallOptions,
    ) -> Result<Vec<RecordedEvent>> {
        let mut client = self.client().await?;
        let request = apply_metadata(
            Request::new(ReadReq {
                options: Some(options),
            }),
            call,
            self.connection.spec().credentials.as_ref(),
            self.connection.spec().options.node_preference,
            self.connection.spec().options.default_deadline,
        );

        let mut stream = client.read(request).await.map_err(Error::from_status)?.into_inner();
        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            let resp = item.map_err(Error::from_status)?;
            match resp.content {
                Some(ReadContent::Event(ev)) => {
                    if let Some(recorded) = ev.event {
                        events.push(recorded_event_from_wire(recorded));
                    }
                }
                Some(ReadContent::StreamNotFound(_)) => return Err(Error::NotFound),
                _ => {}
            }
        }
        Ok(events)
    }

    pub async fn delete(
        &self,
        stream: &str,
        expected: StreamState,
        call: &CallOptions,
    ) -> Result<Option<u64>> {
        let mut client = self.client().await?;
        let request = apply_metadata(
            Request::new(DeleteReq {
                options: Some(crate::wire::streams::delete_req::Options {
                    stream_identifier: Some(stream_identifier(stream)),
                    expected_stream_revision: Some(delete_revision_option(expected)),
                }),
            }),
            call,
            self.connection.spec().credentials.as_ref(),
            self.connection.spec().options.node_preference,
            self.connection.spec().options.default_deadline,
        );
        let resp = client.delete(request).await.map_err(Error::from_status)?.into_inner();
        Ok(match resp.position_option {
            Some(delete_resp::PositionOption::Position(p)) => Some(p),
            _ => None,
        })
    }

    pub async fn tombstone(
        &self,
        stream: &str,
        expected: StreamState,
        call: &CallOptions,
    ) -> Result<Option<u64>> {
        let mut client = self.client().await?;
        let request = apply_metadata(
            Request::new(TombstoneReq {
                options: Some(crate::wire::streams::tombstone_req::Options {
                    stream_identifier: Some(stream_identifier(stream)),
                    expected_stream_revision: Some(tombstone_revision_option(expected)),
                }),
            }),
            call,
            self.connection.spec().credentials.as_ref(),
            self.connection.spec().options.node_preference,
            self.connection.spec().options.default_deadline,
        );
        let resp = client
            .tombstone(request)
            .await
            .map_err(Error::from_status)?
            .into_inner();
        Ok(match resp.position_option {
            Some(tombstone_resp::PositionOption::Position(p)) => Some(p),
            _ => None,
        })
    }

    /// Fetch the JSON-encoded metadata stored in the `$$<stream>` sibling
    /// stream. An absent or soft-deleted stream returns an empty mapping; a
    /// tombstoned one surfaces `StreamIsDeleted`.
    pub async fn get_stream_metadata(
        &self,
        stream: &str,
        call: &CallOptions,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let meta_stream = format!("$${}", stream);
        match self
            .read_stream(&meta_stream, StreamState::Revision(0), Direction::Backwards, 1, false, call)
            .await
        {
            Ok(events) => match events.into_iter().next() {
                Some(event) => {
                    let value: serde_json::Value =
                        serde_json::from_slice(&event.data).map_err(|e| {
                            Error::InternalError(format!("malformed stream metadata: {}", e))
                        })?;
                    Ok(value.as_object().cloned().unwrap_or_default())
                }
                None => Ok(serde_json::Map::new()),
            },
            Err(Error::NotFound) => Ok(serde_json::Map::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn set_stream_metadata(
        &self,
        stream: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
        expected: StreamState,
        call: &CallOptions,
    ) -> Result<u64> {
        let meta_stream = format!("$${}", stream);
        let payload = serde_json::to_vec(metadata)
            .map_err(|e| Error::InternalError(format!("cannot encode metadata: {}", e)))?;
        let event = NewEvent::new("$metadata", payload);
        self.append(&meta_stream, expected, &[event], call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_uuid_round_trips() {
        let id = Uuid::new_v4();
        let wire = wire_uuid_of(id);
        assert_eq!(uuid_of_wire(Some(wire)), id);
    }

    #[test]
    fn stream_identifier_round_trips_utf8_name() {
        let ident = stream_identifier("account-123");
        assert_eq!(stream_name_of(&ident), "account-123");
    }
}
