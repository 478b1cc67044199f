//! The event data model: client-authored `NewEvent`, server-observed
//! `RecordedEvent`, and the `StreamState` expected-version token.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use uuid::Uuid;

/// An event a caller wants to append. `id` is generated when absent so
/// retried appends can reuse the same identifier for idempotency.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: Uuid,
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub content_type: String,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        NewEvent {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            metadata: Vec::new(),
            content_type: "application/json".to_string(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// An event as recorded by the server. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub id: Uuid,
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub content_type: String,
    pub stream_name: String,
    pub stream_position: u64,
    pub commit_position: Option<u64>,
    pub link: Option<Box<RecordedEvent>>,
    pub retry_count: Option<i32>,
    pub recorded_at: Option<SystemTime>,
}

/// 100-nanosecond ticks since the Unix epoch, as the server reports
/// timestamps. Conversion mirrors `esdbclient`'s `construct_recorded_event`.
const TICKS_PER_SECOND: u64 = 10_000_000;

impl RecordedEvent {
    /// Build a `RecordedEvent` from the pieces present in a wire `ReadEvent`,
    /// resolving `content-type`/`type` out of the free-form metadata map the
    /// way the original client does.
    pub(crate) fn from_wire_fields(
        id: Uuid,
        stream_name: String,
        stream_position: u64,
        commit_position: Option<u64>,
        metadata_map: HashMap<String, String>,
        custom_metadata: Vec<u8>,
        data: Vec<u8>,
        link: Option<Box<RecordedEvent>>,
        retry_count: Option<i32>,
    ) -> RecordedEvent {
        let event_type = metadata_map
            .get("type")
            .cloned()
            .unwrap_or_else(|| "<unknown>".to_string());
        let content_type = metadata_map
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let recorded_at = metadata_map
            .get("created")
            .and_then(|s| s.parse::<u64>().ok())
            .map(ticks_to_system_time);

        RecordedEvent {
            id,
            event_type,
            data,
            metadata: custom_metadata,
            content_type,
            stream_name,
            stream_position,
            commit_position,
            link,
            retry_count,
            recorded_at,
        }
    }
}

fn ticks_to_system_time(ticks: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_nanos(ticks * 100)
}

/// The expected-version token used to guard writes against concurrent
/// modification. A sum type rather than sentinel integers, per the design
/// note in SPEC_FULL.md §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// The stream must not exist yet.
    NoStream,
    /// The stream must exist, at any version.
    Exists,
    /// No check is performed.
    Any,
    /// The stream's current version must equal exactly this position.
    Revision(u64),
}

impl StreamState {
    pub fn is_concrete(&self) -> bool {
        matches!(self, StreamState::Revision(_))
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::NoStream => write!(f, "NoStream"),
            StreamState::Exists => write!(f, "Exists"),
            StreamState::Any => write!(f, "Any"),
            StreamState::Revision(n) => write!(f, "Revision({})", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_generates_id_when_absent() {
        let e = NewEvent::new("Deposited", b"{}".to_vec());
        assert_ne!(e.id, Uuid::nil());
        assert_eq!(e.content_type, "application/json");
    }

    #[test]
    fn stream_state_concrete_classification() {
        assert!(!StreamState::NoStream.is_concrete());
        assert!(!StreamState::Exists.is_concrete());
        assert!(!StreamState::Any.is_concrete());
        assert!(StreamState::Revision(7).is_concrete());
    }

    #[test]
    fn ticks_conversion_is_monotonic() {
        let earlier = ticks_to_system_time(1);
        let later = ticks_to_system_time(2);
        assert!(later > earlier);
    }
}
