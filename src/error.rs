//! Error taxonomy and the transport-status-to-typed-error translator.
//!
//! `Error` is the single error type returned across the public API. It is
//! `#[non_exhaustive]` so a new server-reported fingerprint can be added to
//! the translator without breaking downstream `match`es.

use std::fmt;

use thiserror::Error;

/// Errors surfaced by this crate, either translated from the transport or
/// raised directly by a facade method.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("exception was thrown by the server handler")]
    ExceptionThrownByHandler,

    #[error("server closed the subscription: consumer too slow")]
    ConsumerTooSlow,

    #[error("call aborted by the server")]
    AbortedByServer,

    #[error("call cancelled by the client")]
    CancelledByClient,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("stream already exists")]
    AlreadyExists,

    #[error("node is not the leader")]
    NodeIsNotLeader,

    #[error("not found")]
    NotFound,

    #[error("maximum subscriptions reached")]
    MaximumSubscriptionsReached,

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("internal server error: {0}")]
    InternalError(String),

    #[error("expected version mismatch: expected {expected}, actual {actual}")]
    WrongCurrentVersion { expected: String, actual: String },

    #[error("stream is deleted")]
    StreamIsDeleted,

    #[error("discovery failed: no node matched preference after {attempts} attempt(s), last seed tried {last_seed}")]
    DiscoveryFailed { attempts: u32, last_seed: String },

    #[error("no follower available")]
    FollowerNotFound,

    #[error("no read-only replica available")]
    ReadOnlyReplicaNotFound,

    #[error("subscription not found")]
    SubscriptionNotFound,

    #[error("gossip seed error: {0}")]
    GossipSeedError(String),

    #[error("programming error: {0}")]
    ProgrammingError(String),

    #[error("exception iterating requests: {0}")]
    ExceptionIteratingRequests(String),

    #[error("invalid connection string: {0}")]
    ConnectionStringParseError(String),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Translate a `tonic::Status` into a typed error, per the status-code +
    /// detail-string fingerprint table.
    ///
    /// Grounded on `esdbclient/common.py`'s `handle_rpc_error`: status codes
    /// alone are not discriminating enough (`UNAVAILABLE` covers both a dead
    /// node and a bad TLS handshake), so the message text is inspected too.
    pub fn from_status(status: tonic::Status) -> Error {
        use tonic::Code;

        let msg = status.message().to_string();
        match status.code() {
            Code::Unknown if msg.contains("Exception was thrown by handler") => {
                Error::ExceptionThrownByHandler
            }
            Code::Aborted if msg.contains("Consumer too slow") => Error::ConsumerTooSlow,
            Code::Aborted => Error::AbortedByServer,
            Code::Cancelled if msg.contains("Locally cancelled by application") => {
                Error::CancelledByClient
            }
            Code::Cancelled => Error::CancelledByClient,
            Code::DeadlineExceeded => Error::DeadlineExceeded,
            Code::Unavailable if msg.contains("SSL_ERROR") => Error::TlsError(msg),
            Code::Unavailable if msg.contains("empty address list") => {
                Error::TlsError(format!("bad CA configuration: {}", msg))
            }
            Code::Unavailable => Error::ServiceUnavailable(msg),
            Code::AlreadyExists => Error::AlreadyExists,
            Code::NotFound if msg.contains("Leader info available") => Error::NodeIsNotLeader,
            Code::NotFound => Error::NotFound,
            Code::FailedPrecondition if msg.contains("Maximum subscriptions reached") => {
                Error::MaximumSubscriptionsReached
            }
            Code::FailedPrecondition if msg.contains("is deleted") => Error::StreamIsDeleted,
            Code::FailedPrecondition => Error::FailedPrecondition(msg),
            Code::Internal => Error::InternalError(msg),
            _ => Error::ExceptionThrownByHandler,
        }
    }

    /// Whether this error should trigger a single rediscover-and-retry pass,
    /// per the automatic retry policy (only `ServiceUnavailable` and, when
    /// the caller prefers the leader, `NodeIsNotLeader`).
    pub fn triggers_rediscovery(&self, prefers_leader: bool) -> bool {
        match self {
            Error::ServiceUnavailable(_) => true,
            Error::NodeIsNotLeader => prefers_leader,
            _ => false,
        }
    }
}

/// A lightweight wrapper so `ConnectionStringParseError`'s inner text can be
/// built up incrementally while parsing without importing `Error` in the
/// parser module's public signature.
pub(crate) struct ParseFailure(pub String);

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ParseFailure> for Error {
    fn from(p: ParseFailure) -> Error {
        Error::ConnectionStringParseError(p.0)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::{Code, Status};

    #[test]
    fn maps_consumer_too_slow() {
        let status = Status::new(Code::Aborted, "Consumer too slow");
        assert!(matches!(Error::from_status(status), Error::ConsumerTooSlow));
    }

    #[test]
    fn maps_generic_aborted() {
        let status = Status::new(Code::Aborted, "some other reason");
        assert!(matches!(Error::from_status(status), Error::AbortedByServer));
    }

    #[test]
    fn maps_not_found_with_leader_hint() {
        let status = Status::new(Code::NotFound, "Leader info available");
        assert!(matches!(Error::from_status(status), Error::NodeIsNotLeader));
    }

    #[test]
    fn maps_plain_not_found() {
        let status = Status::new(Code::NotFound, "nope");
        assert!(matches!(Error::from_status(status), Error::NotFound));
    }

    #[test]
    fn maps_ssl_unavailable_to_tls_error() {
        let status = Status::new(Code::Unavailable, "SSL_ERROR_SSL: handshake failure");
        assert!(matches!(Error::from_status(status), Error::TlsError(_)));
    }

    #[test]
    fn maps_tombstoned_stream_to_stream_is_deleted() {
        let status = Status::new(Code::FailedPrecondition, "Event stream 'account-1' is deleted.");
        assert!(matches!(Error::from_status(status), Error::StreamIsDeleted));
    }

    #[test]
    fn maps_generic_unavailable() {
        let status = Status::new(Code::Unavailable, "connection refused");
        assert!(matches!(Error::from_status(status), Error::ServiceUnavailable(_)));
    }

    #[test]
    fn maps_max_subscriptions() {
        let status = Status::new(Code::FailedPrecondition, "Maximum subscriptions reached");
        assert!(matches!(
            Error::from_status(status),
            Error::MaximumSubscriptionsReached
        ));
    }

    #[test]
    fn retry_policy_respects_leader_preference() {
        assert!(Error::NodeIsNotLeader.triggers_rediscovery(true));
        assert!(!Error::NodeIsNotLeader.triggers_rediscovery(false));
        assert!(Error::ServiceUnavailable("x".into()).triggers_rediscovery(false));
        assert!(!Error::NotFound.triggers_rediscovery(true));
    }
}
