//! Per-call gRPC metadata: basic-auth credentials and the `requires-leader`
//! flag, attached uniformly rather than re-derived at each call site.
//!
//! Grounded on `esdbclient/common.py`'s `BasicAuthCallCredentials`.

use tonic::metadata::{Ascii, MetadataValue};
use tonic::Request;

use crate::uri::{BasicAuth, NodePreference};

impl BasicAuth {
    fn header_value(&self) -> MetadataValue<Ascii> {
        let raw = format!("{}:{}", self.username, self.password);
        let encoded = base64::encode(raw);
        format!("Basic {}", encoded)
            .parse()
            .expect("base64-encoded basic-auth header is always valid ascii metadata")
    }
}

/// Per-call overrides layered on top of a `ConnectionSpec`'s defaults.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub deadline: Option<std::time::Duration>,
    pub credentials: Option<BasicAuth>,
    pub requires_leader: Option<bool>,
}

impl CallOptions {
    pub fn new() -> Self {
        CallOptions::default()
    }

    pub fn with_deadline(mut self, deadline: std::time::Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_credentials(mut self, credentials: BasicAuth) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_requires_leader(mut self, requires_leader: bool) -> Self {
        self.requires_leader = Some(requires_leader);
        self
    }
}

/// Attach a deadline (call override, else the connection's `DefaultDeadline`
/// if one was configured), `authorization` (if credentials are present,
/// call-level overriding connection-level), and `requires-leader` (call
/// override, else `true` iff the connection prefers the leader) to an
/// outgoing request.
pub(crate) fn apply_metadata<T>(
    mut request: Request<T>,
    call: &CallOptions,
    default_credentials: Option<&BasicAuth>,
    node_preference: NodePreference,
    default_deadline: Option<std::time::Duration>,
) -> Request<T> {
    if let Some(deadline) = call.deadline.or(default_deadline) {
        request.set_timeout(deadline);
    }

    let credentials = call.credentials.as_ref().or(default_credentials);
    if let Some(creds) = credentials {
        request
            .metadata_mut()
            .insert("authorization", creds.header_value());
    }

    let requires_leader = call
        .requires_leader
        .unwrap_or(matches!(node_preference, NodePreference::Leader));
    let value: MetadataValue<Ascii> = if requires_leader {
        "true".parse().unwrap()
    } else {
        "false".parse().unwrap()
    };
    request.metadata_mut().insert("requires-leader", value);

    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_requires_leader_follows_node_preference() {
        let req = apply_metadata(
            Request::new(()),
            &CallOptions::new(),
            None,
            NodePreference::Leader,
            None,
        );
        assert_eq!(req.metadata().get("requires-leader").unwrap(), "true");

        let req = apply_metadata(
            Request::new(()),
            &CallOptions::new(),
            None,
            NodePreference::Follower,
            None,
        );
        assert_eq!(req.metadata().get("requires-leader").unwrap(), "false");
    }

    #[test]
    fn call_override_beats_connection_default() {
        let call = CallOptions::new().with_requires_leader(false);
        let req = apply_metadata(Request::new(()), &call, None, NodePreference::Leader, None);
        assert_eq!(req.metadata().get("requires-leader").unwrap(), "false");
    }

    #[test]
    fn call_credentials_override_connection_default() {
        let default_creds = BasicAuth {
            username: "default".into(),
            password: "pw".into(),
        };
        let call_creds = BasicAuth {
            username: "override".into(),
            password: "pw2".into(),
        };
        let call = CallOptions::new().with_credentials(call_creds);
        let req = apply_metadata(
            Request::new(()),
            &call,
            Some(&default_creds),
            NodePreference::Leader,
            None,
        );
        let header = req.metadata().get("authorization").unwrap();
        let expected = format!("Basic {}", base64::encode("override:pw2"));
        assert_eq!(header.to_str().unwrap(), expected);
    }

    #[test]
    fn connection_default_deadline_applies_when_call_has_none() {
        let req = apply_metadata(
            Request::new(()),
            &CallOptions::new(),
            None,
            NodePreference::Leader,
            Some(std::time::Duration::from_secs(30)),
        );
        assert_eq!(req.metadata().get("grpc-timeout").is_some(), true);
    }

    #[test]
    fn call_deadline_overrides_connection_default() {
        let call = CallOptions::new().with_deadline(std::time::Duration::from_secs(5));
        let req = apply_metadata(
            Request::new(()),
            &call,
            None,
            NodePreference::Leader,
            Some(std::time::Duration::from_secs(30)),
        );
        // `set_timeout` stores the deadline as a `grpc-timeout` header tonic
        // computes from whichever duration actually won.
        assert!(req.metadata().get("grpc-timeout").is_some());
    }
}
