//! Gossip-based discovery: turn a seed list into a node whose state matches
//! the caller's `NodePreference`.
//!
//! Grounded on `esdbclient/common.py`'s gossip-reading helpers for the
//! filter/retry algorithm, and on `transport/client.rs`'s `connect()` for
//! the per-attempt-channel-then-give-up-and-retry shape.

use rand::seq::SliceRandom;
use rand::thread_rng;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::uri::{ConnectionSpec, NodePreference, Seed};
use crate::wire::gossip::gossip_client::GossipClient;
use crate::wire::gossip::member_info::VNodeState;
use crate::wire::shared::Empty;

/// The liveness/role state of a node as reported by gossip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Leader,
    Follower,
    ReadOnlyReplica,
    Other,
}

impl From<VNodeState> for MemberState {
    fn from(s: VNodeState) -> Self {
        match s {
            VNodeState::Leader => MemberState::Leader,
            VNodeState::Follower => MemberState::Follower,
            VNodeState::ReadOnlyReplica => MemberState::ReadOnlyReplica,
            _ => MemberState::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub address: String,
    pub port: u16,
    pub state: MemberState,
    pub is_alive: bool,
}

impl ClusterMember {
    pub fn seed(&self) -> Seed {
        Seed {
            host: self.address.clone(),
            port: self.port,
        }
    }
}

fn matches_preference(member: &ClusterMember, preference: NodePreference) -> bool {
    if !member.is_alive {
        return false;
    }
    match preference {
        NodePreference::Leader => member.state == MemberState::Leader,
        NodePreference::Follower => member.state == MemberState::Follower,
        NodePreference::ReadOnlyReplica => member.state == MemberState::ReadOnlyReplica,
        NodePreference::Random => true,
    }
}

async fn read_gossip(seed: &Seed, spec: &ConnectionSpec) -> Result<Vec<ClusterMember>> {
    let scheme = if spec.options.tls { "https" } else { "http" };
    let endpoint = Endpoint::from_shared(format!("{}://{}:{}", scheme, seed.host, seed.port))
        .map_err(|e| Error::GossipSeedError(e.to_string()))?
        .timeout(spec.options.gossip_timeout)
        .connect_timeout(spec.options.gossip_timeout);

    let channel = endpoint
        .connect()
        .await
        .map_err(|e| Error::GossipSeedError(e.to_string()))?;

    let mut client = GossipClient::new(channel);
    let response = client
        .read(tonic::Request::new(Empty {}))
        .await
        .map_err(Error::from_status)?
        .into_inner();

    Ok(response
        .members
        .into_iter()
        .filter_map(|m| {
            let endpoint = m.http_end_point?;
            let state = VNodeState::from_i32(m.state).unwrap_or(VNodeState::Unknown);
            Some(ClusterMember {
                address: endpoint.address,
                port: endpoint.port as u16,
                state: state.into(),
                is_alive: m.is_alive,
            })
        })
        .collect())
}

/// Run the discovery algorithm described in SPEC_FULL.md §4.3: iterate the
/// seed list (shuffled for `random` preference), filter gossip responses by
/// liveness and role, retry up to `max_discover_attempts` times with
/// `discovery_interval` between rounds.
pub async fn discover(spec: &ConnectionSpec) -> Result<ClusterMember> {
    let mut seeds = spec.seeds.clone();
    if spec.options.node_preference == NodePreference::Random {
        seeds.shuffle(&mut thread_rng());
    }

    let mut last_seed = seeds
        .first()
        .cloned()
        .ok_or_else(|| Error::GossipSeedError("no seeds configured".to_string()))?;

    for attempt in 1..=spec.options.max_discover_attempts {
        let mut gathered: Vec<ClusterMember> = Vec::new();
        for seed in &seeds {
            last_seed = seed.clone();
            match read_gossip(seed, spec).await {
                Ok(members) => {
                    debug!(seed = %seed, members = members.len(), "gossip read succeeded");
                    gathered = members;
                    break;
                }
                Err(e) => {
                    warn!(seed = %seed, error = %e, "gossip read failed, trying next seed");
                }
            }
        }

        let matching: Vec<&ClusterMember> = gathered
            .iter()
            .filter(|m| matches_preference(m, spec.options.node_preference))
            .collect();

        if let Some(chosen) = matching.choose(&mut thread_rng()) {
            debug!(address = %chosen.address, port = chosen.port, "discovery selected node");
            return Ok((*chosen).clone());
        }

        match spec.options.node_preference {
            NodePreference::Follower if !gathered.is_empty() => return Err(Error::FollowerNotFound),
            NodePreference::ReadOnlyReplica if !gathered.is_empty() => {
                return Err(Error::ReadOnlyReplicaNotFound)
            }
            _ => {}
        }

        warn!(attempt, max = spec.options.max_discover_attempts, "no matching node this round");
        if attempt < spec.options.max_discover_attempts {
            tokio::time::sleep(spec.options.discovery_interval).await;
        }
    }

    Err(Error::DiscoveryFailed {
        attempts: spec.options.max_discover_attempts,
        last_seed: last_seed.to_string(),
    })
}

/// Open a channel to a chosen node. Split out from `discover` so the
/// connection manager can reopen a channel to a previously-discovered
/// target without a full rediscovery pass.
pub async fn connect_to(member: &ClusterMember, spec: &ConnectionSpec) -> Result<Channel> {
    let scheme = if spec.options.tls { "https" } else { "http" };
    let endpoint = Endpoint::from_shared(format!(
        "{}://{}:{}",
        scheme, member.address, member.port
    ))?
    .keep_alive_timeout(spec.options.keep_alive_timeout)
    .http2_keep_alive_interval(spec.options.keep_alive_interval)
    .tcp_keepalive(Some(spec.options.keep_alive_interval));

    Ok(endpoint.connect().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(state: MemberState, alive: bool) -> ClusterMember {
        ClusterMember {
            address: "127.0.0.1".to_string(),
            port: 2113,
            state,
            is_alive: alive,
        }
    }

    #[test]
    fn leader_preference_matches_only_leader() {
        assert!(matches_preference(
            &member(MemberState::Leader, true),
            NodePreference::Leader
        ));
        assert!(!matches_preference(
            &member(MemberState::Follower, true),
            NodePreference::Leader
        ));
    }

    #[test]
    fn dead_members_never_match() {
        assert!(!matches_preference(
            &member(MemberState::Leader, false),
            NodePreference::Leader
        ));
    }

    #[test]
    fn random_preference_matches_any_live_member() {
        assert!(matches_preference(
            &member(MemberState::Follower, true),
            NodePreference::Random
        ));
    }
}
