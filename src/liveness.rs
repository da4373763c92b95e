use std::{collections::HashMap, sync::Mutex, time::Duration};

use log::debug;
use tokio::time::Instant;

use crate::protocol::NodeId;
use crate::raft::api::RoleKind;

#[derive(Debug, Clone)]
pub struct PeerLiveness {
    pub last_seen: Option<Instant>,
    pub last_role: Option<RoleKind>,
    pub consecutive_failures: u32,
}

/// Tracks when each peer was last heard from. A peer is live while its last
/// sighting is inside the window and no probe has failed since.
pub struct LivenessMonitor {
    window: Duration,
    peers: Mutex<HashMap<NodeId, PeerLiveness>>,
}

impl LivenessMonitor {
    pub fn new(peers: Vec<NodeId>, window: Duration) -> Self {
        let peers = peers
            .into_iter()
            .map(|id| {
                (
                    id,
                    PeerLiveness {
                        last_seen: None,
                        last_role: None,
                        consecutive_failures: 0,
                    },
                )
            })
            .collect();
        Self {
            window,
            peers: Mutex::new(peers),
        }
    }

    /// Records a sighting of `peer`. Unknown ids are ignored.
    pub fn record_alive(&self, peer: &str, role: Option<RoleKind>, now: Instant) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(state) = peers.get_mut(peer) {
            state.last_seen = Some(now);
            state.consecutive_failures = 0;
            if role.is_some() && role != state.last_role {
                debug!("Peer {peer} reports role {role:?}");
                state.last_role = role;
            }
        }
    }

    pub fn record_failure(&self, peer: &str) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(state) = peers.get_mut(peer) {
            state.consecutive_failures += 1;
            debug!(
                "Probe to {peer} failed ({} in a row)",
                state.consecutive_failures
            );
        }
    }

    #[cfg(test)]
    pub fn is_alive(&self, peer: &str, now: Instant) -> bool {
        self.peers
            .lock()
            .unwrap()
            .get(peer)
            .map_or(false, |state| self.within_window(state, now))
    }

    pub fn live_peers(&self, now: Instant) -> Vec<NodeId> {
        let mut live: Vec<NodeId> = self
            .peers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, state)| self.within_window(state, now))
            .map(|(id, _)| id.clone())
            .collect();
        live.sort();
        live
    }

    /// Whether this node plus its live peers form a majority.
    pub fn has_quorum(&self, now: Instant, majority: usize) -> bool {
        self.live_peers(now).len() + 1 >= majority
    }

    #[cfg(test)]
    pub fn peer(&self, peer: &str) -> Option<PeerLiveness> {
        self.peers.lock().unwrap().get(peer).cloned()
    }

    fn within_window(&self, state: &PeerLiveness, now: Instant) -> bool {
        state.consecutive_failures == 0
            && state
                .last_seen
                .map_or(false, |seen| now.saturating_duration_since(seen) <= self.window)
    }
}
