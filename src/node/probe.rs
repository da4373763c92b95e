use std::sync::Weak;

use futures::future::join_all;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use super::Node;
use crate::protocol::trivia::{BodyData, HeartbeatOkData, Message};

/// Probes every peer once per `interval` until the node is gone.
pub(super) async fn run_probes(node: Weak<Node>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(node) = node.upgrade() else { return };
        node.probe_peers().await;
    }
}

impl Node {
    /// Sends a heartbeat to each peer concurrently. A missing or unexpected
    /// reply only counts as a failure in the liveness table.
    pub(super) async fn probe_peers(&self) {
        let probes = self.membership.peers().into_iter().map(|peer| async move {
            let msg = Message::request(self.id().clone(), peer.clone(), BodyData::Heartbeat);
            let resp = self
                .sync_resp
                .send(self.transport.as_ref(), msg, self.timing.rpc_timeout())
                .await;
            match resp.map(|msg| msg.body.data) {
                Some(BodyData::HeartbeatOk(HeartbeatOkData { alive: true, role })) => {
                    self.liveness.record_alive(&peer, Some(role), Instant::now())
                }
                _ => self.liveness.record_failure(&peer),
            }
        });
        join_all(probes).await;
    }
}
