//! A cluster node: consensus, session store and client surface behind one
//! critical section.

use std::sync::{Arc, Mutex};

use log::{debug, info};
use tokio::time::Instant;

use crate::config::TimingConfig;
use crate::error::NodeError;
use crate::fanout::EventHub;
use crate::io::{sync_resp::SyncRespHandler, Outbox, Transport};
use crate::liveness::LivenessMonitor;
use crate::membership::Membership;
use crate::protocol::trivia::{
    BodyData, ForwardedData, HeartbeatOkData, Message, StatusData, StatusOkData,
};
use crate::protocol::NodeId;
use crate::raft::{
    api::{Event, RaftConfig, RoleKind, Rpc, SideEffect, SideEffects, TimerKind},
    state::RaftStateMachine,
};
use crate::session::{normalize_code, Command, QuestionBank, ReplicatedStore, SessionStore};

use self::pending::PendingCommits;
use self::timer::Timer;

mod pending;
mod probe;
mod router;
mod timer;

/// State mutated only while holding the node lock.
struct NodeCore {
    raft: RaftStateMachine<Command>,
    store: ReplicatedStore,
    pending: PendingCommits,
}

pub struct Node {
    membership: Membership,
    timing: TimingConfig,
    core: Mutex<NodeCore>,
    hub: EventHub,
    liveness: LivenessMonitor,
    sync_resp: SyncRespHandler<BodyData>,
    transport: Arc<dyn Transport<BodyData>>,
    election_timer: Timer,
    heartbeat_timer: Timer,
}

impl Node {
    pub fn new(
        membership: Membership,
        timing: TimingConfig,
        questions: Arc<QuestionBank>,
        transport: Arc<dyn Transport<BodyData>>,
    ) -> Arc<Self> {
        let raft = RaftStateMachine::new(RaftConfig {
            node_id: membership.local_id().clone(),
            cluster: membership.node_ids(),
            election_timeout_min: timing.election_timeout_min(),
            election_timeout_max: timing.election_timeout_max(),
            heartbeat_interval: timing.heartbeat_interval(),
        });
        let liveness = LivenessMonitor::new(membership.peers(), timing.liveness_window());
        Arc::new(Self {
            core: Mutex::new(NodeCore {
                raft,
                store: ReplicatedStore::new(SessionStore::new(questions)),
                pending: PendingCommits::new(),
            }),
            hub: EventHub::new(),
            liveness,
            sync_resp: SyncRespHandler::new(),
            transport,
            election_timer: Timer::new(),
            heartbeat_timer: Timer::new(),
            membership,
            timing,
        })
    }

    /// Spawns the timer and probe tasks and arms the first election timer.
    pub fn start(self: &Arc<Self>) {
        info!(
            "[{}] Starting node, cluster {:?}",
            self.id(),
            self.membership.node_ids()
        );
        for kind in [TimerKind::Election, TimerKind::Heartbeat] {
            tokio::spawn(timer::run_timer(Arc::downgrade(self), kind));
        }
        tokio::spawn(probe::run_probes(
            Arc::downgrade(self),
            self.timing.probe_interval(),
        ));
        let mut core = self.core.lock().unwrap();
        let effects = core.raft.start();
        self.handle_effects(&mut core, effects);
    }

    pub fn id(&self) -> &NodeId {
        self.membership.local_id()
    }

    #[cfg(test)]
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    #[cfg(test)]
    pub fn raft_status(&self) -> crate::raft::api::RaftStatus {
        self.core.lock().unwrap().raft.status()
    }

    /// Handles one inbound message and returns the reply for the sender, if
    /// any. Pushed events for subscriptions are written to `outbox`.
    pub async fn handle_msg(&self, msg: Message, outbox: &Outbox) -> Option<Message> {
        if self.membership.is_member(&msg.src) {
            self.liveness.record_alive(&msg.src, None, Instant::now());
        }
        if msg.body.in_reply_to.is_some() {
            self.sync_resp.handle(msg);
            return None;
        }
        let data = match &msg.body.data {
            BodyData::Raft(rpc) => {
                self.handle_rpc(rpc.clone());
                return None;
            }
            BodyData::Heartbeat => BodyData::HeartbeatOk(HeartbeatOkData {
                alive: true,
                role: self.role(),
            }),
            BodyData::Status(StatusData { code }) => self.session_status(code),
            BodyData::Subscribe(StatusData { code }) => {
                self.subscribe(&msg.src, &normalize_code(code), outbox);
                BodyData::SubscribeOk
            }
            BodyData::Forwarded(ForwardedData { request }) => self.route(request, true).await,
            data if data.is_mutation() => self.route(data, false).await,
            other => {
                debug!("[{}] Unexpected message {other:?} from {}", self.id(), msg.src);
                let err = NodeError::MalformedRequest(format!("unexpected message from {}", msg.src));
                BodyData::Error(err.into())
            }
        };
        Some(msg.create_response(data))
    }

    fn handle_rpc(&self, rpc: Rpc<Command>) {
        let mut core = self.core.lock().unwrap();
        let current = core.raft.get_current_term();
        if rpc.term() < current {
            debug!(
                "[{}] Rejecting rpc: {}",
                self.id(),
                NodeError::StaleTerm {
                    received: rpc.term(),
                    current,
                }
            );
        }
        let effects = core.raft.on_event(Event::ReceivedRpc(rpc));
        self.handle_effects(&mut core, effects);
    }

    fn fire_timer(&self, kind: TimerKind, deadline: Instant) {
        let mut core = self.core.lock().unwrap();
        if !self.timer(kind).disarm(deadline) {
            return;
        }
        let effects = core.raft.on_event(Event::TimerUp(kind));
        self.handle_effects(&mut core, effects);
    }

    fn timer(&self, kind: TimerKind) -> &Timer {
        match kind {
            TimerKind::Election => &self.election_timer,
            TimerKind::Heartbeat => &self.heartbeat_timer,
        }
    }

    /// Executes the consensus side effects. Runs under the node lock so
    /// entries are applied and published in log order.
    fn handle_effects(&self, core: &mut NodeCore, effects: SideEffects<Command>) {
        for effect in effects {
            match effect {
                SideEffect::SetTimer { timer, duration } => self.timer(timer).set(duration),
                SideEffect::CancelTimer { timer } => self.timer(timer).cancel(),
                SideEffect::SendRpc { to, rpc } => {
                    self.transport
                        .send(Message::new(self.id().clone(), to, BodyData::Raft(rpc)));
                }
                SideEffect::Apply { index, entry } => {
                    if let Some(applied) = core.store.apply(index, &entry.data) {
                        debug!("[{}] Applied entry {index}: {:?}", self.id(), entry.data);
                        for event in &applied.events {
                            self.hub.publish(event);
                        }
                        core.pending.resolve(index, entry.term, applied.outcome);
                    }
                }
                SideEffect::LeadershipLost => {
                    let leader = core.raft.get_leader_id().cloned();
                    info!(
                        "[{}] Lost leadership, failing {} pending requests",
                        self.id(),
                        core.pending.len()
                    );
                    core.pending.fail_all(leader);
                }
            }
        }
    }

    fn role(&self) -> RoleKind {
        RoleKind::from(self.core.lock().unwrap().raft.get_role())
    }

    /// Served from the locally applied state without going through the log.
    fn session_status(&self, code: &str) -> BodyData {
        let core = self.core.lock().unwrap();
        match core.store.store().snapshot(&normalize_code(code)) {
            Ok(snapshot) => BodyData::StatusOk(StatusOkData {
                status: snapshot.status,
                current_question: snapshot.current_question,
                players: snapshot.players,
            }),
            Err(err) => BodyData::Error(NodeError::from(err).into()),
        }
    }

    fn subscribe(&self, client: &NodeId, code: &str, outbox: &Outbox) {
        let mut subscription = self.hub.subscribe(code);
        let outbox = outbox.clone();
        let local = self.id().clone();
        let client = client.clone();
        debug!("[{local}] {client} subscribed to session {code}");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = subscription.recv() => match event {
                        Some(event) => {
                            let msg = Message::new(local.clone(), client.clone(), BodyData::Event(event));
                            if outbox.send(msg).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = outbox.closed() => break,
                }
            }
        });
    }
}
