use std::{collections::HashSet, time::Duration};

use log::{debug, info, warn};
use rand::prelude::*;

use super::api::*;

pub struct RaftStateMachine<T> {
    config: RaftConfig,
    role: NodeRole,
    current_term: Term,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    log: Vec<LogEntry<T>>,
    commit_index: LogIndex,
    last_applied: LogIndex,
}

impl<T: Clone> RaftStateMachine<T> {
    pub fn new(config: RaftConfig) -> Self {
        Self {
            config,
            role: NodeRole::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
        }
    }

    pub fn start(&self) -> SideEffects<T> {
        vec![SideEffect::SetTimer {
            timer: TimerKind::Election,
            duration: self.initial_election_timeout(),
        }]
    }

    pub fn on_event(&mut self, event: Event<T>) -> SideEffects<T> {
        match event {
            Event::TimerUp(TimerKind::Election) => match self.role {
                NodeRole::Follower => self.start_new_election(),
                NodeRole::Candidate(_) => self.start_new_election(),
                NodeRole::Leader(_) => vec![],
            },
            Event::TimerUp(TimerKind::Heartbeat) => match self.role {
                NodeRole::Leader(_) => self.send_heartbeat(),
                _ => vec![],
            },
            Event::ReceivedRpc(rpc) => match rpc {
                Rpc::VoteRequest(rpc) => self.handle_vote_request(rpc),
                Rpc::VoteResponse(rpc) => self.handle_vote_response(rpc),
                Rpc::ReplicateLogRequest(rpc) => self.handle_replicate_log_request(rpc),
                Rpc::ReplicateLogResponse(rpc) => self.handle_replicate_log_response(rpc),
            },
        }
    }

    /// Appends `data` to the local log if this node is the leader and starts
    /// replicating it right away.
    pub fn propose(&mut self, data: T) -> Option<Proposal<T>> {
        if !self.is_leader() {
            return None;
        }
        self.log.push(LogEntry {
            data,
            term: self.current_term,
        });
        let entry = self.last_log_id();
        debug!(
            "[{}] Appended entry {} at term {}",
            self.config.node_id, entry.index, entry.term
        );
        let mut effects = self.replicate_log_all_nodes();
        effects.append(&mut self.maybe_advance_commit_index());
        Some(Proposal { entry, effects })
    }

    pub fn get_role(&self) -> &NodeRole {
        &self.role
    }

    pub fn get_current_term(&self) -> Term {
        self.current_term
    }

    #[cfg(test)]
    pub fn get_voted_for(&self) -> Option<&NodeId> {
        self.voted_for.as_ref()
    }

    pub fn get_leader_id(&self) -> Option<&NodeId> {
        self.leader_id.as_ref()
    }

    #[cfg(test)]
    pub fn get_commit_index(&self) -> LogIndex {
        self.commit_index
    }

    #[cfg(test)]
    pub fn get_last_applied(&self) -> LogIndex {
        self.last_applied
    }

    #[cfg(test)]
    pub fn get_log(&self) -> &[LogEntry<T>] {
        &self.log
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, NodeRole::Leader(_))
    }

    #[cfg(test)]
    pub fn status(&self) -> RaftStatus {
        RaftStatus {
            term: self.current_term,
            role: RoleKind::from(&self.role),
            leader_id: self.leader_id.clone(),
            commit_index: self.commit_index,
            last_log_index: self.log.len(),
        }
    }

    fn handle_vote_request(&mut self, rpc: VoteRequestRpc) -> SideEffects<T> {
        let mut effects = Vec::new();
        let term_ok = rpc.term >= self.current_term;
        let updated_term = self.maybe_advance_current_term(rpc.term, &mut effects);
        let vote_ok = match self.voted_for {
            Some(ref node_id) => *node_id == rpc.candidate_id,
            None => true,
        };
        let log_ok = rpc.last_log >= self.last_log_id();
        let vote_granted = term_ok && vote_ok && log_ok;
        if vote_granted && self.voted_for.is_none() {
            self.voted_for = Some(rpc.candidate_id.clone());
        }
        if !term_ok {
            debug!(
                "[{}] Rejected vote for {} with stale term {} < {}",
                self.config.node_id, rpc.candidate_id, rpc.term, self.current_term
            );
        }
        if vote_granted || updated_term {
            effects.push(self.set_election_timer());
        }
        effects.push(SideEffect::SendRpc {
            to: rpc.candidate_id,
            rpc: Rpc::VoteResponse(VoteResponseRpc {
                node_id: self.config.node_id.clone(),
                vote_granted,
                current_term: self.current_term,
            }),
        });
        effects
    }

    fn handle_vote_response(&mut self, rpc: VoteResponseRpc) -> SideEffects<T> {
        let mut effects = Vec::new();
        if self.maybe_advance_current_term(rpc.current_term, &mut effects) {
            effects.push(self.set_election_timer());
            return effects;
        }
        if self.current_term == rpc.current_term && rpc.vote_granted {
            let majority = self.nodes_majority();
            let won = match self.role {
                NodeRole::Candidate(ref mut state) => {
                    state.votes_received.insert(rpc.node_id);
                    state.votes_received.len() >= majority
                }
                _ => false,
            };
            if won {
                effects.append(&mut self.become_leader());
            }
        }
        effects
    }

    fn handle_replicate_log_request(&mut self, rpc: ReplicateLogRequestRpc<T>) -> SideEffects<T> {
        let mut effects = Vec::new();
        if rpc.term < self.current_term {
            debug!(
                "[{}] Rejected append entries from {} with stale term {} < {}",
                self.config.node_id, rpc.leader_id, rpc.term, self.current_term
            );
            effects.push(self.replicate_log_response(rpc.leader_id, 0, false));
            return effects;
        }
        self.maybe_advance_current_term(rpc.term, &mut effects);
        match self.role {
            NodeRole::Candidate(_) => self.role = NodeRole::Follower,
            NodeRole::Leader(_) => {
                warn!(
                    "[{}] Ignoring append entries from {}, both lead term {}",
                    self.config.node_id, rpc.leader_id, rpc.term
                );
                effects.push(self.replicate_log_response(rpc.leader_id, 0, false));
                return effects;
            }
            NodeRole::Follower => {}
        }
        if self.leader_id.as_ref() != Some(&rpc.leader_id) {
            info!(
                "[{}] Following leader {} at term {}",
                self.config.node_id, rpc.leader_id, rpc.term
            );
            self.leader_id = Some(rpc.leader_id.clone());
        }
        effects.push(self.set_election_timer());
        let log_ok = self.log.len() >= rpc.prev_log.index
            && self.log_id_at(rpc.prev_log.index) == rpc.prev_log;
        if !log_ok {
            effects.push(self.replicate_log_response(rpc.leader_id, 0, false));
            return effects;
        }
        let match_index = self.append_entries(rpc.prev_log.index, rpc.entries);
        if rpc.leader_commit > self.commit_index {
            effects.append(&mut self.advance_commit_index(rpc.leader_commit.min(match_index)));
        }
        effects.push(self.replicate_log_response(rpc.leader_id, match_index, true));
        effects
    }

    fn handle_replicate_log_response(&mut self, rpc: ReplicateLogResponseRpc) -> SideEffects<T> {
        let mut effects = Vec::new();
        if self.maybe_advance_current_term(rpc.current_term, &mut effects) {
            effects.push(self.set_election_timer());
            return effects;
        }
        if rpc.current_term != self.current_term {
            return effects;
        }
        let last_index = self.log.len();
        let next_index = match self.role {
            NodeRole::Leader(ref mut state) => match state.replication.get_mut(&rpc.node_id) {
                Some(node) => {
                    if rpc.success {
                        node.match_index = node.match_index.max(rpc.match_index);
                        node.next_index = node.next_index.max(node.match_index + 1);
                    } else {
                        node.next_index = node
                            .next_index
                            .saturating_sub(1)
                            .min(rpc.log_len + 1)
                            .max(node.match_index + 1);
                    }
                    node.next_index
                }
                None => return effects,
            },
            _ => return effects,
        };
        if rpc.success {
            effects.append(&mut self.maybe_advance_commit_index());
        }
        if !rpc.success || next_index <= last_index {
            effects.push(self.replicate_log(&rpc.node_id));
        }
        effects
    }

    fn send_heartbeat(&self) -> SideEffects<T> {
        let mut effects = self.replicate_log_all_nodes();
        effects.push(self.set_heartbeat_timer());
        effects
    }

    fn replicate_log_all_nodes(&self) -> SideEffects<T> {
        self.other_nodes()
            .map(|node| self.replicate_log(node))
            .collect()
    }

    fn replicate_log(&self, node_id: &NodeId) -> SideEffect<T> {
        let next_index = match self.role {
            NodeRole::Leader(ref state) => state
                .replication
                .get(node_id)
                .map_or(self.log.len() + 1, |node| node.next_index),
            _ => self.log.len() + 1,
        };
        SideEffect::SendRpc {
            to: node_id.clone(),
            rpc: Rpc::ReplicateLogRequest(ReplicateLogRequestRpc {
                leader_id: self.config.node_id.clone(),
                term: self.current_term,
                prev_log: self.log_id_at(next_index - 1),
                entries: self.logs_tail(next_index),
                leader_commit: self.commit_index,
            }),
        }
    }

    fn replicate_log_response(&self, to: NodeId, match_index: LogIndex, success: bool) -> SideEffect<T> {
        SideEffect::SendRpc {
            to,
            rpc: Rpc::ReplicateLogResponse(ReplicateLogResponseRpc {
                node_id: self.config.node_id.clone(),
                current_term: self.current_term,
                match_index,
                log_len: self.log.len(),
                success,
            }),
        }
    }

    /// Writes `entries` after `prev_index`, dropping any local suffix that
    /// conflicts with them. Returns the index of the last entry covered.
    fn append_entries(&mut self, prev_index: LogIndex, entries: Vec<LogEntry<T>>) -> LogIndex {
        let mut index = prev_index;
        for entry in entries {
            index += 1;
            match self.log.get(index - 1) {
                Some(existing) if existing.term == entry.term => {}
                Some(_) => {
                    debug!(
                        "[{}] Truncating conflicting log suffix from index {}",
                        self.config.node_id, index
                    );
                    self.log.truncate(index - 1);
                    self.log.push(entry);
                }
                None => self.log.push(entry),
            }
        }
        index
    }

    /// Only entries of the current term are counted; earlier ones are
    /// committed by being covered.
    fn maybe_advance_commit_index(&mut self) -> SideEffects<T> {
        let majority = self.nodes_majority();
        let new_commit = match self.role {
            NodeRole::Leader(ref state) => (self.commit_index + 1..=self.log.len())
                .rev()
                .find(|&index| {
                    self.log[index - 1].term == self.current_term
                        && 1 + state
                            .replication
                            .values()
                            .filter(|node| node.match_index >= index)
                            .count()
                            >= majority
                }),
            _ => None,
        };
        match new_commit {
            Some(index) => self.advance_commit_index(index),
            None => vec![],
        }
    }

    fn advance_commit_index(&mut self, index: LogIndex) -> SideEffects<T> {
        if index <= self.commit_index {
            return vec![];
        }
        debug!(
            "[{}] Commit index advanced {} -> {}",
            self.config.node_id, self.commit_index, index
        );
        self.commit_index = index;
        let mut effects = Vec::new();
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            effects.push(SideEffect::Apply {
                index: self.last_applied,
                entry: self.log[self.last_applied - 1].clone(),
            });
        }
        effects
    }

    fn maybe_advance_current_term(&mut self, term: Term, effects: &mut SideEffects<T>) -> bool {
        if self.current_term < term {
            info!(
                "[{}] Observed term {} > {}, stepping down to follower",
                self.config.node_id, term, self.current_term
            );
            if self.is_leader() {
                effects.push(SideEffect::CancelTimer {
                    timer: TimerKind::Heartbeat,
                });
                effects.push(SideEffect::LeadershipLost);
            }
            self.current_term = term;
            self.role = NodeRole::Follower;
            self.voted_for = None;
            self.leader_id = None;
            true
        } else {
            false
        }
    }

    fn transition_to_leader(&mut self) {
        self.role = NodeRole::Leader(LeaderState {
            replication: self
                .other_nodes()
                .map(|node| {
                    (
                        node.clone(),
                        NodeReplicationState {
                            next_index: self.last_log_id().index + 1,
                            match_index: 0,
                        },
                    )
                })
                .collect(),
        });
        self.leader_id = Some(self.config.node_id.clone());
    }

    fn become_leader(&mut self) -> SideEffects<T> {
        info!(
            "[{}] Won election for term {}",
            self.config.node_id, self.current_term
        );
        self.transition_to_leader();
        let mut effects = vec![SideEffect::CancelTimer {
            timer: TimerKind::Election,
        }];
        effects.append(&mut self.send_heartbeat());
        effects
    }

    fn start_new_election(&mut self) -> SideEffects<T> {
        self.role = NodeRole::Candidate(CandidateState {
            votes_received: HashSet::from([self.config.node_id.clone()]),
        });
        self.current_term += 1;
        self.voted_for = Some(self.config.node_id.clone());
        self.leader_id = None;
        info!(
            "[{}] Starting election for term {}",
            self.config.node_id, self.current_term
        );
        let mut effects = Vec::new();
        effects.extend(self.other_nodes().map(|node_id| SideEffect::SendRpc {
            to: node_id.clone(),
            rpc: Rpc::VoteRequest(VoteRequestRpc {
                candidate_id: self.config.node_id.clone(),
                term: self.current_term,
                last_log: self.last_log_id(),
            }),
        }));
        effects.push(self.set_election_timer());
        if self.nodes_majority() <= 1 {
            effects.append(&mut self.become_leader());
        }
        effects
    }

    fn nodes_majority(&self) -> usize {
        self.config.cluster.len() / 2 + 1
    }

    fn last_log_id(&self) -> LogEntryId {
        LogEntryId {
            index: self.log.len(),
            term: self.log.last().map(|e| e.term).unwrap_or(0),
        }
    }

    fn logs_tail(&self, from_index: LogIndex) -> Vec<LogEntry<T>> {
        self.log[from_index - 1..].to_vec()
    }

    fn log_id_at(&self, log_index: LogIndex) -> LogEntryId {
        LogEntryId {
            term: if log_index > 0 {
                self.log[log_index - 1].term
            } else {
                0
            },
            index: log_index,
        }
    }

    fn other_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.config
            .cluster
            .iter()
            .filter(|&id| id != &self.config.node_id)
    }

    /// The first timer after start is staggered by membership rank so a cold
    /// cluster elects its lowest-id member without a split vote.
    fn initial_election_timeout(&self) -> Duration {
        let rank = self
            .config
            .cluster
            .iter()
            .position(|id| id == &self.config.node_id)
            .unwrap_or(0);
        let spread = self.election_timeout_spread();
        self.config.election_timeout_min + spread * rank as u32 / self.config.cluster.len().max(1) as u32
    }

    fn election_timeout_spread(&self) -> Duration {
        self.config
            .election_timeout_max
            .saturating_sub(self.config.election_timeout_min)
    }

    fn set_election_timer(&self) -> SideEffect<T> {
        let spread = self.election_timeout_spread();
        let delta_nanos = if spread.is_zero() {
            0
        } else {
            thread_rng().gen_range(0..spread.as_nanos())
        };
        SideEffect::SetTimer {
            timer: TimerKind::Election,
            duration: self.config.election_timeout_min + Duration::from_nanos(delta_nanos as u64),
        }
    }

    fn set_heartbeat_timer(&self) -> SideEffect<T> {
        SideEffect::SetTimer {
            timer: TimerKind::Heartbeat,
            duration: self.config.heartbeat_interval,
        }
    }
}
