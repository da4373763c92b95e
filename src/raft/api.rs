use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use serde::{Deserialize, Serialize};

pub type Term = u64;
pub type NodeId = String;
pub type LogIndex = usize;

pub struct RaftConfig {
    pub node_id: NodeId,
    pub cluster: Vec<NodeId>,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
}

/// Position of a log entry. Ordering compares the term first and the index
/// second, which is exactly the "at least as up to date" rule for votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogEntryId {
    pub term: Term,
    pub index: LogIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry<T> {
    pub data: T,
    pub term: Term,
}

pub enum NodeRole {
    Follower,
    Candidate(CandidateState),
    Leader(LeaderState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Follower,
    Candidate,
    Leader,
}

impl From<&NodeRole> for RoleKind {
    fn from(role: &NodeRole) -> Self {
        match role {
            NodeRole::Follower => RoleKind::Follower,
            NodeRole::Candidate(_) => RoleKind::Candidate,
            NodeRole::Leader(_) => RoleKind::Leader,
        }
    }
}

pub struct CandidateState {
    pub votes_received: HashSet<NodeId>,
}

pub struct NodeReplicationState {
    pub next_index: LogIndex,
    pub match_index: LogIndex,
}

pub struct LeaderState {
    pub replication: HashMap<NodeId, NodeReplicationState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Election,
    Heartbeat,
}

#[derive(Debug)]
pub enum Event<T> {
    TimerUp(TimerKind),
    ReceivedRpc(Rpc<T>),
}

#[derive(Debug)]
pub enum SideEffect<T> {
    SetTimer {
        timer: TimerKind,
        duration: Duration,
    },
    CancelTimer {
        timer: TimerKind,
    },
    SendRpc {
        to: NodeId,
        rpc: Rpc<T>,
    },
    /// Committed entry ready for the state machine. Emitted once per index,
    /// in increasing index order.
    Apply {
        index: LogIndex,
        entry: LogEntry<T>,
    },
    LeadershipLost,
}

pub type SideEffects<T> = Vec<SideEffect<T>>;

/// Result of accepting a new command on the leader.
#[derive(Debug)]
pub struct Proposal<T> {
    pub entry: LogEntryId,
    pub effects: SideEffects<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "rpc")]
pub enum Rpc<T> {
    VoteRequest(VoteRequestRpc),
    VoteResponse(VoteResponseRpc),
    ReplicateLogRequest(ReplicateLogRequestRpc<T>),
    ReplicateLogResponse(ReplicateLogResponseRpc),
}

impl<T> Rpc<T> {
    pub fn term(&self) -> Term {
        match self {
            Rpc::VoteRequest(rpc) => rpc.term,
            Rpc::VoteResponse(rpc) => rpc.current_term,
            Rpc::ReplicateLogRequest(rpc) => rpc.term,
            Rpc::ReplicateLogResponse(rpc) => rpc.current_term,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateLogRequestRpc<T> {
    pub leader_id: NodeId,
    pub term: Term,
    pub prev_log: LogEntryId,
    pub entries: Vec<LogEntry<T>>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateLogResponseRpc {
    pub node_id: NodeId,
    pub current_term: Term,
    pub match_index: LogIndex,
    pub log_len: usize,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequestRpc {
    pub candidate_id: NodeId,
    pub term: Term,
    pub last_log: LogEntryId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResponseRpc {
    pub node_id: NodeId,
    pub vote_granted: bool,
    pub current_term: Term,
}

/// Point-in-time view of a node's consensus state.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaftStatus {
    pub term: Term,
    pub role: RoleKind,
    pub leader_id: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_log_index: LogIndex,
}
