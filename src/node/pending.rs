use std::collections::BTreeMap;

use log::debug;
use tokio::sync::oneshot;

use crate::error::{NodeError, ValidationError};
use crate::protocol::NodeId;
use crate::raft::api::{LogEntryId, LogIndex, Term};
use crate::session::CommandOutcome;

pub type CommitResult = Result<CommandOutcome, NodeError>;

struct Waiter {
    term: Term,
    sender: oneshot::Sender<CommitResult>,
}

/// Client requests waiting for their log entry to be applied, keyed by the
/// entry's index.
#[derive(Default)]
pub struct PendingCommits {
    waiters: BTreeMap<LogIndex, Waiter>,
}

impl PendingCommits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: LogEntryId) -> oneshot::Receiver<CommitResult> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.insert(
            entry.index,
            Waiter {
                term: entry.term,
                sender,
            },
        );
        receiver
    }

    /// Completes the waiter for `index`. An entry applied with a different
    /// term than the one proposed means the proposal was overwritten.
    pub fn resolve(
        &mut self,
        index: LogIndex,
        term: Term,
        outcome: Result<CommandOutcome, ValidationError>,
    ) {
        let Some(waiter) = self.waiters.remove(&index) else {
            return;
        };
        let result = if waiter.term == term {
            outcome.map_err(NodeError::from)
        } else {
            Err(NodeError::NotLeader { leader: None })
        };
        if waiter.sender.send(result).is_err() {
            debug!("Waiter for entry {index} is gone");
        }
    }

    /// Fails every waiter, used when leadership is lost.
    pub fn fail_all(&mut self, leader: Option<NodeId>) {
        for (_, waiter) in std::mem::take(&mut self.waiters) {
            let _ = waiter.sender.send(Err(NodeError::NotLeader {
                leader: leader.clone(),
            }));
        }
    }

    pub fn cancel(&mut self, index: LogIndex) {
        self.waiters.remove(&index);
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}
