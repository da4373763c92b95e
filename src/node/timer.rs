use std::sync::Weak;

use tokio::{
    sync::watch,
    time::{Duration, Instant},
};

use super::Node;
use crate::raft::api::TimerKind;

/// One-shot resettable deadline. Arming replaces any previous deadline.
pub struct Timer {
    deadline: watch::Sender<Option<Instant>>,
}

impl Timer {
    pub fn new() -> Self {
        let (deadline, _) = watch::channel(None);
        Self { deadline }
    }

    pub fn set(&self, after: Duration) {
        self.deadline.send_replace(Some(Instant::now() + after));
    }

    pub fn cancel(&self) {
        self.deadline.send_replace(None);
    }

    #[cfg(test)]
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.borrow()
    }

    /// Clears the deadline if it is still `expected`. Returns false when the
    /// timer was reset or cancelled in the meantime.
    pub fn disarm(&self, expected: Instant) -> bool {
        self.deadline.send_if_modified(|deadline| {
            if *deadline == Some(expected) {
                *deadline = None;
                true
            } else {
                false
            }
        })
    }

    fn watch(&self) -> watch::Receiver<Option<Instant>> {
        self.deadline.subscribe()
    }
}

/// Waits for the node's `kind` timer and fires it, until the node is gone.
pub(super) async fn run_timer(node: Weak<Node>, kind: TimerKind) {
    let mut deadline = match node.upgrade() {
        Some(node) => node.timer(kind).watch(),
        None => return,
    };
    loop {
        let current = *deadline.borrow_and_update();
        match current {
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        let Some(node) = node.upgrade() else { return };
                        node.fire_timer(kind, at);
                    }
                    changed = deadline.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
            None => {
                if deadline.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}
