//! Message transport between nodes and clients.

use tokio::sync::mpsc;

use crate::protocol::{trivia, Message};

#[cfg(test)]
pub mod local;
pub mod sync_resp;
pub mod tcp;

/// Sends messages addressed to other cluster members. Delivery is best
/// effort: a message that cannot be delivered is dropped.
pub trait Transport<T>: Send + Sync {
    fn send(&self, msg: Message<T>);
}

/// Write side of one connection. Replies and pushed events for the peer on
/// the other end go here.
pub type Outbox = mpsc::UnboundedSender<trivia::Message>;
