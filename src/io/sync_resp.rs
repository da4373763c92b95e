use std::{collections::HashMap, fmt::Debug, sync::Mutex};

use log::debug;
use tokio::{sync::oneshot, time::Duration};

use super::Transport;
use crate::protocol::{Message, MessageId};

/// Matches replies to outstanding requests by `in_reply_to`.
pub struct SyncRespHandler<T> {
    pending: Mutex<HashMap<MessageId, oneshot::Sender<Message<T>>>>,
}

impl<T: Debug> SyncRespHandler<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle(&self, msg: Message<T>) {
        if let Some(ref msg_id) = msg.body.in_reply_to {
            let sender = self.pending.lock().unwrap().remove(msg_id);
            match sender {
                Some(sender) => sender
                    .send(msg)
                    .unwrap_or_else(|resp| debug!("Reply arrived after caller gave up: {resp:?}")),
                None => debug!("Ignoring unexpected reply {msg:?}"),
            }
        }
    }

    /// Sends `msg` and waits for its reply. `None` on timeout or when the
    /// message carries no id.
    pub async fn send(
        &self,
        transport: &dyn Transport<T>,
        msg: Message<T>,
        timeout: Duration,
    ) -> Option<Message<T>> {
        let msg_id = msg.body.msg_id?;
        let (send, recv) = oneshot::channel();
        self.pending.lock().unwrap().insert(msg_id, send);
        transport.send(msg);
        match tokio::time::timeout(timeout, recv).await {
            Ok(Ok(resp)) => Some(resp),
            _ => {
                self.pending.lock().unwrap().remove(&msg_id);
                None
            }
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
