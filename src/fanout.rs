use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use log::debug;
use tokio::sync::mpsc;

use crate::session::{SessionCode, SessionEvent};

type SubscriberId = u64;

#[derive(Default)]
struct HubInner {
    next_id: SubscriberId,
    subscribers: HashMap<SessionCode, HashMap<SubscriberId, mpsc::UnboundedSender<SessionEvent>>>,
}

impl HubInner {
    fn unregister(&mut self, code: &str, id: SubscriberId) {
        if let Some(subs) = self.subscribers.get_mut(code) {
            subs.remove(&id);
            if subs.is_empty() {
                self.subscribers.remove(code);
            }
        }
    }
}

/// Registry of clients subscribed to session events on this node.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<Mutex<HubInner>>,
}

/// Live registration; dropping it unregisters.
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    _guard: SubscriptionGuard,
}

struct SubscriptionGuard {
    hub: Weak<Mutex<HubInner>>,
    code: SessionCode,
    id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.lock().unwrap().unregister(&self.code, self.id);
        }
    }
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, code: &str) -> Subscription {
        let (sender, events) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .subscribers
            .entry(code.to_owned())
            .or_default()
            .insert(id, sender);
        Subscription {
            events,
            _guard: SubscriptionGuard {
                hub: Arc::downgrade(&self.inner),
                code: code.to_owned(),
                id,
            },
        }
    }

    /// Delivers `event` to every subscriber of its session. After the final
    /// event of a session all of its registrations are released.
    pub fn publish(&self, event: &SessionEvent) {
        let mut inner = self.inner.lock().unwrap();
        let Some(subs) = inner.subscribers.get_mut(&event.code) else {
            return;
        };
        subs.retain(|_, sender| sender.send(event.clone()).is_ok());
        if event.is_final() || subs.is_empty() {
            debug!("Releasing subscribers of session {}", event.code);
            inner.subscribers.remove(&event.code);
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, code: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .get(code)
            .map_or(0, |subs| subs.len())
    }
}
