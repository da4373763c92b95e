use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, Weak},
};

use log::debug;
use tokio::{sync::mpsc, time::Duration};

use super::{Outbox, Transport};
use crate::node::Node;
use crate::protocol::{
    trivia::{BodyData, Message},
    NodeId,
};
use crate::session::SessionEvent;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(20);

/// In-process network connecting nodes and test clients. Node-to-node links
/// can be cut; clients always reach the node they address.
pub struct LocalNetwork {
    latency: Duration,
    nodes: Mutex<HashMap<NodeId, Weak<Node>>>,
    clients: Mutex<HashMap<NodeId, Outbox>>,
    isolated: Mutex<HashSet<NodeId>>,
    replies: Outbox,
}

impl LocalNetwork {
    pub fn new(latency: Duration) -> Arc<Self> {
        let (replies, mut inbox) = mpsc::unbounded_channel();
        let network = Arc::new(Self {
            latency,
            nodes: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            isolated: Mutex::new(HashSet::new()),
            replies,
        });
        let weak = Arc::downgrade(&network);
        tokio::spawn(async move {
            while let Some(msg) = inbox.recv().await {
                match weak.upgrade() {
                    Some(network) => network.deliver(msg),
                    None => return,
                }
            }
        });
        network
    }

    pub fn transport(self: &Arc<Self>) -> Arc<LocalTransport> {
        Arc::new(LocalTransport {
            network: self.clone(),
        })
    }

    pub fn register(&self, node: &Arc<Node>) {
        self.nodes
            .lock()
            .unwrap()
            .insert(node.id().clone(), Arc::downgrade(node));
    }

    pub fn client(self: &Arc<Self>, id: &str) -> LocalClient {
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.clients.lock().unwrap().insert(id.to_owned(), outbox);
        LocalClient {
            id: id.to_owned(),
            network: self.clone(),
            inbox,
            events: VecDeque::new(),
        }
    }

    /// Cuts every link between `node` and the other nodes.
    pub fn isolate(&self, node: &str) {
        self.isolated.lock().unwrap().insert(node.to_owned());
    }

    pub fn heal(&self) {
        self.isolated.lock().unwrap().clear();
    }

    fn is_cut(&self, src: &str, dest: &str) -> bool {
        let nodes = self.nodes.lock().unwrap();
        if src == dest || !nodes.contains_key(src) || !nodes.contains_key(dest) {
            return false;
        }
        let isolated = self.isolated.lock().unwrap();
        isolated.contains(src) || isolated.contains(dest)
    }

    fn deliver(&self, msg: Message) {
        if self.is_cut(&msg.src, &msg.dest) {
            debug!("Dropping {} -> {} on cut link", msg.src, msg.dest);
            return;
        }
        if let Some(client) = self.clients.lock().unwrap().get(&msg.dest) {
            let _ = client.send(msg);
            return;
        }
        let node = self.nodes.lock().unwrap().get(&msg.dest).and_then(Weak::upgrade);
        let Some(node) = node else {
            debug!("Dropping message for unknown endpoint {}", msg.dest);
            return;
        };
        let outbox = self.replies.clone();
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if let Some(reply) = node.handle_msg(msg, &outbox).await {
                let _ = outbox.send(reply);
            }
        });
    }
}

pub struct LocalTransport {
    network: Arc<LocalNetwork>,
}

impl Transport<BodyData> for LocalTransport {
    fn send(&self, msg: Message) {
        self.network.deliver(msg);
    }
}

/// Test client attached to a [`LocalNetwork`].
pub struct LocalClient {
    id: NodeId,
    network: Arc<LocalNetwork>,
    inbox: mpsc::UnboundedReceiver<Message>,
    events: VecDeque<SessionEvent>,
}

impl LocalClient {
    /// Sends `data` to `dest` and waits for the matching reply. Events that
    /// arrive meanwhile are queued for [`LocalClient::next_event`].
    pub async fn request(&mut self, dest: &str, data: BodyData) -> BodyData {
        let msg = Message::request(self.id.clone(), dest, data);
        let msg_id = msg.body.msg_id;
        self.network.deliver(msg);
        loop {
            let msg = self.recv().await;
            if msg.body.in_reply_to.is_some() && msg.body.in_reply_to == msg_id {
                return msg.body.data;
            }
            if let BodyData::Event(event) = msg.body.data {
                self.events.push_back(event);
            }
        }
    }

    pub async fn next_event(&mut self) -> SessionEvent {
        if let Some(event) = self.events.pop_front() {
            return event;
        }
        loop {
            if let BodyData::Event(event) = self.recv().await.body.data {
                return event;
            }
        }
    }

    async fn recv(&mut self) -> Message {
        tokio::time::timeout(CLIENT_TIMEOUT, self.inbox.recv())
            .await
            .expect("Timed out waiting for a message")
            .expect("Network is gone")
    }
}
