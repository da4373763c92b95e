use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::Duration,
};

use super::{Outbox, Transport};
use crate::error::NodeError;
use crate::membership::Membership;
use crate::node::Node;
use crate::protocol::{
    trivia::{BodyData, Message},
    NodeId,
};

/// Newline-delimited JSON over TCP. Inbound connections carry client and
/// peer requests; replies go back on the connection they arrived on.
/// Outbound peer links are opened on first use and reopened after a failure.
/// Connecting and each write are bounded by `io_timeout`.
pub struct TcpTransport {
    membership: Membership,
    io_timeout: Duration,
    links: Mutex<HashMap<NodeId, Outbox>>,
    node: OnceCell<Weak<Node>>,
}

impl TcpTransport {
    pub fn new(membership: Membership, io_timeout: Duration) -> Self {
        Self {
            membership,
            io_timeout,
            links: Mutex::new(HashMap::new()),
            node: OnceCell::new(),
        }
    }

    pub fn bind(&self, node: &Arc<Node>) {
        if self.node.set(Arc::downgrade(node)).is_err() {
            warn!("Transport is already bound to a node");
        }
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<(), NodeError> {
        info!(
            "[{}] Listening on {}",
            self.membership.local_id(),
            listener.local_addr()?
        );
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("Accepted connection from {addr}");
            let (outbox, inbox) = mpsc::unbounded_channel();
            tokio::spawn(serve_connection(
                stream,
                outbox,
                inbox,
                self.node(),
                self.io_timeout,
            ));
        }
    }

    fn node(&self) -> Weak<Node> {
        self.node.get().cloned().unwrap_or_default()
    }

    fn open_link(&self, peer: &NodeId) -> Option<Outbox> {
        let addr = self.membership.addr_of(peer)?.to_owned();
        let (outbox, inbox) = mpsc::unbounded_channel();
        let node = self.node();
        let link = outbox.clone();
        let peer = peer.clone();
        let io_timeout = self.io_timeout;
        tokio::spawn(async move {
            // Returning without serving drops the inbox, so the next send
            // to this peer dials again.
            match tokio::time::timeout(io_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => {
                    debug!("Connected to {peer} at {addr}");
                    serve_connection(stream, link, inbox, node, io_timeout).await;
                }
                Ok(Err(err)) => debug!("Failed to connect to {peer} at {addr}: {err}"),
                Err(_) => debug!("Connecting to {peer} at {addr} timed out after {io_timeout:?}"),
            }
        });
        Some(outbox)
    }
}

impl Transport<BodyData> for TcpTransport {
    fn send(&self, msg: Message) {
        if !self.membership.is_member(&msg.dest) {
            debug!("Dropping message for unknown node {}", msg.dest);
            return;
        }
        let mut links = self.links.lock().unwrap();
        let link = match links.get(&msg.dest) {
            Some(link) if !link.is_closed() => link.clone(),
            _ => match self.open_link(&msg.dest) {
                Some(link) => {
                    links.insert(msg.dest.clone(), link.clone());
                    link
                }
                None => return,
            },
        };
        if let Err(err) = link.send(msg) {
            debug!("Dropping message for {}, link is down", err.0.dest);
            links.remove(&err.0.dest);
        }
    }
}

/// Pumps one connection until either side fails. Every inbound message is
/// handled on its own task so a slow commit never stalls the connection.
async fn serve_connection(
    stream: TcpStream,
    outbox: Outbox,
    inbox: mpsc::UnboundedReceiver<Message>,
    node: Weak<Node>,
    write_timeout: Duration,
) {
    let (reader, writer) = stream.into_split();
    // Whichever half stops first closes the connection. Dropping the inbox
    // marks the outbox closed, which ends subscriptions bound to this
    // connection and makes the next peer send reconnect.
    tokio::select! {
        _ = write_lines(writer, inbox, write_timeout) => {}
        _ = read_lines(reader, outbox, node) => {}
    }
}

/// Writes queued messages as JSON lines until the queue closes, a write
/// fails, or a write stays blocked past `timeout`.
async fn write_lines<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut inbox: mpsc::UnboundedReceiver<Message>,
    timeout: Duration,
) {
    while let Some(msg) = inbox.recv().await {
        let mut line = match serde_json::to_string(&msg) {
            Ok(line) => line,
            Err(err) => {
                warn!("Failed to serialize {msg:?}: {err}");
                continue;
            }
        };
        line.push('\n');
        match tokio::time::timeout(timeout, writer.write_all(line.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!("Connection write failed: {err}");
                return;
            }
            Err(_) => {
                debug!("Connection write blocked for {timeout:?}, dropping link");
                return;
            }
        }
    }
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R, outbox: Outbox, node: Weak<Node>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                debug!("Connection read failed: {err}");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let msg: Message = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("Ignoring malformed message {line:?}: {err}");
                continue;
            }
        };
        let Some(node) = node.upgrade() else { return };
        let outbox = outbox.clone();
        tokio::spawn(async move {
            if let Some(reply) = node.handle_msg(msg, &outbox).await {
                let _ = outbox.send(reply);
            }
        });
    }
}
