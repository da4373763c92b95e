use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

pub mod trivia;

pub type MessageId = u64;
pub type NodeId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message<T> {
    pub src: String,
    pub dest: String,
    pub body: Body<T>,
}

impl<T> Message<T> {
    /// Builds a one-way message with no reply expected.
    pub fn new(src: impl Into<String>, dest: impl Into<String>, data: T) -> Self {
        Message {
            src: src.into(),
            dest: dest.into(),
            body: Body {
                msg_id: None,
                in_reply_to: None,
                data,
            },
        }
    }

    /// Builds a message carrying a fresh id so the reply can be matched.
    pub fn request(src: impl Into<String>, dest: impl Into<String>, data: T) -> Self {
        let mut msg = Self::new(src, dest, data);
        msg.body.msg_id = Some(gen_next_msg_id());
        msg
    }

    pub fn create_response(&self, data: T) -> Message<T> {
        Message {
            src: self.dest.clone(),
            dest: self.src.clone(),
            body: Body {
                data,
                msg_id: Some(gen_next_msg_id()),
                in_reply_to: self.body.msg_id,
            },
        }
    }
}

pub fn gen_next_msg_id() -> MessageId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum ErrorCode {
    Timeout = 0,
    NotSupported = 10,
    MalformedRequest = 12,
    Crash = 13,
    UnknownSession = 20,
    ValidationFailed = 22,
    NotLeader = 40,
    QuorumUnavailable = 41,
    StaleTerm = 42,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: ErrorCode,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<NodeId>,
}

impl ErrorData {
    pub fn new(text: String, code: ErrorCode) -> Self {
        Self {
            code,
            text,
            leader: None,
        }
    }

    /// Whether retrying the same request later may succeed.
    #[cfg(test)]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Timeout | ErrorCode::NotLeader | ErrorCode::QuorumUnavailable
        )
    }
}
