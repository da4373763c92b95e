use std::io;

use thiserror::Error;

use crate::protocol::{ErrorCode, ErrorData, NodeId};
use crate::raft::api::Term;
use crate::session::{PlayerId, SessionCode, SessionStatus};

/// A command that cannot be applied to the current session state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("session {0} does not exist")]
    UnknownSession(SessionCode),
    #[error("session {0} already exists")]
    SessionExists(SessionCode),
    #[error("player {player_id} is not the host")]
    NotHost { player_id: PlayerId },
    #[error("session is {actual}, expected {expected}")]
    WrongStatus {
        expected: SessionStatus,
        actual: SessionStatus,
    },
    #[error("nickname must be 1 to 32 characters")]
    InvalidNickname,
    #[error("nickname {0} is already taken")]
    NicknameTaken(String),
    #[error("player {0} is not in this session")]
    UnknownPlayer(PlayerId),
    #[error("player {0} already answered this question")]
    AlreadyAnswered(PlayerId),
    #[error("answer {index} is out of range, question has {options} options")]
    AnswerOutOfRange { index: usize, options: usize },
    #[error("question bank is empty")]
    NoQuestions,
    #[error("no question is active")]
    NoActiveQuestion,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not the leader")]
    NotLeader { leader: Option<NodeId> },
    #[error("no quorum of nodes is reachable")]
    QuorumUnavailable,
    #[error("no reply from {0}")]
    Timeout(NodeId),
    #[error("stale term {received}, current term is {current}")]
    StaleTerm { received: Term, current: Term },
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::Validation(ValidationError::UnknownSession(_)) => ErrorCode::UnknownSession,
            NodeError::Validation(_) => ErrorCode::ValidationFailed,
            NodeError::NotLeader { .. } => ErrorCode::NotLeader,
            NodeError::QuorumUnavailable => ErrorCode::QuorumUnavailable,
            NodeError::Timeout(_) => ErrorCode::Timeout,
            NodeError::StaleTerm { .. } => ErrorCode::StaleTerm,
            NodeError::MalformedRequest(_) | NodeError::Json(_) => ErrorCode::MalformedRequest,
            NodeError::Config(_) | NodeError::Io(_) => ErrorCode::Crash,
        }
    }
}

impl From<NodeError> for ErrorData {
    fn from(err: NodeError) -> Self {
        let mut data = ErrorData::new(err.to_string(), err.code());
        if let NodeError::NotLeader { leader } = err {
            data.leader = leader;
        }
        data
    }
}
