use serde::{self, Deserialize, Serialize};

use super::ErrorData;
use crate::raft::api::{RoleKind, Rpc};
use crate::session::{
    Command, Player, PlayerId, QuestionView, SessionCode, SessionEvent, SessionStatus,
};

pub type Message = super::Message<BodyData>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum BodyData {
    // Client mutations, routed to the leader.
    Create,
    CreateOk(CreateOkData),
    Join(JoinData),
    JoinOk(JoinOkData),
    Start(HostActionData),
    StartOk(QuestionData),
    Next(HostActionData),
    NextOk(NextOkData),
    Answer(AnswerData),
    AnswerOk(AnswerOkData),
    End(HostActionData),
    EndOk,
    // Client reads and pushes, served by the local node.
    Status(StatusData),
    StatusOk(StatusOkData),
    Subscribe(StatusData),
    SubscribeOk,
    Event(SessionEvent),
    Error(ErrorData),
    // Inter-node traffic.
    Raft(Rpc<Command>),
    Heartbeat,
    HeartbeatOk(HeartbeatOkData),
    Forwarded(ForwardedData),
}

impl BodyData {
    /// Requests that change session state and therefore go through the log.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            BodyData::Create
                | BodyData::Join(_)
                | BodyData::Start(_)
                | BodyData::Next(_)
                | BodyData::Answer(_)
                | BodyData::End(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOkData {
    pub code: SessionCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinData {
    pub code: SessionCode,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOkData {
    pub players: Vec<Player>,
    pub new_player_id: PlayerId,
    pub is_host: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostActionData {
    pub code: SessionCode,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionData {
    pub question: QuestionView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextOkData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionView>,
    pub game_over: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scores: Vec<Player>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerData {
    pub code: SessionCode,
    pub player_id: PlayerId,
    pub answer_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOkData {
    pub correct: bool,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub code: SessionCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusOkData {
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question: Option<QuestionView>,
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatOkData {
    pub alive: bool,
    pub role: RoleKind,
}

/// A client request relayed verbatim by a follower to the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardedData {
    pub request: Box<BodyData>,
}
