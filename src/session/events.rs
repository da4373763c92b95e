use serde::{Deserialize, Serialize};

use super::{Player, PlayerId, QuestionView, SessionCode};

/// Notification pushed to clients subscribed to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub code: SessionCode,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "event")]
pub enum EventKind {
    PlayerJoined {
        player: Player,
        players: Vec<Player>,
    },
    GameStarted {
        question: QuestionView,
    },
    NextQuestion {
        question: QuestionView,
    },
    ScoreUpdate {
        player_id: PlayerId,
        correct: bool,
        score: u32,
        scores: Vec<Player>,
    },
    GameOver {
        scores: Vec<Player>,
    },
    GameClosed,
}

impl SessionEvent {
    pub fn new(code: &str, kind: EventKind) -> Self {
        Self {
            code: code.to_owned(),
            kind,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, EventKind::GameClosed)
    }
}
