use serde::{Deserialize, Serialize};

use super::{Player, PlayerId, QuestionView, SessionCode};

/// A session mutation as stored in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "command")]
pub enum Command {
    CreateSession {
        code: SessionCode,
    },
    JoinSession {
        code: SessionCode,
        nickname: String,
    },
    StartSession {
        code: SessionCode,
        player_id: PlayerId,
    },
    AdvanceQuestion {
        code: SessionCode,
        player_id: PlayerId,
    },
    SubmitAnswer {
        code: SessionCode,
        player_id: PlayerId,
        answer_index: usize,
    },
    EndSession {
        code: SessionCode,
        player_id: PlayerId,
    },
}

/// What applying a command produced, as seen by the client that issued it.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Created {
        code: SessionCode,
    },
    Joined {
        player_id: PlayerId,
        players: Vec<Player>,
        is_host: bool,
    },
    Started {
        question: QuestionView,
    },
    NextQuestion {
        question: QuestionView,
    },
    GameOver {
        scores: Vec<Player>,
    },
    Answered {
        correct: bool,
        score: u32,
    },
    Ended,
}

/// Session codes are compared case-insensitively.
pub fn normalize_code(code: &str) -> SessionCode {
    code.trim().to_uppercase()
}
