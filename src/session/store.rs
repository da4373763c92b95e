use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
    sync::Arc,
};

use log::warn;
use serde::{Deserialize, Serialize};

use super::{
    Command, CommandOutcome, EventKind, PlayerId, QuestionBank, QuestionView, SessionCode,
    SessionEvent, CORRECT_ANSWER_AWARD,
};
use crate::error::ValidationError;
use crate::raft::api::LogIndex;

const MAX_NICKNAME_LEN: usize = 32;
/// Ended codes remembered for `status`; the oldest is forgotten first.
const MAX_CLOSED_SESSIONS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Lobby,
    Playing,
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Lobby => "lobby",
            SessionStatus::Playing => "playing",
            SessionStatus::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub code: SessionCode,
    /// Join order.
    pub players: Vec<Player>,
    pub host_player_id: Option<PlayerId>,
    pub status: SessionStatus,
    /// -1 until the game starts.
    pub current_question_index: i64,
    answered: BTreeSet<PlayerId>,
}

impl Session {
    fn new(code: &str) -> Self {
        Self {
            code: code.to_owned(),
            players: Vec::new(),
            host_player_id: None,
            status: SessionStatus::Lobby,
            current_question_index: -1,
            answered: BTreeSet::new(),
        }
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn has_answered(&self, player_id: PlayerId) -> bool {
        self.answered.contains(&player_id)
    }

    fn current_index(&self) -> Option<usize> {
        usize::try_from(self.current_question_index).ok()
    }

    /// Players ordered by score, ties broken by join order.
    pub fn leaderboard(&self) -> Vec<Player> {
        let mut players = self.players.clone();
        players.sort_by(|a, b| b.score.cmp(&a.score));
        players
    }

    fn expect_host(&self, player_id: PlayerId) -> Result<(), ValidationError> {
        if self.host_player_id == Some(player_id) {
            Ok(())
        } else {
            Err(ValidationError::NotHost { player_id })
        }
    }

    fn expect_status(&self, expected: SessionStatus) -> Result<(), ValidationError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(ValidationError::WrongStatus {
                expected,
                actual: self.status,
            })
        }
    }

    fn has_nickname(&self, nickname: &str) -> bool {
        self.players
            .iter()
            .any(|p| p.name.to_lowercase() == nickname.to_lowercase())
    }
}

/// Client-visible state of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub current_question: Option<QuestionView>,
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub outcome: Result<CommandOutcome, ValidationError>,
    pub events: Vec<SessionEvent>,
}

impl Applied {
    fn rejected(err: ValidationError) -> Self {
        Self {
            outcome: Err(err),
            events: Vec::new(),
        }
    }
}

/// All sessions hosted by the cluster. Mutated only by `apply`, which every
/// node runs over the same committed commands in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStore {
    sessions: BTreeMap<SessionCode, Session>,
    closed: VecDeque<SessionCode>,
    next_player_id: PlayerId,
    questions: Arc<QuestionBank>,
}

impl SessionStore {
    pub fn new(questions: Arc<QuestionBank>) -> Self {
        Self {
            sessions: BTreeMap::new(),
            closed: VecDeque::new(),
            next_player_id: 1,
            questions,
        }
    }

    #[cfg(test)]
    pub fn get(&self, code: &str) -> Option<&Session> {
        self.sessions.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.sessions.contains_key(code)
    }

    pub fn snapshot(&self, code: &str) -> Result<SessionSnapshot, ValidationError> {
        match self.sessions.get(code) {
            Some(session) => Ok(SessionSnapshot {
                status: session.status,
                current_question: match session.status {
                    SessionStatus::Playing => session
                        .current_index()
                        .and_then(|index| self.questions.view(index)),
                    _ => None,
                },
                players: session.players.clone(),
            }),
            None if self.closed.iter().any(|closed| closed == code) => Ok(SessionSnapshot {
                status: SessionStatus::Ended,
                current_question: None,
                players: Vec::new(),
            }),
            None => Err(ValidationError::UnknownSession(code.to_owned())),
        }
    }

    /// Checks the command's preconditions against the current state without
    /// changing anything.
    pub fn validate(&self, command: &Command) -> Result<(), ValidationError> {
        match command {
            Command::CreateSession { code } => {
                if self.sessions.contains_key(code) {
                    return Err(ValidationError::SessionExists(code.clone()));
                }
            }
            Command::JoinSession { code, nickname } => {
                let nickname = valid_nickname(nickname)?;
                if let Some(session) = self.sessions.get(code) {
                    session.expect_status(SessionStatus::Lobby)?;
                    if session.has_nickname(nickname) {
                        return Err(ValidationError::NicknameTaken(nickname.to_owned()));
                    }
                }
            }
            Command::StartSession { code, player_id } => {
                let session = self.session(code)?;
                session.expect_host(*player_id)?;
                session.expect_status(SessionStatus::Lobby)?;
                if self.questions.is_empty() {
                    return Err(ValidationError::NoQuestions);
                }
            }
            Command::AdvanceQuestion { code, player_id } => {
                let session = self.session(code)?;
                session.expect_host(*player_id)?;
                session.expect_status(SessionStatus::Playing)?;
            }
            Command::SubmitAnswer {
                code,
                player_id,
                answer_index,
            } => {
                let session = self.session(code)?;
                session.expect_status(SessionStatus::Playing)?;
                if session.player(*player_id).is_none() {
                    return Err(ValidationError::UnknownPlayer(*player_id));
                }
                let question = session
                    .current_index()
                    .and_then(|index| self.questions.get(index))
                    .ok_or(ValidationError::NoActiveQuestion)?;
                if *answer_index >= question.options.len() {
                    return Err(ValidationError::AnswerOutOfRange {
                        index: *answer_index,
                        options: question.options.len(),
                    });
                }
                if session.has_answered(*player_id) {
                    return Err(ValidationError::AlreadyAnswered(*player_id));
                }
            }
            Command::EndSession { code, player_id } => {
                self.session(code)?.expect_host(*player_id)?;
            }
        }
        Ok(())
    }

    /// Applies a committed command. A command whose preconditions no longer
    /// hold is rejected without touching state, identically on every node.
    pub fn apply(&mut self, command: &Command) -> Applied {
        if let Err(err) = self.validate(command) {
            return Applied::rejected(err);
        }
        match self.execute(command) {
            Ok((outcome, events)) => Applied {
                outcome: Ok(outcome),
                events,
            },
            Err(err) => {
                warn!("Validated command {command:?} failed to apply: {err}");
                Applied::rejected(err)
            }
        }
    }

    fn execute(&mut self, command: &Command) -> Result<(CommandOutcome, Vec<SessionEvent>), ValidationError> {
        match command {
            Command::CreateSession { code } => {
                self.forget_closed(code);
                self.sessions.insert(code.clone(), Session::new(code));
                Ok((CommandOutcome::Created { code: code.clone() }, Vec::new()))
            }
            Command::JoinSession { code, nickname } => {
                let player = Player {
                    id: self.next_player_id,
                    name: nickname.trim().to_owned(),
                    score: 0,
                };
                self.next_player_id += 1;
                self.forget_closed(code);
                let session = self
                    .sessions
                    .entry(code.clone())
                    .or_insert_with(|| Session::new(code));
                session.players.push(player.clone());
                let is_host = *session.host_player_id.get_or_insert(player.id) == player.id;
                let players = session.players.clone();
                let event = SessionEvent::new(
                    code,
                    EventKind::PlayerJoined {
                        player: player.clone(),
                        players: players.clone(),
                    },
                );
                let outcome = CommandOutcome::Joined {
                    player_id: player.id,
                    players,
                    is_host,
                };
                Ok((outcome, vec![event]))
            }
            Command::StartSession { code, .. } => {
                let question = self.questions.view(0).ok_or(ValidationError::NoQuestions)?;
                let session = self.session_mut(code)?;
                session.status = SessionStatus::Playing;
                session.current_question_index = 0;
                session.answered.clear();
                let event = SessionEvent::new(
                    code,
                    EventKind::GameStarted {
                        question: question.clone(),
                    },
                );
                Ok((CommandOutcome::Started { question }, vec![event]))
            }
            Command::AdvanceQuestion { code, .. } => {
                let questions = self.questions.clone();
                let session = self.session_mut(code)?;
                let next_index = session.current_index().map_or(0, |index| index + 1);
                match questions.view(next_index) {
                    Some(question) => {
                        session.current_question_index = next_index as i64;
                        session.answered.clear();
                        let event = SessionEvent::new(
                            code,
                            EventKind::NextQuestion {
                                question: question.clone(),
                            },
                        );
                        Ok((CommandOutcome::NextQuestion { question }, vec![event]))
                    }
                    None => {
                        session.current_question_index = questions.len() as i64;
                        session.answered.clear();
                        let scores = session.leaderboard();
                        let event = SessionEvent::new(
                            code,
                            EventKind::GameOver {
                                scores: scores.clone(),
                            },
                        );
                        Ok((CommandOutcome::GameOver { scores }, vec![event]))
                    }
                }
            }
            Command::SubmitAnswer {
                code,
                player_id,
                answer_index,
            } => {
                let questions = self.questions.clone();
                let session = self.session_mut(code)?;
                let question = session
                    .current_index()
                    .and_then(|index| questions.get(index))
                    .ok_or(ValidationError::NoActiveQuestion)?;
                let correct = *answer_index == question.correct_index;
                let player = session
                    .players
                    .iter_mut()
                    .find(|p| p.id == *player_id)
                    .ok_or(ValidationError::UnknownPlayer(*player_id))?;
                if correct {
                    player.score += CORRECT_ANSWER_AWARD;
                }
                let score = player.score;
                session.answered.insert(*player_id);
                let event = SessionEvent::new(
                    code,
                    EventKind::ScoreUpdate {
                        player_id: *player_id,
                        correct,
                        score,
                        scores: session.leaderboard(),
                    },
                );
                Ok((CommandOutcome::Answered { correct, score }, vec![event]))
            }
            Command::EndSession { code, .. } => {
                self.sessions
                    .remove(code)
                    .ok_or_else(|| ValidationError::UnknownSession(code.clone()))?;
                self.remember_closed(code);
                let event = SessionEvent::new(code, EventKind::GameClosed);
                Ok((CommandOutcome::Ended, vec![event]))
            }
        }
    }

    fn remember_closed(&mut self, code: &str) {
        self.forget_closed(code);
        self.closed.push_back(code.to_owned());
        if self.closed.len() > MAX_CLOSED_SESSIONS {
            self.closed.pop_front();
        }
    }

    fn forget_closed(&mut self, code: &str) {
        self.closed.retain(|closed| closed != code);
    }

    fn session(&self, code: &str) -> Result<&Session, ValidationError> {
        self.sessions
            .get(code)
            .ok_or_else(|| ValidationError::UnknownSession(code.to_owned()))
    }

    fn session_mut(&mut self, code: &str) -> Result<&mut Session, ValidationError> {
        self.sessions
            .get_mut(code)
            .ok_or_else(|| ValidationError::UnknownSession(code.to_owned()))
    }
}

fn valid_nickname(nickname: &str) -> Result<&str, ValidationError> {
    let nickname = nickname.trim();
    if nickname.is_empty() || nickname.chars().count() > MAX_NICKNAME_LEN {
        Err(ValidationError::InvalidNickname)
    } else {
        Ok(nickname)
    }
}

/// Session store paired with the index of the last log entry applied to it,
/// so a replayed entry is never applied twice.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedStore {
    store: SessionStore,
    last_applied: LogIndex,
}

impl ReplicatedStore {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            last_applied: 0,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[cfg(test)]
    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    /// Returns `None` when `index` was already applied.
    pub fn apply(&mut self, index: LogIndex, command: &Command) -> Option<Applied> {
        if index <= self.last_applied {
            return None;
        }
        if index != self.last_applied + 1 {
            warn!(
                "Applying log index {index} after {}, entries skipped",
                self.last_applied
            );
        }
        self.last_applied = index;
        Some(self.store.apply(command))
    }
}
