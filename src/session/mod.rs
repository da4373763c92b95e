//! Trivia sessions as a deterministic state machine over committed commands.

pub mod command;
pub mod events;
pub mod questions;
pub mod store;

pub use command::{normalize_code, Command, CommandOutcome};
pub use events::{EventKind, SessionEvent};
pub use questions::{QuestionBank, QuestionView};
pub use store::{Player, ReplicatedStore, SessionStatus, SessionStore};

pub type SessionCode = String;
pub type PlayerId = u64;

/// Points awarded for a correct answer.
pub const CORRECT_ANSWER_AWARD: u32 = 10;
