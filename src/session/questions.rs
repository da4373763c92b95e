use std::{fs, path::Path};

use log::info;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
}

/// Client-facing projection of a question; never carries the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: u32,
    pub text: String,
    pub options: Vec<String>,
    pub number: usize,
    pub total: usize,
}

/// Ordered, read-only question list shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

static BUILTIN_QUESTIONS: Lazy<Vec<Question>> = Lazy::new(|| {
    [
        ("What is the capital of Australia?", ["Sydney", "Canberra", "Melbourne", "Perth"], 1),
        ("How many bits are in a byte?", ["4", "8", "16", "32"], 1),
        ("Which planet is closest to the sun?", ["Venus", "Earth", "Mercury", "Mars"], 2),
        ("What is the chemical symbol for gold?", ["Au", "Ag", "Gd", "Go"], 0),
        ("Who wrote 'Pride and Prejudice'?", ["Emily Bronte", "Mary Shelley", "George Eliot", "Jane Austen"], 3),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (text, options, correct_index))| Question {
        id: i as u32 + 1,
        text: text.to_owned(),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct_index,
    })
    .collect()
});

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Result<Self, NodeError> {
        for question in &questions {
            if question.correct_index >= question.options.len() {
                return Err(NodeError::Config(format!(
                    "question {} has correct_index {} but only {} options",
                    question.id,
                    question.correct_index,
                    question.options.len()
                )));
            }
        }
        Ok(Self { questions })
    }

    pub fn builtin() -> Self {
        Self {
            questions: BUILTIN_QUESTIONS.clone(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let raw = fs::read_to_string(path)?;
        let questions: Vec<Question> = serde_json::from_str(&raw)?;
        info!("Loaded {} questions from {}", questions.len(), path.display());
        Self::new(questions)
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn view(&self, index: usize) -> Option<QuestionView> {
        self.get(index).map(|q| QuestionView {
            id: q.id,
            text: q.text.clone(),
            options: q.options.clone(),
            number: index + 1,
            total: self.len(),
        })
    }
}
