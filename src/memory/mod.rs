//! Conversation memory for a single chat session.

#[cfg(test)]
mod tests;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::debug;

/// One question and the answer that was given to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

impl Turn {
    #[inline]
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            asked_at: Utc::now(),
        }
    }
}

/// Ordered log of turns, oldest first.
///
/// When `max_turns` is non-zero the log keeps only the most recent
/// `max_turns` turns.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl ConversationMemory {
    #[inline]
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    #[inline]
    pub fn append(&mut self, turn: Turn) {
        self.turns.push_back(turn);

        if self.max_turns > 0 {
            while self.turns.len() > self.max_turns {
                if let Some(evicted) = self.turns.pop_front() {
                    debug!("Evicted oldest turn: {}", evicted.question);
                }
            }
        }
    }

    /// Turns in the order they were appended
    #[inline]
    pub fn render(&self) -> Vec<&Turn> {
        self.turns.iter().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
