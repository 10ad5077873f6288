use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ten turns, i.e. five question/answer pairs.
pub const DEFAULT_HISTORY_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Bounded FIFO of human/assistant turns. Oldest turns are evicted first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity + 2),
            capacity,
        }
    }

    pub fn record_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push_back(ConversationTurn::human(question));
        self.turns.push_back(ConversationTurn::assistant(answer));
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Turns oldest-first.
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TURNS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixth_question_evicts_the_oldest_pair() {
        let mut history = ConversationHistory::default();
        for i in 1..=6 {
            history.record_exchange(format!("q{i}"), format!("SELECT {i}"));
        }
        assert_eq!(history.len(), 10);
        let turns: Vec<&ConversationTurn> = history.turns().collect();
        assert_eq!(turns[0], &ConversationTurn::human("q2"));
        assert_eq!(turns[1], &ConversationTurn::assistant("SELECT 2"));
        assert_eq!(turns[9], &ConversationTurn::assistant("SELECT 6"));
    }

    #[test]
    fn clear_empties_history() {
        let mut history = ConversationHistory::new(4);
        history.record_exchange("q", "a");
        assert_eq!(history.len(), 2);
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 4);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ConversationTurn::human("hi")).unwrap();
        assert_eq!(json, r#"{"role":"human","text":"hi"}"#);
    }
}
