//! Bounded per-session conversation memory.

use std::collections::VecDeque;

use crate::context::Citation;

/// One completed question/answer exchange.
#[derive(Debug, Clone)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// FIFO-bounded history owned by a single session. Not shared across
/// sessions; the engine keeps one per session id.
#[derive(Debug)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    bound: usize,
}

impl ConversationHistory {
    #[must_use]
    pub fn new(bound: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(bound),
            bound,
        }
    }

    /// Append a turn, evicting the oldest when the bound is exceeded.
    pub fn append(&mut self, turn: Turn) {
        if self.turns.len() == self.bound {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// The last `n` turns in chronological order.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<&Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).collect()
    }

    /// Questions from the last `n` turns, for retrieval disambiguation.
    #[must_use]
    pub fn recent_questions(&self, n: usize) -> Vec<String> {
        self.recent(n)
            .into_iter()
            .map(|t| t.question.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(q: &str) -> Turn {
        Turn {
            question: q.into(),
            answer: format!("answer to {q}"),
            citations: Vec::new(),
        }
    }

    #[test]
    fn append_within_bound_keeps_all() {
        let mut history = ConversationHistory::new(5);
        for i in 0..3 {
            history.append(turn(&format!("q{i}")));
        }
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn oldest_evicted_first_past_bound() {
        let mut history = ConversationHistory::new(5);
        for i in 0..6 {
            history.append(turn(&format!("q{i}")));
        }
        let recent = history.recent(10);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].question, "q1");
        assert_eq!(recent[4].question, "q5");
    }

    #[test]
    fn recent_returns_chronological_tail() {
        let mut history = ConversationHistory::new(5);
        for i in 0..4 {
            history.append(turn(&format!("q{i}")));
        }
        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question, "q2");
        assert_eq!(recent[1].question, "q3");
    }

    #[test]
    fn recent_questions_extracts_text() {
        let mut history = ConversationHistory::new(3);
        history.append(turn("How do subscriptions work?"));
        let questions = history.recent_questions(3);
        assert_eq!(questions, vec!["How do subscriptions work?".to_owned()]);
    }

    #[test]
    fn empty_history() {
        let history = ConversationHistory::new(5);
        assert!(history.is_empty());
        assert!(history.recent(3).is_empty());
    }
}
