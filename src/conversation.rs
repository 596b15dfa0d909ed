//! Per-owner conversation state: the active document and a bounded history.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::models::ConversationTurn;

#[derive(Default)]
struct Session {
    document_id: Option<String>,
    history: VecDeque<ConversationTurn>,
}

/// In-process conversation store keyed by owner.
///
/// Holds at most `max_turns` turns per owner (oldest dropped first).
/// Switching to a different document clears the history.
pub struct ConversationStore {
    max_turns: usize,
    sessions: Mutex<HashMap<String, Session>>,
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Makes `document_id` the owner's active document.
    pub fn select_document(&self, owner: &str, document_id: &str) {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(owner.to_string()).or_default();
        if session.document_id.as_deref() != Some(document_id) {
            session.document_id = Some(document_id.to_string());
            session.history.clear();
        }
    }

    pub fn active_document(&self, owner: &str) -> Option<String> {
        self.sessions
            .lock()
            .get(owner)
            .and_then(|s| s.document_id.clone())
    }

    /// Oldest first.
    pub fn history(&self, owner: &str) -> Vec<ConversationTurn> {
        self.sessions
            .lock()
            .get(owner)
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record_exchange(&self, owner: &str, question: &str, answer: &str) {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(owner.to_string()).or_default();
        session.history.push_back(ConversationTurn::user(question));
        session.history.push_back(ConversationTurn::assistant(answer));
        while session.history.len() > self.max_turns {
            session.history.pop_front();
        }
    }

    /// Forgets the owner's document and history.
    pub fn clear(&self, owner: &str) {
        self.sessions.lock().remove(owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn history_is_bounded() {
        let store = ConversationStore::new(4);
        store.select_document("1", "doc");
        for i in 0..5 {
            store.record_exchange("1", &format!("q{i}"), &format!("a{i}"));
        }
        let history = store.history("1");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "q3");
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[3].content, "a4");
    }

    #[test]
    fn switching_documents_clears_history() {
        let store = ConversationStore::new(10);
        store.select_document("1", "a");
        store.record_exchange("1", "q", "a");
        store.select_document("1", "a");
        assert_eq!(store.history("1").len(), 2);
        store.select_document("1", "b");
        assert!(store.history("1").is_empty());
        assert_eq!(store.active_document("1").as_deref(), Some("b"));
    }

    #[test]
    fn owners_are_independent() {
        let store = ConversationStore::new(10);
        store.select_document("1", "a");
        store.record_exchange("1", "q", "a");
        assert!(store.history("2").is_empty());
        assert!(store.active_document("2").is_none());
        store.clear("1");
        assert!(store.active_document("1").is_none());
    }
}
