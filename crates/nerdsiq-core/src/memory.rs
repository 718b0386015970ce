//! Per-session conversation memory.
//!
//! Each session keeps the last `window` question/answer exchanges in
//! chronological order; older exchanges fall off the front. Sessions are
//! created lazily on first access and live until cleared or until the
//! process exits. The number of sessions is bounded: creating a session in
//! a full store evicts the least recently touched one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::models::Exchange;

/// Default number of exchanges remembered per session.
pub const DEFAULT_MEMORY_WINDOW: usize = 5;

/// Rendered in place of the history when a session has no exchanges.
pub const NO_HISTORY: &str = "No previous conversation.";

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current exchanges for a session, oldest first. Unknown ids yield an
    /// empty list (and start a new session).
    async fn get_or_create(&self, session_id: &str) -> Vec<Exchange>;

    /// Append one exchange, dropping the oldest ones beyond the window.
    async fn append(&self, session_id: &str, question: &str, answer: &str);

    /// Forget a session. Unknown ids are ignored.
    async fn clear(&self, session_id: &str);

    fn session_count(&self) -> usize;
}

/// Render exchanges for the system prompt.
///
/// Each exchange becomes a `User:` line followed by an `Assistant:` line,
/// oldest first. An empty history renders as [`NO_HISTORY`].
pub fn format_history(exchanges: &[Exchange]) -> String {
    if exchanges.is_empty() {
        return NO_HISTORY.to_string();
    }

    exchanges
        .iter()
        .flat_map(|e| {
            [
                format!("User: {}", e.question),
                format!("Assistant: {}", e.answer),
            ]
        })
        .collect::<Vec<_>>()
        .join("\n")
}

struct Session {
    exchanges: VecDeque<Exchange>,
    last_touched: u64,
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<String, Session>,
    tick: u64,
}

impl Sessions {
    fn touch(&mut self, session_id: &str, max_sessions: usize) -> &mut Session {
        self.tick += 1;
        let tick = self.tick;

        if !self.by_id.contains_key(session_id) && self.by_id.len() >= max_sessions {
            let stale = self
                .by_id
                .iter()
                .min_by_key(|(_, s)| s.last_touched)
                .map(|(id, _)| id.clone());
            if let Some(id) = stale {
                self.by_id.remove(&id);
            }
        }

        let session = self
            .by_id
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                exchanges: VecDeque::new(),
                last_touched: tick,
            });
        session.last_touched = tick;
        session
    }
}

/// Process-local [`SessionStore`].
pub struct InMemorySessionStore {
    window: usize,
    max_sessions: usize,
    sessions: Mutex<Sessions>,
}

impl InMemorySessionStore {
    pub fn new(window: usize, max_sessions: usize) -> Self {
        Self {
            window: window.max(1),
            max_sessions: max_sessions.max(1),
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_WINDOW, 10_000)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, session_id: &str) -> Vec<Exchange> {
        let mut sessions = self.lock();
        let session = sessions.touch(session_id, self.max_sessions);
        session.exchanges.iter().cloned().collect()
    }

    async fn append(&self, session_id: &str, question: &str, answer: &str) {
        let mut sessions = self.lock();
        let session = sessions.touch(session_id, self.max_sessions);
        session.exchanges.push_back(Exchange::new(question, answer));
        while session.exchanges.len() > self.window {
            session.exchanges.pop_front();
        }
    }

    async fn clear(&self, session_id: &str) {
        self.lock().by_id.remove(session_id);
    }

    fn session_count(&self) -> usize {
        self.lock().by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let store = InMemorySessionStore::default();
        assert!(store.get_or_create("nobody").await.is_empty());
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_window_keeps_last_exchanges_in_order() {
        let store = InMemorySessionStore::new(5, 10);
        for i in 1..=7 {
            store
                .append("s1", &format!("q{}", i), &format!("a{}", i))
                .await;
        }
        let memory = store.get_or_create("s1").await;
        assert_eq!(memory.len(), 5);
        let questions: Vec<&str> = memory.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["q3", "q4", "q5", "q6", "q7"]);
        assert_eq!(memory[4].answer, "a7");
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemorySessionStore::default();
        store.append("a", "qa", "aa").await;
        store.append("b", "qb", "ab").await;
        assert_eq!(store.get_or_create("a").await, vec![Exchange::new("qa", "aa")]);
        assert_eq!(store.get_or_create("b").await, vec![Exchange::new("qb", "ab")]);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemorySessionStore::default();
        store.append("s1", "q", "a").await;
        store.clear("s1").await;
        store.clear("never-existed").await;
        assert!(store.get_or_create("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_session_bound_evicts_least_recently_touched() {
        let store = InMemorySessionStore::new(5, 2);
        store.append("a", "q", "a").await;
        store.append("b", "q", "a").await;
        store.get_or_create("a").await;
        store.append("c", "q", "a").await;

        assert_eq!(store.session_count(), 2);
        assert_eq!(store.get_or_create("a").await.len(), 1);
        assert_eq!(store.get_or_create("c").await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_respect_window() {
        let store = std::sync::Arc::new(InMemorySessionStore::new(5, 10));
        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append("shared", &format!("q{}", i), &format!("a{}", i))
                        .await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let memory = store.get_or_create("shared").await;
        assert_eq!(memory.len(), 5);
        // Every surviving exchange is intact: question and answer share an index.
        for exchange in &memory {
            assert_eq!(exchange.question[1..], exchange.answer[1..]);
        }
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_format_history() {
        assert_eq!(format_history(&[]), "No previous conversation.");

        let exchanges = vec![
            Exchange::new("Where is the manual?", "In the shared drive."),
            Exchange::new("Thanks", "You're welcome."),
        ];
        assert_eq!(
            format_history(&exchanges),
            "User: Where is the manual?\nAssistant: In the shared drive.\nUser: Thanks\nAssistant: You're welcome."
        );
    }
}
