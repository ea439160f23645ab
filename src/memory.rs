//! Bounded per-session conversation history.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::models::{ConversationTurn, Role};

/// FIFO log of the last `cap` turns.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    cap: usize,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationMemory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            turns: VecDeque::with_capacity(cap.min(64)),
        }
    }

    pub fn append(&mut self, role: Role, text: impl Into<String>) {
        if self.cap == 0 {
            return;
        }
        while self.turns.len() >= self.cap {
            self.turns.pop_front();
        }
        self.turns.push_back(ConversationTurn {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

struct Session {
    memory: Arc<Mutex<ConversationMemory>>,
    last_active: Instant,
}

/// Session id → memory, with idle expiry applied on access.
pub struct SessionStore {
    cap: usize,
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(cap: usize, ttl: Duration) -> Self {
        Self {
            cap,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The memory for `session_id`, created on first use.
    pub fn session(&self, session_id: &str) -> Arc<Mutex<ConversationMemory>> {
        self.session_at(session_id, Instant::now())
    }

    pub fn session_at(&self, session_id: &str, now: Instant) -> Arc<Mutex<ConversationMemory>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        self.expire(&mut sessions, now);
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                memory: Arc::new(Mutex::new(ConversationMemory::new(self.cap))),
                last_active: now,
            });
        session.last_active = now;
        session.memory.clone()
    }

    /// Record one question/answer exchange as a single step.
    pub fn record_exchange(&self, session_id: &str, question: &str, answer: &str) {
        let memory = self.session(session_id);
        let mut memory = memory.lock().unwrap_or_else(PoisonError::into_inner);
        memory.append(Role::User, question);
        memory.append(Role::Assistant, answer);
    }

    pub fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        let memory = self.session(session_id);
        let memory = memory.lock().unwrap_or_else(PoisonError::into_inner);
        memory.history()
    }

    pub fn len(&self, session_id: &str) -> usize {
        let memory = self.session(session_id);
        let memory = memory.lock().unwrap_or_else(PoisonError::into_inner);
        memory.len()
    }

    pub fn clear(&self, session_id: &str) -> bool {
        let memory = self.session(session_id);
        memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        true
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn expire(&self, sessions: &mut HashMap<String, Session>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_duration_since(s.last_active) < self.ttl);
        if sessions.len() < before {
            debug!(expired = before - sessions.len(), "dropped idle sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_eviction_keeps_last_n() {
        let mut memory = ConversationMemory::new(20);
        for i in 0..25 {
            memory.append(Role::User, format!("turn {}", i));
        }
        let history = memory.history();
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].text, "turn 5");
        assert_eq!(history[19].text, "turn 24");
    }

    #[test]
    fn test_clear_empties_memory() {
        let mut memory = ConversationMemory::new(4);
        memory.append(Role::User, "hi");
        memory.append(Role::Assistant, "hello");
        memory.clear();
        assert!(memory.is_empty());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::new(20, Duration::from_secs(3600));
        store.record_exchange("a", "q1", "a1");
        store.record_exchange("b", "q2", "a2");
        store.record_exchange("a", "q3", "a3");

        let a = store.history("a");
        assert_eq!(a.len(), 4);
        assert_eq!(a[0].role, Role::User);
        assert_eq!(a[1].role, Role::Assistant);
        assert_eq!(a[3].text, "a3");
        assert_eq!(store.len("b"), 2);

        assert!(store.clear("a"));
        assert_eq!(store.len("a"), 0);
        assert_eq!(store.len("b"), 2);
    }

    #[test]
    fn test_concurrent_exchanges_stay_paired() {
        let store = Arc::new(SessionStore::new(1000, Duration::from_secs(3600)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for n in 0..25 {
                        let question = format!("q{}-{}", t, n);
                        let answer = format!("a{}-{}", t, n);
                        store.record_exchange("shared", &question, &answer);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = store.history("shared");
        assert_eq!(history.len(), 400);
        let mut next = [0usize; 8];
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            let id = pair[0].text.trim_start_matches('q');
            assert_eq!(pair[1].text, format!("a{}", id));

            // Each caller's exchanges land in the order they completed
            let (t, n) = id.split_once('-').unwrap();
            let t: usize = t.parse().unwrap();
            assert_eq!(n.parse::<usize>().unwrap(), next[t]);
            next[t] += 1;
        }
    }

    #[test]
    fn test_idle_sessions_expire() {
        let store = SessionStore::new(20, Duration::from_secs(60));
        let t0 = Instant::now();
        {
            let memory = store.session_at("old", t0);
            memory.lock().unwrap().append(Role::User, "hello");
        }
        store.session_at("fresh", t0 + Duration::from_secs(30));
        assert_eq!(store.active_sessions(), 2);

        store.session_at("fresh", t0 + Duration::from_secs(61));
        assert_eq!(store.active_sessions(), 1);

        let reborn = store.session_at("old", t0 + Duration::from_secs(62));
        assert!(reborn.lock().unwrap().is_empty());
    }
}
