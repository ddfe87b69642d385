//! In-memory conversation sessions keyed by a caller-chosen id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kt_llm::ChatMessage;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            history: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub messages: usize,
}

#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<String, Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prior turns for `id`; empty for an unknown session.
    pub fn history(&self, id: &str) -> Vec<ChatMessage> {
        self.sessions
            .get(id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Appends one user turn and its reply, creating the session on first use.
    pub fn record_exchange(&self, id: &str, user: &str, reply: &str) {
        let mut session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id));
        session.history.push(ChatMessage::user(user));
        if !reply.is_empty() {
            session.history.push(ChatMessage::assistant(reply));
        }
        session.last_active = Utc::now();
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Most recently active first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| {
                let s = entry.value();
                SessionSummary {
                    id: s.id.clone(),
                    created_at: s.created_at,
                    last_active: s.last_active,
                    messages: s.history.len(),
                }
            })
            .collect();
        out.sort_by_key(|s| std::cmp::Reverse(s.last_active));
        out
    }

    pub fn reset(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }
}
