//! Session manager (C6): binds one transport-layer session id to one
//! authenticated agent for the lifetime of an MCP connection.
//!
//! Rocket handles each `POST`/`DELETE /mcp` as a single self-contained
//! request, so the Node-SDK race the spec describes — a transport's
//! `onclose` firing before the handler finishes registering it — cannot
//! occur on that path: the session is inserted synchronously before the
//! handler returns. The long-lived `GET /mcp` stream is the one place a
//! connection outlives its handler; its teardown uses an RAII guard in
//! the teacher's `PresenceGuard` idiom (src/routes/mod.rs) so an early
//! disconnect can never leave a dangling reverse-index entry.

use crate::visibility::Visibility;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub agent_id: String,
    pub agent_name: String,
    pub clearance_level: Visibility,
}

#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    agent_sessions: Mutex<HashMap<String, HashSet<String>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, entry: SessionEntry) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), entry.clone());
        self.agent_sessions
            .lock()
            .unwrap()
            .entry(entry.agent_id)
            .or_default()
            .insert(session_id.clone());
        session_id
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Removes a session from both maps atomically; trims an emptied
    /// reverse-index entry (§4.6 "Removal is atomic across... via a single
    /// helper").
    pub fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.remove(session_id) {
            let mut agent_sessions = self.agent_sessions.lock().unwrap();
            if let Some(set) = agent_sessions.get_mut(&entry.agent_id) {
                set.remove(session_id);
                if set.is_empty() {
                    agent_sessions.remove(&entry.agent_id);
                }
            }
        }
    }

    pub fn sessions_for_agent(&self, agent_id: &str) -> Vec<String> {
        self.agent_sessions
            .lock()
            .unwrap()
            .get(agent_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

/// RAII guard dropped when a `GET /mcp` stream ends (client disconnect,
/// server shutdown); removes the session it created. Mirrors the
/// `registered`-flag precaution from §4.6/§9: the guard only ever removes
/// the session it itself registered, so an early close can't race a
/// not-yet-completed registration.
pub struct SessionGuard<'a> {
    pub manager: &'a SessionManager,
    pub session_id: String,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.manager.remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> SessionEntry {
        SessionEntry {
            agent_id: "a1".into(),
            agent_name: "code".into(),
            clearance_level: Visibility::Team,
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let mgr = SessionManager::new();
        let sid = mgr.create(entry());
        let got = mgr.get(&sid).unwrap();
        assert_eq!(got.agent_id, "a1");
    }

    #[test]
    fn remove_trims_empty_reverse_index_entry() {
        let mgr = SessionManager::new();
        let sid = mgr.create(entry());
        assert_eq!(mgr.sessions_for_agent("a1"), vec![sid.clone()]);
        mgr.remove(&sid);
        assert!(mgr.get(&sid).is_none());
        assert!(mgr.sessions_for_agent("a1").is_empty());
    }

    #[test]
    fn one_agent_can_hold_multiple_sessions() {
        let mgr = SessionManager::new();
        let s1 = mgr.create(entry());
        let s2 = mgr.create(entry());
        let mut sessions = mgr.sessions_for_agent("a1");
        sessions.sort();
        let mut expected = vec![s1, s2];
        expected.sort();
        assert_eq!(sessions, expected);
    }
}
