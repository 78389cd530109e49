//! Session table
//!
//! The only structure shared by every session task. Inserts are atomic per
//! key, so two concurrent starts for one id always land on the same entry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::entry::SessionEntry;
use crate::types::{SessionId, SessionSnapshot, SessionState, SessionStats};

#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing entry for `id`, or a fresh `NotStarted` one
    pub fn get_or_insert(&self, id: &SessionId) -> Arc<SessionEntry> {
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(session_id = %id, "Registered session entry");
                Arc::new(SessionEntry::new(id.clone()))
            })
            .value()
            .clone()
    }

    /// Entry for `id`, skipping entries that are being torn down
    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions
            .get(id)
            .map(|e| e.value().clone())
            .filter(|e| !e.is_removed())
    }

    /// Whether `entry` is still the table's entry for its id
    pub fn is_current(&self, entry: &Arc<SessionEntry>) -> bool {
        self.sessions
            .get(&entry.id)
            .map(|e| Arc::ptr_eq(e.value(), entry))
            .unwrap_or(false)
    }

    /// Remove `entry` if it is still the table's entry for its id
    pub fn remove_entry(&self, entry: &Arc<SessionEntry>) -> bool {
        let removed = self
            .sessions
            .remove_if(&entry.id, |_, current| Arc::ptr_eq(current, entry))
            .is_some();
        if removed {
            debug!(session_id = %entry.id, "Unregistered session entry");
        }
        removed
    }

    pub fn entries(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| !e.is_removed())
            .collect()
    }

    /// Remove and return every entry
    pub fn drain(&self) -> Vec<Arc<SessionEntry>> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.sessions.remove(id).map(|(_, entry)| entry))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshots of all sessions, ordered by id
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<_> = self.entries().iter().map(|e| e.snapshot()).collect();
        snapshots.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshots
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        for entry in self.entries() {
            stats.total += 1;
            match entry.state() {
                SessionState::Starting => stats.starting += 1,
                SessionState::AwaitingPairing => stats.awaiting_pairing += 1,
                SessionState::Connected => stats.connected += 1,
                SessionState::Disconnected => stats.disconnected += 1,
                SessionState::Error => stats.error += 1,
                SessionState::NotStarted => {}
            }
        }
        stats
    }
}
