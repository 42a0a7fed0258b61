use anyhow::Result;
use tracing::warn;

use crate::session::entry::EntryState;
use crate::store::json_store::JsonStore;
use crate::store::schema::{DraftSnapshot, SessionRow};

const NAMESPACE: &str = "drafts";

fn entries_key(session_id: &str) -> String {
    format!("entries_{session_id}")
}

fn session_key(session_id: &str) -> String {
    format!("session_{session_id}")
}

/// Session-scoped autosave. Last write wins; the autosave timer is the only
/// writer for a given session.
#[derive(Clone, Debug)]
pub struct DraftStore {
    store: JsonStore,
}

impl DraftStore {
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    pub fn save(&self, session_id: &str, entries: &[EntryState]) -> Result<()> {
        let snapshot = DraftSnapshot::new(entries.to_vec());
        self.store
            .save(NAMESPACE, &entries_key(session_id), &snapshot)
    }

    /// Most recent snapshot, or empty when none exists. Unreadable or stale
    /// snapshots are dropped with a warning rather than failing the resume.
    pub fn load(&self, session_id: &str) -> Vec<EntryState> {
        match self
            .store
            .load::<DraftSnapshot>(NAMESPACE, &entries_key(session_id))
        {
            Ok(Some(snapshot)) if !snapshot.needs_reset() => snapshot.entries,
            Ok(Some(snapshot)) => {
                warn!(
                    session_id,
                    schema_version = snapshot.schema_version,
                    "discarding draft with stale schema"
                );
                Vec::new()
            }
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(session_id, error = %err, "discarding unreadable draft");
                Vec::new()
            }
        }
    }

    pub fn clear(&self, session_id: &str) -> Result<()> {
        self.store.remove(NAMESPACE, &entries_key(session_id))?;
        self.store.remove(NAMESPACE, &session_key(session_id))?;
        Ok(())
    }

    pub fn save_session(&self, session: &SessionRow) -> Result<()> {
        self.store.save(NAMESPACE, &session_key(&session.id), session)
    }

    pub fn load_session(&self, session_id: &str) -> Option<SessionRow> {
        self.store
            .load(NAMESPACE, &session_key(session_id))
            .ok()
            .flatten()
    }

    /// Session ids that currently have saved entries.
    pub fn sessions(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys(NAMESPACE)?
            .into_iter()
            .filter_map(|key| key.strip_prefix("entries_").map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::session::entry::{SetEntry, Tracking};

    fn make_drafts() -> (TempDir, DraftStore) {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        (dir, DraftStore::new(store))
    }

    fn entry(id: &str, tracking: Tracking) -> EntryState {
        EntryState {
            exercise_id: id.to_string(),
            display_exercise_id: id.to_string(),
            swapped_from: None,
            tracking,
            note: String::new(),
            completed: false,
            show_note: false,
        }
    }

    #[test]
    fn test_load_without_save_is_empty() {
        let (_dir, drafts) = make_drafts();
        assert!(drafts.load("s1").is_empty());
    }

    #[test]
    fn test_save_load_preserves_modes_and_lineage() {
        let (_dir, drafts) = make_drafts();
        let mut swapped = entry(
            "bench",
            Tracking::Advanced {
                sets: vec![
                    SetEntry { set: 1, weight: Some(24.0), reps: 10 },
                    SetEntry { set: 2, weight: Some(24.0), reps: 9 },
                ],
            },
        );
        swapped.display_exercise_id = "db-press".to_string();
        swapped.swapped_from = Some("bench".to_string());
        swapped.note = "left shoulder tight".to_string();
        swapped.show_note = true;
        let simple = entry(
            "plank",
            Tracking::Simple { weight: None, sets: 3, reps: 45 },
        );
        let entries = vec![swapped, simple];

        drafts.save("s1", &entries).unwrap();
        assert_eq!(drafts.load("s1"), entries);
    }

    #[test]
    fn test_later_save_wins() {
        let (_dir, drafts) = make_drafts();
        let first = vec![entry("a", Tracking::Simple { weight: Some(1.0), sets: 1, reps: 1 })];
        let second = vec![entry("b", Tracking::Simple { weight: Some(2.0), sets: 2, reps: 2 })];
        drafts.save("s1", &first).unwrap();
        drafts.save("s1", &second).unwrap();
        assert_eq!(drafts.load("s1"), second);
    }

    #[test]
    fn test_clear_removes_entries_and_session() {
        let (_dir, drafts) = make_drafts();
        let session = SessionRow {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            workout_type_id: "push".to_string(),
            started_at: Utc::now(),
            finished_at: None,
        };
        drafts.save_session(&session).unwrap();
        drafts.save("s1", &[entry("a", Tracking::Simple { weight: None, sets: 1, reps: 1 })]).unwrap();
        assert_eq!(drafts.load_session("s1"), Some(session));
        assert_eq!(drafts.sessions().unwrap(), vec!["s1".to_string()]);

        drafts.clear("s1").unwrap();
        assert!(drafts.load("s1").is_empty());
        assert!(drafts.load_session("s1").is_none());
        assert!(drafts.sessions().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_draft_loads_empty() {
        let (dir, drafts) = make_drafts();
        fs::create_dir_all(dir.path().join("drafts")).unwrap();
        fs::write(dir.path().join("drafts").join("entries_s1.json"), "[[[").unwrap();
        assert!(drafts.load("s1").is_empty());
    }

    #[test]
    fn test_drafts_are_scoped_per_session() {
        let (_dir, drafts) = make_drafts();
        drafts.save("s1", &[entry("a", Tracking::Simple { weight: None, sets: 1, reps: 1 })]).unwrap();
        assert!(drafts.load("s2").is_empty());
    }
}
