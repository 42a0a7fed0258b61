use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Exercise;
use crate::engine::progression::{self, ProgressionSuggestion};
use crate::engine::summary::{self, SummaryOptions};
use crate::session::entry::{EntryState, SetEntry};
use crate::store::queue::QueuedMutation;

pub const SCHEMA_VERSION: u32 = 1;

pub const ENTRIES_TABLE: &str = "session_entries";
pub const SESSIONS_TABLE: &str = "sessions";

/// One committed entry as the remote store holds it. Advanced entries carry
/// `set_data` plus the legacy aggregates so older readers still work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub session_id: String,
    pub user_id: String,
    pub exercise_id: String,
    pub weight: Option<f64>,
    pub sets: u32,
    pub reps: u32,
    pub note: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub set_data: Option<Vec<SetEntry>>,
    #[serde(default)]
    pub swapped_from_exercise_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl EntryRow {
    /// Per-set data, ignoring an empty array.
    pub fn sets_detail(&self) -> Option<&[SetEntry]> {
        self.set_data.as_deref().filter(|sets| !sets.is_empty())
    }

    /// The catalog exercise this row was logged against before any swap.
    pub fn origin_exercise_id(&self) -> &str {
        self.swapped_from_exercise_id
            .as_deref()
            .unwrap_or(&self.exercise_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub workout_type_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Everything the finish view needs: the share text and next-session loads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinishedSession {
    pub workout_type_name: String,
    pub exercises: Vec<Exercise>,
    pub entries: Vec<EntryRow>,
}

impl FinishedSession {
    pub fn summary(&self, options: SummaryOptions) -> String {
        summary::format_summary(
            &self.workout_type_name,
            &self.exercises,
            &self.entries,
            options,
        )
    }

    pub fn suggestions(&self, microloading: bool) -> Vec<ProgressionSuggestion> {
        progression::suggest_all(&self.exercises, &self.entries, microloading)
    }
}

/// Autosave envelope for one session's in-progress entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<EntryState>,
}

impl DraftSnapshot {
    pub fn new(entries: Vec<EntryState>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            entries,
        }
    }

    /// A snapshot written by an incompatible build is discarded, not migrated.
    pub fn needs_reset(&self) -> bool {
        self.schema_version != SCHEMA_VERSION
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueData {
    pub schema_version: u32,
    pub mutations: Vec<QueuedMutation>,
}

impl Default for QueueData {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            mutations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_follows_swap_lineage() {
        let json = r#"{
            "session_id": "s1",
            "user_id": "u1",
            "exercise_id": "db-press",
            "weight": 30,
            "sets": 3,
            "reps": 10,
            "note": null,
            "completed": true,
            "swapped_from_exercise_id": "bench"
        }"#;
        let row: EntryRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.origin_exercise_id(), "bench");
        assert!(row.sets_detail().is_none());
    }

    #[test]
    fn test_empty_set_data_counts_as_absent() {
        let json = r#"{
            "session_id": "s1",
            "user_id": "u1",
            "exercise_id": "bench",
            "weight": 60,
            "sets": 3,
            "reps": 8,
            "note": null,
            "set_data": []
        }"#;
        let row: EntryRow = serde_json::from_str(json).unwrap();
        assert!(row.sets_detail().is_none());
        assert!(!row.completed);
        assert_eq!(row.origin_exercise_id(), "bench");
    }

    #[test]
    fn test_stale_draft_needs_reset() {
        let mut snapshot = DraftSnapshot::new(Vec::new());
        assert!(!snapshot.needs_reset());
        snapshot.schema_version = 99;
        assert!(snapshot.needs_reset());
    }
}
