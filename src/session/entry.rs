use serde::{Deserialize, Serialize};

use crate::catalog::Exercise;
use crate::store::schema::EntryRow;

/// One performed set. `set` is 1-based and contiguous within an entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetEntry {
    pub set: u32,
    pub weight: Option<f64>,
    pub reps: u32,
}

/// The authoritative representation of an entry's work. Exactly one is live.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Tracking {
    Simple {
        weight: Option<f64>,
        sets: u32,
        reps: u32,
    },
    /// Never empty.
    Advanced { sets: Vec<SetEntry> },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetPatch {
    pub weight: Option<Option<f64>>,
    pub reps: Option<u32>,
}

/// Field-wise update for [`EntryState`]. The weight/sets/reps fields only
/// apply to simple tracking; per-set edits go through [`SetPatch`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntryPatch {
    pub weight: Option<Option<f64>>,
    pub sets: Option<u32>,
    pub reps: Option<u32>,
    pub note: Option<String>,
    pub completed: Option<bool>,
    pub show_note: Option<bool>,
}

impl EntryPatch {
    pub fn completed(done: bool) -> Self {
        Self {
            completed: Some(done),
            ..Self::default()
        }
    }

    pub fn note(text: impl Into<String>) -> Self {
        Self {
            note: Some(text.into()),
            show_note: Some(true),
            ..Self::default()
        }
    }
}

/// Rounded mean with halves going up. Zero for an empty slice.
pub fn mean_reps(sets: &[SetEntry]) -> u32 {
    if sets.is_empty() {
        return 0;
    }
    let total: u64 = sets.iter().map(|s| u64::from(s.reps)).sum();
    let count = sets.len() as u64;
    ((2 * total + count) / (2 * count)) as u32
}

fn renumber(sets: &mut [SetEntry]) {
    for (idx, set) in sets.iter_mut().enumerate() {
        set.set = idx as u32 + 1;
    }
}

impl Tracking {
    pub fn simple_defaults(exercise: &Exercise) -> Self {
        Tracking::Simple {
            weight: exercise.default_weight,
            sets: exercise.default_sets,
            reps: exercise.default_reps,
        }
    }

    pub fn is_advanced(&self) -> bool {
        matches!(self, Tracking::Advanced { .. })
    }

    pub fn set_data(&self) -> Option<&[SetEntry]> {
        match self {
            Tracking::Advanced { sets } => Some(sets),
            Tracking::Simple { .. } => None,
        }
    }

    /// Simple -> advanced replicates the triple once per set (at least one
    /// set). Advanced -> simple takes the first set's weight and reps and the
    /// set count.
    pub fn toggled(&self) -> Tracking {
        match self {
            Tracking::Simple { weight, sets, reps } => Tracking::Advanced {
                sets: (1..=(*sets).max(1))
                    .map(|set| SetEntry {
                        set,
                        weight: *weight,
                        reps: *reps,
                    })
                    .collect(),
            },
            Tracking::Advanced { sets } => {
                let first = sets.first();
                Tracking::Simple {
                    weight: first.and_then(|s| s.weight),
                    sets: sets.len() as u32,
                    reps: first.map_or(0, |s| s.reps),
                }
            }
        }
    }

    /// Legacy `(weight, sets, reps)` for storage: advanced entries report
    /// the first set's weight, the set count and the rounded mean reps.
    pub fn aggregate(&self) -> (Option<f64>, u32, u32) {
        match self {
            Tracking::Simple { weight, sets, reps } => (*weight, *sets, *reps),
            Tracking::Advanced { sets } => (
                sets.first().and_then(|s| s.weight),
                sets.len() as u32,
                mean_reps(sets),
            ),
        }
    }

    pub fn push_set(&mut self) -> bool {
        let Tracking::Advanced { sets } = self else {
            return false;
        };
        let weight = sets.last().and_then(|s| s.weight);
        sets.push(SetEntry {
            set: sets.len() as u32 + 1,
            weight,
            reps: 1,
        });
        true
    }

    /// Refuses to drop the only remaining set or an out-of-range index.
    pub fn remove_set(&mut self, index: usize) -> bool {
        let Tracking::Advanced { sets } = self else {
            return false;
        };
        if sets.len() <= 1 || index >= sets.len() {
            return false;
        }
        sets.remove(index);
        renumber(sets);
        true
    }

    pub fn update_set(&mut self, index: usize, patch: &SetPatch) -> bool {
        let Tracking::Advanced { sets } = self else {
            return false;
        };
        let Some(set) = sets.get_mut(index) else {
            return false;
        };
        if let Some(weight) = patch.weight {
            set.weight = weight;
        }
        if let Some(reps) = patch.reps {
            set.reps = reps;
        }
        true
    }
}

/// In-session state for one tracked exercise. `exercise_id` is the catalog
/// row the entry was created for and never changes; swaps only move
/// `display_exercise_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryState {
    pub exercise_id: String,
    pub display_exercise_id: String,
    #[serde(default)]
    pub swapped_from: Option<String>,
    pub tracking: Tracking,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub show_note: bool,
}

impl EntryState {
    pub fn from_defaults(exercise: &Exercise) -> Self {
        Self {
            exercise_id: exercise.id.clone(),
            display_exercise_id: exercise.id.clone(),
            swapped_from: None,
            tracking: Tracking::simple_defaults(exercise),
            note: String::new(),
            completed: false,
            show_note: false,
        }
    }

    /// Prefill from the last completed entry for this exercise in an earlier
    /// session, falling back to catalog defaults.
    pub fn seeded(exercise: &Exercise, previous: Option<&EntryRow>) -> Self {
        let Some(previous) = previous else {
            return Self::from_defaults(exercise);
        };
        let tracking = match previous.sets_detail() {
            Some(sets) => Tracking::Advanced {
                sets: sets.to_vec(),
            },
            None => Tracking::Simple {
                weight: previous.weight.or(exercise.default_weight),
                sets: previous.sets,
                reps: previous.reps,
            },
        };
        Self {
            tracking,
            ..Self::from_defaults(exercise)
        }
    }

    /// Rebuild the entry a row was committed from in this same session.
    pub fn from_committed(exercise_id: &str, row: &EntryRow) -> Self {
        let tracking = match row.sets_detail() {
            Some(sets) => Tracking::Advanced {
                sets: sets.to_vec(),
            },
            None => Tracking::Simple {
                weight: row.weight,
                sets: row.sets,
                reps: row.reps,
            },
        };
        let note = row.note.clone().unwrap_or_default();
        Self {
            exercise_id: exercise_id.to_string(),
            display_exercise_id: row.exercise_id.clone(),
            swapped_from: row.swapped_from_exercise_id.clone(),
            tracking,
            show_note: !note.is_empty(),
            note,
            completed: row.completed,
        }
    }

    pub fn apply(&mut self, patch: &EntryPatch) {
        if let Tracking::Simple { weight, sets, reps } = &mut self.tracking {
            if let Some(value) = patch.weight {
                *weight = value;
            }
            if let Some(value) = patch.sets {
                *sets = value;
            }
            if let Some(value) = patch.reps {
                *reps = value;
            }
        }
        if let Some(note) = &patch.note {
            self.note.clone_from(note);
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(show_note) = patch.show_note {
            self.show_note = show_note;
        }
    }

    pub fn toggle_mode(&mut self) {
        self.tracking = self.tracking.toggled();
    }

    /// Point the entry at another exercise and reset the working values to
    /// its defaults. The lineage keeps the very first exercise shown.
    pub fn swap_to(&mut self, exercise: &Exercise) {
        if self.swapped_from.is_none() {
            self.swapped_from = Some(self.exercise_id.clone());
        }
        self.display_exercise_id = exercise.id.clone();
        self.tracking = if self.tracking.is_advanced() {
            Tracking::Advanced {
                sets: vec![SetEntry {
                    set: 1,
                    weight: exercise.default_weight,
                    reps: exercise.default_reps,
                }],
            }
        } else {
            Tracking::simple_defaults(exercise)
        };
    }

    pub fn to_row(&self, session_id: &str, user_id: &str) -> EntryRow {
        let (weight, sets, reps) = self.tracking.aggregate();
        EntryRow {
            id: None,
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            exercise_id: self.display_exercise_id.clone(),
            weight,
            sets,
            reps,
            note: (!self.note.is_empty()).then(|| self.note.clone()),
            completed: self.completed,
            set_data: self.tracking.set_data().map(<[SetEntry]>::to_vec),
            swapped_from_exercise_id: self.swapped_from.clone(),
            created_at: None,
        }
    }
}
