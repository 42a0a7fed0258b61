use serde::Serialize;

use crate::catalog::{self, Exercise};
use crate::session::entry::mean_reps;
use crate::store::schema::EntryRow;

const PAIN_KEYWORDS: [&str; 4] = ["pain", "hurt", "injury", "sore"];
const FORM_ISSUE_KEYWORDS: [&str; 4] = ["bad form", "cheat", "ego", "failed"];
const EASY_KEYWORD: &str = "easy";

const STANDARD_INCREMENT: f64 = 2.5;
const MICRO_INCREMENT: f64 = 1.25;
const PAIN_REDUCTION: f64 = 0.9;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressionSuggestion {
    pub exercise_name: String,
    pub current_weight: Option<f64>,
    pub suggested_weight: Option<f64>,
    pub reason: String,
    pub is_warning: bool,
}

pub fn increment(microloading: bool) -> f64 {
    if microloading {
        MICRO_INCREMENT
    } else {
        STANDARD_INCREMENT
    }
}

/// Representative `(weight, reps)`: with per-set data the last set's weight
/// and the rounded mean reps, otherwise the legacy fields.
fn work_done(entry: &EntryRow) -> (Option<f64>, u32) {
    match entry.sets_detail() {
        Some(sets) => (sets.last().and_then(|s| s.weight), mean_reps(sets)),
        None => (entry.weight, entry.reps),
    }
}

fn round_to_quarter(weight: f64) -> f64 {
    (weight * 4.0).round() / 4.0
}

fn mentions_any(note: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| note.contains(keyword))
}

/// Next-session load for one committed entry.
pub fn suggest(exercise: &Exercise, entry: &EntryRow, microloading: bool) -> ProgressionSuggestion {
    let step = increment(microloading);
    let note = entry.note.as_deref().unwrap_or_default().to_lowercase();
    let (current_weight, reps) = work_done(entry);
    // A zero load has nothing to scale or add to.
    let loaded = current_weight.filter(|w| *w != 0.0);
    let suggestion = |suggested_weight: Option<f64>, reason: String, is_warning: bool| {
        ProgressionSuggestion {
            exercise_name: exercise.name.clone(),
            current_weight,
            suggested_weight,
            reason,
            is_warning,
        }
    };

    if mentions_any(&note, &PAIN_KEYWORDS) {
        return suggestion(
            loaded.map(|w| round_to_quarter(w * PAIN_REDUCTION)),
            "Pain detected - reduce weight 10% and fix technique".to_string(),
            true,
        );
    }

    let form_issue = mentions_any(&note, &FORM_ISSUE_KEYWORDS);
    let repeat = || suggestion(current_weight, "Repeat same weight".to_string(), false);

    if exercise.is_main {
        let sets_done = entry
            .sets_detail()
            .map_or(entry.sets, |sets| sets.len() as u32);
        let met_target = entry.completed
            && sets_done >= exercise.default_sets
            && reps >= exercise.default_reps
            && !form_issue;
        if met_target {
            suggestion(
                loaded.map(|w| w + step),
                format!("Target achieved - add {step}kg"),
                false,
            )
        } else {
            repeat()
        }
    } else {
        let half = step / 2.0;
        let exceeded_reps = reps >= exercise.default_reps + 2;
        if exceeded_reps || note.contains(EASY_KEYWORD) {
            suggestion(
                loaded.map(|w| w + half),
                format!("Strong performance - add {half}kg"),
                false,
            )
        } else {
            repeat()
        }
    }
}

/// One suggestion per completed entry whose exercise is still in the
/// catalog, in entry order.
pub fn suggest_all(
    catalog: &[Exercise],
    entries: &[EntryRow],
    microloading: bool,
) -> Vec<ProgressionSuggestion> {
    entries
        .iter()
        .filter(|entry| entry.completed)
        .filter_map(|entry| {
            catalog::find(catalog, &entry.exercise_id)
                .map(|exercise| suggest(exercise, entry, microloading))
        })
        .collect()
}
