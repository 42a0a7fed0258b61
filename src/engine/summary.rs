use crate::catalog::{self, Exercise};
use crate::session::entry::SetEntry;
use crate::store::schema::EntryRow;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SummaryOptions {
    pub include_notes: bool,
}

/// A run of consecutive sets with identical weight and reps.
#[derive(Clone, Debug, PartialEq)]
pub struct SetGroup {
    pub weight: Option<f64>,
    pub reps: u32,
    pub count: u32,
}

impl SetGroup {
    fn render(&self) -> String {
        format!("{}kg {}×{}", self.weight.unwrap_or(0.0), self.count, self.reps)
    }
}

pub fn group_sets(sets: &[SetEntry]) -> Vec<SetGroup> {
    let mut groups: Vec<SetGroup> = Vec::new();
    for set in sets {
        match groups.last_mut() {
            Some(group) if group.weight == set.weight && group.reps == set.reps => {
                group.count += 1;
            }
            _ => groups.push(SetGroup {
                weight: set.weight,
                reps: set.reps,
                count: 1,
            }),
        }
    }
    groups
}

fn render_entry(exercise: &Exercise, entry: &EntryRow) -> String {
    let name = exercise.name.to_lowercase();
    if exercise.is_timed() {
        return format!("{name} {}×{}s", entry.sets, entry.reps);
    }
    match entry.sets_detail() {
        Some(sets) => {
            let groups: Vec<String> = group_sets(sets).iter().map(SetGroup::render).collect();
            format!("{name} {} reps", groups.join(", "))
        }
        None => format!(
            "{name} {}kg {}×{} reps",
            entry.weight.unwrap_or(0.0),
            entry.sets,
            entry.reps
        ),
    }
}

/// Compact share text for a finished session: the lowercased workout name,
/// a blank line, then one line per completed entry in the given order.
/// Entries whose exercise is not in `catalog` are left out.
pub fn format_summary(
    workout_type_name: &str,
    catalog: &[Exercise],
    entries: &[EntryRow],
    options: SummaryOptions,
) -> String {
    let mut output = format!("{}\n\n", workout_type_name.to_lowercase());
    for entry in entries.iter().filter(|entry| entry.completed) {
        let Some(exercise) = catalog::find(catalog, &entry.exercise_id) else {
            continue;
        };
        output.push_str(&render_entry(exercise, entry));
        if options.include_notes
            && let Some(note) = entry.note.as_deref().filter(|n| !n.is_empty())
        {
            output.push_str(&format!(" ({note})"));
        }
        output.push('\n');
    }
    output.trim_end().to_string()
}
