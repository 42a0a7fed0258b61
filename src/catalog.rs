use serde::{Deserialize, Serialize};

/// How an exercise is measured. Older catalog rows spell the time unit `sec`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Weight,
    #[serde(alias = "sec")]
    Time,
}

/// A catalog row. Read-only to the session logger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub workout_type_id: String,
    pub name: String,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub is_main: bool,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default)]
    pub default_weight: Option<f64>,
    pub default_sets: u32,
    pub default_reps: u32,
    #[serde(default = "default_true")]
    pub show_by_default: bool,
}

fn default_true() -> bool {
    true
}

impl Exercise {
    pub fn is_timed(&self) -> bool {
        self.unit == Unit::Time
    }
}

pub fn find<'a>(catalog: &'a [Exercise], id: &str) -> Option<&'a Exercise> {
    catalog.iter().find(|exercise| exercise.id == id)
}

/// Catalog order: `sort_order`, ties keep their input order.
pub fn sorted(mut catalog: Vec<Exercise>) -> Vec<Exercise> {
    catalog.sort_by_key(|exercise| exercise.sort_order);
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_sec_unit_reads_as_time() {
        let json = r#"{
            "id": "plank",
            "workout_type_id": "core",
            "name": "Plank",
            "unit": "sec",
            "default_sets": 3,
            "default_reps": 45
        }"#;
        let exercise: Exercise = serde_json::from_str(json).unwrap();
        assert!(exercise.is_timed());
        assert!(exercise.show_by_default);
        assert_eq!(exercise.default_weight, None);
    }

    #[test]
    fn test_sorted_is_stable_on_ties() {
        let make = |id: &str, order: i32| Exercise {
            id: id.to_string(),
            workout_type_id: "push".to_string(),
            name: id.to_string(),
            sort_order: order,
            is_main: false,
            unit: Unit::Weight,
            default_weight: None,
            default_sets: 3,
            default_reps: 10,
            show_by_default: true,
        };
        let catalog = sorted(vec![make("c", 2), make("a", 1), make("b", 1)]);
        let ids: Vec<&str> = catalog.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }
}
