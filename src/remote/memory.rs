use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RemoteError, RemoteStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: &'static str,
    pub table: String,
    pub key: Option<String>,
}

/// In-process backend with failure injection. Used as the test double and
/// for `--dry-run` replays.
pub struct MemoryRemote {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    rejected_tables: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RemoteCall>>,
    available: AtomicBool,
    latency: Duration,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            rejected_tables: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            latency: Duration::ZERO,
        }
    }
}

fn row_matches(row: &Value, column: &str, value: &str) -> bool {
    match row.get(column) {
        Some(Value::String(s)) => s == value,
        Some(Value::Number(n)) => n.to_string() == value,
        _ => false,
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().await.clone()
    }

    /// Every following request against `table` fails until [`Self::accept`].
    pub async fn reject(&self, table: &str) {
        self.rejected_tables.lock().await.insert(table.to_string());
    }

    pub async fn accept(&self, table: &str) {
        self.rejected_tables.lock().await.remove(table);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    async fn begin(
        &self,
        op: &'static str,
        table: &str,
        key: Option<&str>,
    ) -> Result<(), RemoteError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.calls.lock().await.push(RemoteCall {
            op,
            table: table.to_string(),
            key: key.map(str::to_string),
        });
        if !self.available.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable);
        }
        if self.rejected_tables.lock().await.contains(table) {
            return Err(RemoteError::Rejected {
                table: table.to_string(),
                status: Some(409),
                message: "rejected by test double".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), RemoteError> {
        self.begin("insert", table, None).await?;
        let mut prepared = Vec::with_capacity(rows.len());
        for mut row in rows {
            let Some(object) = row.as_object_mut() else {
                return Err(RemoteError::Rejected {
                    table: table.to_string(),
                    status: Some(400),
                    message: "row is not an object".to_string(),
                });
            };
            object
                .entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            prepared.push(row);
        }
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(prepared);
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<(), RemoteError> {
        self.begin("update", table, Some(id)).await?;
        let Value::Object(fields) = patch else {
            return Err(RemoteError::Rejected {
                table: table.to_string(),
                status: Some(400),
                message: "patch is not an object".to_string(),
            });
        };
        let mut tables = self.tables.lock().await;
        for row in tables.entry(table.to_string()).or_default() {
            if !row_matches(row, "id", id) {
                continue;
            }
            if let Some(object) = row.as_object_mut() {
                for (key, value) in &fields {
                    object.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        self.begin("delete", table, Some(id)).await?;
        if let Some(rows) = self.tables.lock().await.get_mut(table) {
            rows.retain(|row| !row_matches(row, "id", id));
        }
        Ok(())
    }

    async fn delete_where(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<(), RemoteError> {
        self.begin("delete_where", table, Some(value)).await?;
        if let Some(rows) = self.tables.lock().await.get_mut(table) {
            rows.retain(|row| !row_matches(row, column, value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn insert_assigns_ids_and_update_merges() {
        let remote = MemoryRemote::new();
        remote
            .insert("sessions", vec![json!({"id": "s1", "finished_at": null})])
            .await
            .unwrap();
        remote
            .update("sessions", "s1", json!({"finished_at": "2026-01-01T00:00:00Z"}))
            .await
            .unwrap();
        remote.insert("session_entries", vec![json!({"session_id": "s1"})]).await.unwrap();

        let sessions = remote.rows("sessions").await;
        assert_eq!(sessions[0]["finished_at"], "2026-01-01T00:00:00Z");
        let entries = remote.rows("session_entries").await;
        assert!(entries[0]["id"].is_string());
    }

    #[tokio::test]
    async fn replace_where_only_touches_matching_rows() {
        let remote = MemoryRemote::new();
        remote
            .seed(
                "session_entries",
                vec![
                    json!({"id": "a", "session_id": "s1"}),
                    json!({"id": "b", "session_id": "s2"}),
                ],
            )
            .await;
        remote
            .replace_where(
                "session_entries",
                "session_id",
                "s1",
                vec![json!({"session_id": "s1", "exercise_id": "bench"})],
            )
            .await
            .unwrap();

        let rows = remote.rows("session_entries").await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r["id"] == "b"));
        assert!(rows.iter().any(|r| r["exercise_id"] == "bench"));
        assert!(!rows.iter().any(|r| r["id"] == "a"));
    }

    #[tokio::test]
    async fn rejected_table_and_outage_fail_requests() {
        let remote = MemoryRemote::new();
        remote.reject("sessions").await;
        let err = remote.delete("sessions", "s1").await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: Some(409), .. }));
        assert!(err.to_string().contains("HTTP 409"));

        remote.accept("sessions").await;
        remote.set_available(false);
        assert_eq!(
            remote.delete("sessions", "s1").await,
            Err(RemoteError::Unavailable)
        );
        assert_eq!(remote.calls().await.len(), 2);
    }
}
