use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::remote::{RemoteError, RemoteStore};
use crate::store::json_store::JsonStore;
use crate::store::schema::QueueData;

const NAMESPACE: &str = "queue";
const QUEUE_KEY: &str = "offline_mutation_queue";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

/// Rows matching `column = value` are deleted before an insert is applied,
/// turning the insert into a full replace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceScope {
    pub column: String,
    pub value: String,
}

/// A mutation as the caller describes it, before it is queued.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMutation {
    pub kind: MutationKind,
    pub table: String,
    pub payload: Value,
    pub replace: Option<ReplaceScope>,
}

impl NewMutation {
    pub fn insert(table: &str, payload: Value) -> Self {
        Self {
            kind: MutationKind::Insert,
            table: table.to_string(),
            payload,
            replace: None,
        }
    }

    pub fn update(table: &str, payload: Value) -> Self {
        Self {
            kind: MutationKind::Update,
            ..Self::insert(table, payload)
        }
    }

    pub fn delete(table: &str, payload: Value) -> Self {
        Self {
            kind: MutationKind::Delete,
            ..Self::insert(table, payload)
        }
    }

    pub fn replacing(mut self, column: &str, value: &str) -> Self {
        self.replace = Some(ReplaceScope {
            column: column.to_string(),
            value: value.to_string(),
        });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: MutationKind,
    pub table: String,
    #[serde(rename = "data")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<ReplaceScope>,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Clears the in-flight flag when a drain finishes, however it finishes.
struct DrainFlight<'a>(&'a AtomicBool);

impl<'a> DrainFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable FIFO of remote mutations captured while offline.
///
/// The file lock serializes every read-modify-write of the queue file, so an
/// enqueue that lands during a drain is neither lost nor replayed by that
/// drain: the drain works from the snapshot it read and only ever removes
/// mutations by id.
pub struct MutationQueue {
    store: JsonStore,
    file_lock: Mutex<()>,
    draining: AtomicBool,
}

impl MutationQueue {
    pub fn new(store: JsonStore) -> Self {
        Self {
            store,
            file_lock: Mutex::new(()),
            draining: AtomicBool::new(false),
        }
    }

    /// Run blocking file work off the async workers. Callers hold
    /// `file_lock` across the call.
    async fn on_disk<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&JsonStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .context("queue file task failed")?
    }

    /// Returns once the mutation is on disk.
    pub async fn enqueue(&self, mutation: NewMutation) -> Result<QueuedMutation> {
        let _guard = self.file_lock.lock().await;
        let queued = QueuedMutation {
            id: Uuid::new_v4(),
            kind: mutation.kind,
            table: mutation.table,
            payload: mutation.payload,
            replace: mutation.replace,
            enqueued_at: Utc::now(),
        };
        let record = queued.clone();
        self.on_disk(move |store| {
            let mut data = read_queue(store)?;
            data.mutations.push(record);
            write_queue(store, &data)
        })
        .await?;
        debug!(id = %queued.id, table = %queued.table, kind = ?queued.kind, "mutation queued");
        Ok(queued)
    }

    pub async fn pending(&self) -> Result<Vec<QueuedMutation>> {
        let _guard = self.file_lock.lock().await;
        self.on_disk(|store| Ok(read_queue(store)?.mutations)).await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.pending().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.file_lock.lock().await;
        self.on_disk(|store| write_queue(store, &QueueData::default()))
            .await
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        let _guard = self.file_lock.lock().await;
        self.on_disk(move |store| {
            let mut data = read_queue(store)?;
            data.mutations.retain(|m| m.id != id);
            write_queue(store, &data)
        })
        .await
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Replay queued mutations in enqueue order. A failing mutation stays
    /// queued and does not stop later ones. Returns `Ok(None)` without doing
    /// anything when another drain is already running, and an error when the
    /// queue itself cannot be read.
    pub async fn drain(&self, remote: &dyn RemoteStore) -> Result<Option<DrainReport>> {
        let Some(_flight) = DrainFlight::acquire(&self.draining) else {
            debug!("drain already in progress");
            return Ok(None);
        };

        let snapshot = self
            .pending()
            .await
            .context("could not read mutation queue")?;

        let mut report = DrainReport::default();
        for mutation in &snapshot {
            match apply(remote, mutation).await {
                Ok(()) => {
                    if let Err(err) = self.remove(mutation.id).await {
                        // Applied but still queued: it will be replayed, which
                        // the remote absorbs as an overwrite.
                        warn!(id = %mutation.id, error = %err, "could not dequeue applied mutation");
                    }
                    report.succeeded += 1;
                }
                Err(err) => {
                    warn!(
                        id = %mutation.id,
                        table = %mutation.table,
                        error = %err,
                        "mutation replay failed"
                    );
                    report.failed += 1;
                }
            }
        }

        if !snapshot.is_empty() {
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                "mutation queue drained"
            );
        }
        Ok(Some(report))
    }
}

fn read_queue(store: &JsonStore) -> Result<QueueData> {
    Ok(store.load(NAMESPACE, QUEUE_KEY)?.unwrap_or_default())
}

fn write_queue(store: &JsonStore, data: &QueueData) -> Result<()> {
    store.save(NAMESPACE, QUEUE_KEY, data)
}

fn payload_id(mutation: &QueuedMutation) -> Result<String, RemoteError> {
    match mutation.payload.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(RemoteError::Rejected {
            table: mutation.table.clone(),
            status: None,
            message: "payload has no id".to_string(),
        }),
    }
}

/// Apply one mutation to `remote` without touching the queue.
pub async fn apply(remote: &dyn RemoteStore, mutation: &QueuedMutation) -> Result<(), RemoteError> {
    let table = mutation.table.as_str();
    match mutation.kind {
        MutationKind::Insert => {
            let rows = match &mutation.payload {
                Value::Array(rows) => rows.clone(),
                row => vec![row.clone()],
            };
            match &mutation.replace {
                Some(scope) => {
                    remote
                        .replace_where(table, &scope.column, &scope.value, rows)
                        .await
                }
                None => remote.insert(table, rows).await,
            }
        }
        MutationKind::Update => {
            let id = payload_id(mutation)?;
            remote.update(table, &id, mutation.payload.clone()).await
        }
        MutationKind::Delete => {
            let id = payload_id(mutation)?;
            remote.delete(table, &id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::remote::MemoryRemote;

    fn make_queue() -> (TempDir, MutationQueue) {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        (dir, MutationQueue::new(store))
    }

    #[tokio::test]
    async fn test_enqueue_is_durable_across_instances() {
        let (dir, queue) = make_queue();
        let first = queue
            .enqueue(NewMutation::insert("session_entries", json!([{"session_id": "s1"}])))
            .await
            .unwrap();
        queue
            .enqueue(NewMutation::update("sessions", json!({"id": "s1"})))
            .await
            .unwrap();

        let reopened = MutationQueue::new(JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap());
        let pending = reopened.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].kind, MutationKind::Update);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_enqueues_all_persist() {
        let (dir, queue) = make_queue();
        let queue = Arc::new(queue);
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    queue
                        .enqueue(NewMutation::delete("sessions", json!({"id": i})))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let reopened = MutationQueue::new(JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap());
        assert_eq!(reopened.len().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_drain_keeps_only_the_failed_mutation() {
        let (_dir, queue) = make_queue();
        let remote = MemoryRemote::new();
        remote.reject("sessions").await;

        queue
            .enqueue(NewMutation::insert("session_entries", json!({"id": "e1", "session_id": "s1"})))
            .await
            .unwrap();
        let stuck = queue
            .enqueue(NewMutation::update("sessions", json!({"id": "s1", "finished_at": "now"})))
            .await
            .unwrap();
        queue
            .enqueue(NewMutation::insert("session_entries", json!({"id": "e2", "session_id": "s1"})))
            .await
            .unwrap();

        let report = queue.drain(&remote).await.unwrap().unwrap();
        assert_eq!(report, DrainReport { succeeded: 2, failed: 1 });
        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], stuck);
        assert_eq!(remote.rows("session_entries").await.len(), 2);
    }

    #[tokio::test]
    async fn test_drain_replays_in_enqueue_order() {
        let (_dir, queue) = make_queue();
        let remote = MemoryRemote::new();
        for id in ["a", "b", "c"] {
            queue
                .enqueue(NewMutation::delete("sessions", json!({ "id": id })))
                .await
                .unwrap();
        }
        queue.drain(&remote).await.unwrap().unwrap();
        let keys: Vec<Option<String>> = remote.calls().await.into_iter().map(|c| c.key).collect();
        assert_eq!(
            keys,
            [Some("a".to_string()), Some("b".to_string()), Some("c".to_string())]
        );
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_update_without_id_stays_queued() {
        let (_dir, queue) = make_queue();
        let remote = MemoryRemote::new();
        queue
            .enqueue(NewMutation::update("sessions", json!({"finished_at": "now"})))
            .await
            .unwrap();
        let report = queue.drain(&remote).await.unwrap().unwrap();
        assert_eq!(report, DrainReport { succeeded: 0, failed: 1 });
        assert_eq!(queue.len().await.unwrap(), 1);
        assert!(remote.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_scoped_insert_replaces_prior_rows() {
        let (_dir, queue) = make_queue();
        let remote = MemoryRemote::new();
        remote
            .seed(
                "session_entries",
                vec![json!({"id": "old", "session_id": "s1", "exercise_id": "bench"})],
            )
            .await;
        let rows = json!([{"session_id": "s1", "exercise_id": "squat"}]);
        let mutation =
            NewMutation::insert("session_entries", rows).replacing("session_id", "s1");

        queue.enqueue(mutation.clone()).await.unwrap();
        queue.drain(&remote).await.unwrap().unwrap();
        // A replay of the same capture lands on the same final state.
        queue.enqueue(mutation).await.unwrap();
        queue.drain(&remote).await.unwrap().unwrap();

        let stored = remote.rows("session_entries").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["exercise_id"], "squat");
    }

    #[tokio::test]
    async fn test_unreadable_queue_fails_the_drain() {
        let (dir, queue) = make_queue();
        let remote = MemoryRemote::new();
        std::fs::create_dir_all(dir.path().join(NAMESPACE)).unwrap();
        std::fs::write(
            dir.path().join(NAMESPACE).join(format!("{QUEUE_KEY}.json")),
            "{oops",
        )
        .unwrap();

        let err = queue.drain(&remote).await.unwrap_err();
        assert!(format!("{err:#}").contains("could not read mutation queue"));
        assert!(!queue.is_draining());
        assert!(remote.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_drain_is_a_noop() {
        let (_dir, queue) = make_queue();
        let remote = MemoryRemote::new().with_latency(Duration::from_millis(50));
        queue
            .enqueue(NewMutation::delete("sessions", json!({"id": "s1"})))
            .await
            .unwrap();

        let (first, second) = tokio::join!(queue.drain(&remote), queue.drain(&remote));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first, Some(DrainReport { succeeded: 1, failed: 0 }));
        assert_eq!(second, None);
        assert!(!queue.is_draining());
        assert_eq!(remote.calls().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_during_drain_is_kept_for_next_drain() {
        let (_dir, queue) = make_queue();
        let queue = Arc::new(queue);
        let remote = Arc::new(MemoryRemote::new().with_latency(Duration::from_millis(50)));
        queue
            .enqueue(NewMutation::delete("sessions", json!({"id": "before"})))
            .await
            .unwrap();

        let late = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            queue
                .enqueue(NewMutation::delete("sessions", json!({"id": "during"})))
                .await
                .unwrap()
        };
        let (report, late) = tokio::join!(queue.drain(remote.as_ref()), late);
        let report = report.unwrap();

        assert_eq!(report, Some(DrainReport { succeeded: 1, failed: 0 }));
        let pending = queue.pending().await.unwrap();
        assert_eq!(pending, vec![late]);

        let report = queue.drain(remote.as_ref()).await.unwrap();
        assert_eq!(report, Some(DrainReport { succeeded: 1, failed: 0 }));
        assert_eq!(remote.calls().await.len(), 2);
    }
}
