use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::entry::EntryState;
use crate::store::draft::DraftStore;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Debounced draft writer. Each `schedule` replaces the pending write, so
/// only the latest snapshot reaches disk once changes stop for `delay`.
/// Failures are logged and never reach the caller.
pub struct Autosaver {
    drafts: Arc<DraftStore>,
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Autosaver {
    pub fn new(drafts: Arc<DraftStore>, delay: Duration) -> Self {
        Self {
            drafts,
            delay,
            pending: None,
        }
    }

    /// Outside a tokio runtime there is nothing to debounce on, so the draft
    /// is written immediately instead.
    pub fn schedule(&mut self, session_id: &str, entries: Vec<EntryState>) {
        self.cancel();
        let Ok(runtime) = Handle::try_current() else {
            save_logged(&self.drafts, session_id, &entries);
            return;
        };
        let drafts = Arc::clone(&self.drafts);
        let delay = self.delay;
        let session_id = session_id.to_string();
        self.pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let write = tokio::task::spawn_blocking(move || {
                save_logged(&drafts, &session_id, &entries);
            });
            if let Err(err) = write.await {
                warn!(error = %err, "draft autosave task failed");
            }
        }));
    }

    /// Drop the pending write, if any. A write that already started finishes.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Write now instead of waiting out the debounce.
    pub fn flush(&mut self, session_id: &str, entries: &[EntryState]) -> Result<()> {
        self.cancel();
        self.drafts.save(session_id, entries)
    }
}

fn save_logged(drafts: &DraftStore, session_id: &str, entries: &[EntryState]) {
    match drafts.save(session_id, entries) {
        Ok(()) => debug!(session_id, entries = entries.len(), "draft saved"),
        Err(err) => warn!(session_id, error = %err, "draft autosave failed"),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::session::entry::Tracking;
    use crate::store::json_store::JsonStore;

    fn make_autosaver() -> (TempDir, Arc<DraftStore>, Autosaver) {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        let drafts = Arc::new(DraftStore::new(store));
        let saver = Autosaver::new(Arc::clone(&drafts), DEFAULT_DEBOUNCE);
        (dir, drafts, saver)
    }

    fn entries(reps: u32) -> Vec<EntryState> {
        vec![EntryState {
            exercise_id: "squat".to_string(),
            display_exercise_id: "squat".to_string(),
            swapped_from: None,
            tracking: Tracking::Simple {
                weight: Some(100.0),
                sets: 3,
                reps,
            },
            note: String::new(),
            completed: false,
            show_note: false,
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrigger_resets_the_timer_and_latest_wins() {
        let (_dir, drafts, mut saver) = make_autosaver();

        saver.schedule("s1", entries(5));
        tokio::time::sleep(Duration::from_millis(300)).await;
        saver.schedule("s1", entries(6));
        tokio::time::sleep(Duration::from_millis(300)).await;
        // 600ms since the first change, 300ms since the last one.
        assert!(drafts.load("s1").is_empty());
        assert!(saver.is_pending());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(drafts.load("s1"), entries(6));
        assert!(!saver.is_pending());
    }

    #[test]
    fn test_schedule_without_runtime_saves_synchronously() {
        let (_dir, drafts, mut saver) = make_autosaver();
        saver.schedule("s1", entries(9));
        assert!(!saver.is_pending());
        assert_eq!(drafts.load("s1"), entries(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_the_pending_write() {
        let (_dir, drafts, mut saver) = make_autosaver();
        saver.schedule("s1", entries(5));
        saver.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(drafts.load("s1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately() {
        let (_dir, drafts, mut saver) = make_autosaver();
        saver.schedule("s1", entries(5));
        saver.flush("s1", &entries(7)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(drafts.load("s1"), entries(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        // A file where the namespace directory should be makes every save fail.
        std::fs::write(dir.path().join("drafts"), "").unwrap();
        let drafts = Arc::new(DraftStore::new(store));
        let mut saver = Autosaver::new(Arc::clone(&drafts), DEFAULT_DEBOUNCE);

        saver.schedule("s1", entries(5));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!saver.is_pending());
        assert!(drafts.load("s1").is_empty());
    }
}
