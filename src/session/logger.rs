use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{self, Exercise};
use crate::config::Config;
use crate::engine::progression::ProgressionSuggestion;
use crate::engine::summary::SummaryOptions;
use crate::remote::{RemoteError, RemoteStore};
use crate::session::autosave::{Autosaver, DEFAULT_DEBOUNCE};
use crate::session::connectivity::ConnectivityMonitor;
use crate::session::entry::{EntryPatch, EntryState, SetPatch};
use crate::store::draft::DraftStore;
use crate::store::queue::{MutationQueue, NewMutation};
use crate::store::schema::{ENTRIES_TABLE, EntryRow, FinishedSession, SESSIONS_TABLE, SessionRow};

/// Collaborators handed to a logger at construction.
#[derive(Clone)]
pub struct LoggerContext {
    pub user_id: String,
    pub remote: Arc<dyn RemoteStore>,
    pub queue: Arc<MutationQueue>,
    pub drafts: Arc<DraftStore>,
    pub connectivity: ConnectivityMonitor,
    pub autosave_delay: Duration,
}

impl LoggerContext {
    pub fn new(
        user_id: &str,
        remote: Arc<dyn RemoteStore>,
        queue: Arc<MutationQueue>,
        drafts: Arc<DraftStore>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            remote,
            queue,
            drafts,
            connectivity,
            autosave_delay: DEFAULT_DEBOUNCE,
        }
    }

    /// Identity and debounce come from the user's config file.
    pub fn from_config(
        config: &Config,
        remote: Arc<dyn RemoteStore>,
        queue: Arc<MutationQueue>,
        drafts: Arc<DraftStore>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self::new(&config.user_id, remote, queue, drafts, connectivity)
            .with_autosave_delay(config.autosave_delay())
    }

    pub fn with_autosave_delay(mut self, delay: Duration) -> Self {
        self.autosave_delay = delay;
        self
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("remote store rejected the commit: {0}")]
    Remote(#[from] RemoteError),
    #[error("could not queue the commit: {0:#}")]
    Queue(anyhow::Error),
    #[error("could not encode entries: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Written to the remote store.
    Committed,
    /// Offline: captured as two queued mutations for the next reconnect.
    Queued,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

/// Most recent completed row for `exercise_id`; on equal or missing
/// timestamps the earlier row in `previous` wins.
fn latest_completed<'a>(previous: &'a [EntryRow], exercise_id: &str) -> Option<&'a EntryRow> {
    previous
        .iter()
        .filter(|row| row.completed && row.exercise_id == exercise_id)
        .fold(None, |best: Option<&EntryRow>, row| match best {
            Some(current) if row.created_at <= current.created_at => Some(current),
            _ => Some(row),
        })
}

/// One entry per visible exercise, in catalog order. An exercise is visible
/// when it shows by default or already has a committed row this session.
/// Committed rows win over the previous session, which wins over defaults.
fn initial_entries(
    catalog: &[Exercise],
    previous: &[EntryRow],
    existing: &[EntryRow],
) -> Vec<EntryState> {
    catalog
        .iter()
        .filter_map(|exercise| {
            let committed = existing
                .iter()
                .find(|row| row.origin_exercise_id() == exercise.id);
            match committed {
                Some(row) => Some(EntryState::from_committed(&exercise.id, row)),
                None if exercise.show_by_default => Some(EntryState::seeded(
                    exercise,
                    latest_completed(previous, &exercise.id),
                )),
                None => None,
            }
        })
        .collect()
}

/// In-memory state of every exercise tracked in the active session.
///
/// Every mutating call reschedules a debounced draft write. Calls naming an
/// exercise that is not tracked, and edits that would break an invariant,
/// are refused and return `false`.
pub struct SessionLogger {
    session: SessionRow,
    catalog: Vec<Exercise>,
    entries: Vec<EntryState>,
    ctx: LoggerContext,
    autosave: Autosaver,
}

impl SessionLogger {
    /// Build entries from committed rows of this session, the latest
    /// completed rows of earlier sessions, and catalog defaults.
    pub fn start(
        session: SessionRow,
        catalog: Vec<Exercise>,
        previous: &[EntryRow],
        existing: &[EntryRow],
        ctx: LoggerContext,
    ) -> Self {
        let catalog = catalog::sorted(catalog);
        let entries = initial_entries(&catalog, previous, existing);
        Self::with_entries(session, catalog, entries, ctx)
    }

    /// Like [`Self::start`], but a saved draft for this session takes
    /// precedence so an interrupted session resumes where it left off.
    pub fn resume(
        session: SessionRow,
        catalog: Vec<Exercise>,
        previous: &[EntryRow],
        existing: &[EntryRow],
        ctx: LoggerContext,
    ) -> Self {
        let draft = ctx.drafts.load(&session.id);
        if draft.is_empty() {
            return Self::start(session, catalog, previous, existing, ctx);
        }
        info!(session_id = %session.id, entries = draft.len(), "resuming from draft");
        Self::with_entries(session, catalog::sorted(catalog), draft, ctx)
    }

    fn with_entries(
        session: SessionRow,
        catalog: Vec<Exercise>,
        entries: Vec<EntryState>,
        ctx: LoggerContext,
    ) -> Self {
        let autosave = Autosaver::new(Arc::clone(&ctx.drafts), ctx.autosave_delay);
        Self {
            session,
            catalog,
            entries,
            ctx,
            autosave,
        }
    }

    pub fn session(&self) -> &SessionRow {
        &self.session
    }

    pub fn entries(&self) -> &[EntryState] {
        &self.entries
    }

    pub fn entry(&self, exercise_id: &str) -> Option<&EntryState> {
        self.entries.iter().find(|e| e.exercise_id == exercise_id)
    }

    pub fn catalog(&self) -> &[Exercise] {
        &self.catalog
    }

    /// The exercise an entry currently shows, after any swap.
    pub fn display_exercise(&self, entry: &EntryState) -> Option<&Exercise> {
        catalog::find(&self.catalog, &entry.display_exercise_id)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.entries.iter().filter(|e| e.completed).count(),
            total: self.entries.len(),
        }
    }

    pub fn autosave_pending(&self) -> bool {
        self.autosave.is_pending()
    }

    /// Catalog exercises neither tracked nor shown through a swap, for ad-hoc
    /// additions.
    pub fn addable_exercises(&self) -> Vec<&Exercise> {
        self.catalog
            .iter()
            .filter(|exercise| {
                !self.entries.iter().any(|e| {
                    e.exercise_id == exercise.id || e.display_exercise_id == exercise.id
                })
            })
            .collect()
    }

    /// Swap targets for an entry: everything but the exercise it shows now,
    /// filtered by a case-insensitive name match.
    pub fn swap_candidates(&self, exercise_id: &str, query: &str) -> Vec<&Exercise> {
        let Some(entry) = self.entry(exercise_id) else {
            return Vec::new();
        };
        let query = query.to_lowercase();
        self.catalog
            .iter()
            .filter(|exercise| exercise.id != entry.display_exercise_id)
            .filter(|exercise| query.is_empty() || exercise.name.to_lowercase().contains(&query))
            .collect()
    }

    fn edit(&mut self, exercise_id: &str, change: impl FnOnce(&mut EntryState) -> bool) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.exercise_id == exercise_id) else {
            return false;
        };
        if !change(entry) {
            return false;
        }
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.autosave.schedule(&self.session.id, self.entries.clone());
    }

    pub fn update(&mut self, exercise_id: &str, patch: &EntryPatch) -> bool {
        self.edit(exercise_id, |entry| {
            entry.apply(patch);
            true
        })
    }

    pub fn toggle_mode(&mut self, exercise_id: &str) -> bool {
        self.edit(exercise_id, |entry| {
            entry.toggle_mode();
            true
        })
    }

    pub fn add_set(&mut self, exercise_id: &str) -> bool {
        self.edit(exercise_id, |entry| entry.tracking.push_set())
    }

    /// `index` is the 0-based position in the set list.
    pub fn remove_set(&mut self, exercise_id: &str, index: usize) -> bool {
        self.edit(exercise_id, |entry| entry.tracking.remove_set(index))
    }

    pub fn update_set(&mut self, exercise_id: &str, index: usize, patch: &SetPatch) -> bool {
        self.edit(exercise_id, |entry| entry.tracking.update_set(index, patch))
    }

    pub fn swap(&mut self, exercise_id: &str, replacement: &Exercise) -> bool {
        let swapped = self.edit(exercise_id, |entry| {
            entry.swap_to(replacement);
            true
        });
        if swapped {
            self.remember(replacement);
        }
        swapped
    }

    /// Track an exercise that was not shown at session start. Refused when
    /// it is already tracked.
    pub fn add_exercise(&mut self, exercise: &Exercise) -> bool {
        if self.entry(&exercise.id).is_some() {
            return false;
        }
        self.remember(exercise);
        self.entries.push(EntryState::from_defaults(exercise));
        self.touch();
        true
    }

    fn remember(&mut self, exercise: &Exercise) {
        if catalog::find(&self.catalog, &exercise.id).is_none() {
            self.catalog.push(exercise.clone());
        }
    }

    /// Write the draft immediately, e.g. before the host suspends. The
    /// session row is stored alongside so the draft can be listed later.
    pub fn save_draft(&mut self) -> anyhow::Result<()> {
        self.ctx.drafts.save_session(&self.session)?;
        self.autosave.flush(&self.session.id, &self.entries)
    }

    /// Rows as the remote store receives them on commit.
    pub fn entry_rows(&self) -> Vec<EntryRow> {
        self.entries
            .iter()
            .map(|entry| entry.to_row(&self.session.id, &self.ctx.user_id))
            .collect()
    }

    /// Write every entry and mark the session finished. Online this replaces
    /// the session's rows remotely and clears the draft; offline both writes
    /// are queued as independent mutations. On error nothing local changes
    /// and the caller may retry.
    pub async fn commit(&mut self) -> Result<CommitOutcome, CommitError> {
        let rows = self.entry_rows();
        let finished_at = Utc::now();
        let outcome = if self.ctx.connectivity.is_online() {
            self.commit_online(rows, finished_at).await?;
            self.autosave.cancel();
            if let Err(err) = self.ctx.drafts.clear(&self.session.id) {
                warn!(session_id = %self.session.id, error = %err, "could not clear draft");
            }
            CommitOutcome::Committed
        } else {
            self.commit_offline(rows, finished_at).await?;
            CommitOutcome::Queued
        };
        self.session.finished_at = Some(finished_at);
        info!(
            session_id = %self.session.id,
            entries = self.entries.len(),
            outcome = ?outcome,
            "session committed"
        );
        Ok(outcome)
    }

    async fn commit_online(
        &self,
        rows: Vec<EntryRow>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), CommitError> {
        let rows = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let remote = self.ctx.remote.as_ref();
        remote
            .replace_where(ENTRIES_TABLE, "session_id", &self.session.id, rows)
            .await?;
        remote
            .update(
                SESSIONS_TABLE,
                &self.session.id,
                json!({ "finished_at": finished_at }),
            )
            .await?;
        Ok(())
    }

    async fn commit_offline(
        &self,
        rows: Vec<EntryRow>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), CommitError> {
        let entries = NewMutation::insert(ENTRIES_TABLE, serde_json::to_value(&rows)?)
            .replacing("session_id", &self.session.id);
        let finish = NewMutation::update(
            SESSIONS_TABLE,
            json!({ "id": self.session.id, "finished_at": finished_at }),
        );
        let queue = &self.ctx.queue;
        queue.enqueue(entries).await.map_err(CommitError::Queue)?;
        queue.enqueue(finish).await.map_err(CommitError::Queue)?;
        Ok(())
    }

    /// The committed view consumed by the share text and progression.
    pub fn finished(&self, workout_type_name: &str) -> FinishedSession {
        FinishedSession {
            workout_type_name: workout_type_name.to_string(),
            exercises: self.catalog.clone(),
            entries: self.entry_rows(),
        }
    }

    pub fn summary(&self, workout_type_name: &str, options: SummaryOptions) -> String {
        self.finished(workout_type_name).summary(options)
    }

    pub fn suggestions(&self, microloading: bool) -> Vec<ProgressionSuggestion> {
        self.finished("").suggestions(microloading)
    }
}
