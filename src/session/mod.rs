pub mod autosave;
pub mod connectivity;
pub mod entry;
pub mod logger;

pub use logger::{CommitError, CommitOutcome, LoggerContext, SessionLogger};
