pub mod progression;
pub mod summary;

pub use progression::ProgressionSuggestion;
pub use summary::SummaryOptions;
