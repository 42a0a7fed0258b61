pub mod draft;
pub mod json_store;
pub mod queue;
pub mod schema;
