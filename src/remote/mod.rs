pub mod memory;
#[cfg(feature = "network")]
pub mod rest;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryRemote;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    #[error("{table}: request rejected ({}): {message}", status_label(.status))]
    Rejected {
        table: String,
        status: Option<u16>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote store unavailable")]
    Unavailable,
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "no status".to_string(), |code| format!("HTTP {code}"))
}

/// The opaque backend, reachable by table name. Rows are plain JSON objects;
/// updates and deletes address a row by its `id` column.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), RemoteError>;

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<(), RemoteError>;

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError>;

    async fn delete_where(&self, table: &str, column: &str, value: &str)
    -> Result<(), RemoteError>;

    /// Make `table` hold exactly `rows` for `column = value`.
    async fn replace_where(
        &self,
        table: &str,
        column: &str,
        value: &str,
        rows: Vec<Value>,
    ) -> Result<(), RemoteError> {
        self.delete_where(table, column, value).await?;
        if rows.is_empty() {
            return Ok(());
        }
        self.insert(table, rows).await
    }
}
