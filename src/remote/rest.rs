use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use super::{RemoteError, RemoteStore};

/// PostgREST-style HTTP backend: `/rest/v1/{table}` with `column=eq.value`
/// filters.
pub struct RestRemote {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestRemote {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: Method, table: &str, filter: Option<(&str, &str)>) -> RequestBuilder {
        let url = format!("{}/rest/v1/{table}", self.base_url);
        let mut builder = self
            .client
            .request(method, url)
            .header("Prefer", "return=minimal");
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key).bearer_auth(key);
        }
        if let Some((column, value)) = filter {
            builder = builder.query(&[(column, format!("eq.{value}"))]);
        }
        builder
    }

    async fn send(&self, table: &str, builder: RequestBuilder) -> Result<(), RemoteError> {
        let response = builder.send().await.map_err(|err| {
            if err.is_connect() || err.is_timeout() {
                RemoteError::Unavailable
            } else {
                RemoteError::Transport(err.to_string())
            }
        })?;
        let status = response.status();
        debug!(table, status = status.as_u16(), "remote response");
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            table: table.to_string(),
            status: Some(status.as_u16()),
            message,
        })
    }
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::POST, table, None)
            .json(&Value::Array(rows));
        self.send(table, builder).await
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::PATCH, table, Some(("id", id)))
            .json(&patch);
        self.send(table, builder).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        let builder = self.request(Method::DELETE, table, Some(("id", id)));
        self.send(table, builder).await
    }

    async fn delete_where(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<(), RemoteError> {
        let builder = self.request(Method::DELETE, table, Some((column, value)));
        self.send(table, builder).await
    }
}
