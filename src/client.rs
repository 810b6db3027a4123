//! HTTP client for a remote diagram store.
//!
//! Requires the `client` feature. Speaks the routes served by
//! `http::router` and maps error statuses back onto `StoreError`, so a
//! `MutationCoordinator` behaves the same over the network as it does over
//! a local `DiagramStore`.
//!
//! ## Example
//!
//! ```ignore
//! use diagram_ledger::{HttpDiagramClient, MutationCoordinator};
//!
//! let client = HttpDiagramClient::new("http://localhost:8080");
//! let coordinator = MutationCoordinator::new(client);
//! let tables = coordinator.list_tables("d1").await?;
//! ```

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::coordinator::DiagramSource;
use crate::diagram::Payload;
use crate::error::StoreError;

/// `DiagramSource` backed by the HTTP surface.
#[derive(Clone, Debug)]
pub struct HttpDiagramClient {
    base_url: String,
    client: Client,
}

impl HttpDiagramClient {
    /// `base_url` is the server root, e.g. `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn diagrams_url(&self) -> String {
        format!("{}/api/diagrams", self.base_url)
    }

    /// `.../api/diagrams/{id}` with the id escaped as a single segment.
    fn diagram_url(&self, diagram_id: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.diagrams_url())
            .map_err(|e| StoreError::internal(format!("invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::internal("base url cannot carry a path"))?
            .push(diagram_id);
        Ok(url)
    }
}

fn transport(err: reqwest::Error) -> StoreError {
    StoreError::internal(format!("http: {}", err))
}

/// Decode a success body, or turn an error status into the matching
/// `StoreError` using the server's `{"error": ...}` message.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| StoreError::internal(format!("decode response: {}", e)));
    }
    Err(error_from(response).await)
}

async fn error_from(response: Response) -> StoreError {
    let status = response.status();
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    StoreError::from_status(status.as_u16(), message)
}

#[async_trait]
impl DiagramSource for HttpDiagramClient {
    async fn get(&self, diagram_id: &str) -> Result<Payload, StoreError> {
        let response = self
            .client
            .get(self.diagram_url(diagram_id)?)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn create(&self, payload: Payload) -> Result<Payload, StoreError> {
        let response = self
            .client
            .post(self.diagrams_url())
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn replace(&self, diagram_id: &str, payload: Payload) -> Result<Payload, StoreError> {
        let response = self
            .client
            .put(self.diagram_url(diagram_id)?)
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn delete(&self, diagram_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.diagram_url(diagram_id)?)
            .send()
            .await
            .map_err(transport)?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(error_from(response).await)
    }

    async fn list_full(&self) -> Result<Vec<Payload>, StoreError> {
        let response = self
            .client
            .get(format!("{}?full=1", self.diagrams_url()))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}
