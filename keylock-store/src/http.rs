//! HTTP document store.
//!
//! Talks to a REST document endpoint laid out as
//! `{base_url}/{collection}/{id}`, Firestore style.

use crate::document::{Document, DocumentPage, Precondition};
use crate::error::{StoreError, StoreResult};
use crate::store::DocumentStore;
use crate::value::Fields;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Root of the public Firestore REST API.
pub const FIRESTORE_API_BASE: &str = "https://firestore.googleapis.com/v1";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Connection settings for [`HttpDocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Documents root, e.g.
    /// `https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents`.
    pub base_url: String,
    /// API key sent as the `key` query parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Upper bound for a single request, connect through body.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: format!("{FIRESTORE_API_BASE}/projects/-/databases/(default)/documents"),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl StoreConfig {
    /// Config for the default database of a Firestore project.
    #[must_use]
    pub fn firestore(project_id: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: format!(
                "{FIRESTORE_API_BASE}/projects/{project_id}/databases/(default)/documents"
            ),
            api_key,
            ..Self::default()
        }
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Serialize)]
struct WriteBody<'a> {
    fields: &'a Fields,
}

/// Document store backed by a REST endpoint.
pub struct HttpDocumentStore {
    config: StoreConfig,
    client: Client,
}

impl HttpDocumentStore {
    /// Creates a store client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the HTTP client cannot be built.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StoreError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(collection)
        )
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(collection),
            urlencoding::encode(id)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.query(&[("key", key.as_str())]),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> StoreResult<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(StoreError::from_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!("{} failed with {}: {}", what, status, body);
        Err(status_error(status, body, what))
    }
}

fn status_error(status: StatusCode, body: String, what: &str) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(what.to_string()),
        StatusCode::CONFLICT => StoreError::Conflict(what.to_string()),
        StatusCode::PRECONDITION_FAILED => StoreError::PreconditionFailed(what.to_string()),
        StatusCode::BAD_REQUEST if body.contains("FAILED_PRECONDITION") => {
            StoreError::PreconditionFailed(what.to_string())
        }
        _ => StoreError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> StoreResult<T> {
    response
        .json()
        .await
        .map_err(|e| StoreError::Decode(e.to_string()))
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Document> {
        let what = format!("{collection}/{id}");
        debug!("GET {}", what);

        let request = self.client.get(self.document_url(collection, id));
        let response = self.send(request, &what).await?;
        decode(response).await
    }

    async fn list(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> StoreResult<DocumentPage> {
        debug!("LIST {} (page size {})", collection, page_size);

        let mut request = self
            .client
            .get(self.collection_url(collection))
            .query(&[("pageSize", page_size.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = self.send(request, collection).await?;
        decode(response).await
    }

    async fn create(&self, collection: &str, id: &str, fields: &Fields) -> StoreResult<Document> {
        let what = format!("{collection}/{id}");
        debug!("POST {}", what);

        let request = self
            .client
            .post(self.collection_url(collection))
            .query(&[("documentId", id)])
            .json(&WriteBody { fields });
        let response = self.send(request, &what).await?;
        decode(response).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
        precondition: Precondition,
    ) -> StoreResult<Document> {
        let what = format!("{collection}/{id}");
        debug!("PATCH {} ({} fields)", what, fields.len());

        let mask: Vec<(&str, &str)> = fields
            .names()
            .map(|name| ("updateMask.fieldPaths", name))
            .collect();

        let mut request = self
            .client
            .patch(self.document_url(collection, id))
            .query(&mask)
            .json(&WriteBody { fields });
        if let Some(param) = precondition.query_param() {
            request = request.query(&[param]);
        }

        let response = self.send(request, &what).await?;
        decode(response).await
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        precondition: Precondition,
    ) -> StoreResult<()> {
        let what = format!("{collection}/{id}");
        debug!("DELETE {}", what);

        let mut request = self.client.delete(self.document_url(collection, id));
        if let Some(param) = precondition.query_param() {
            request = request.query(&[param]);
        }

        self.send(request, &what).await?;
        Ok(())
    }
}
