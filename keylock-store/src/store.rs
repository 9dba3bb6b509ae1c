//! Document store abstraction.

use crate::document::{Document, DocumentPage, Precondition};
use crate::error::StoreResult;
use crate::value::Fields;
use async_trait::async_trait;
use std::sync::Arc;

/// Per-entity document store: one document per id inside a named collection.
///
/// Implementations report a missing document as [`StoreError::NotFound`]
/// and keep it distinct from transport failures so callers can tell a
/// definitive answer from an unreachable store.
///
/// [`StoreError::NotFound`]: crate::StoreError::NotFound
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches a single document.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Document>;

    /// Lists one page of a collection.
    async fn list(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> StoreResult<DocumentPage>;

    /// Creates a document with the given id. Fails with `Conflict` if it exists.
    async fn create(&self, collection: &str, id: &str, fields: &Fields) -> StoreResult<Document>;

    /// Writes only the named fields, leaving the others untouched.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
        precondition: Precondition,
    ) -> StoreResult<Document>;

    /// Deletes a document.
    async fn delete(
        &self,
        collection: &str,
        id: &str,
        precondition: Precondition,
    ) -> StoreResult<()>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Document> {
        (**self).get(collection, id).await
    }

    async fn list(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> StoreResult<DocumentPage> {
        (**self).list(collection, page_size, page_token).await
    }

    async fn create(&self, collection: &str, id: &str, fields: &Fields) -> StoreResult<Document> {
        (**self).create(collection, id, fields).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
        precondition: Precondition,
    ) -> StoreResult<Document> {
        (**self).update(collection, id, fields, precondition).await
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        precondition: Precondition,
    ) -> StoreResult<()> {
        (**self).delete(collection, id, precondition).await
    }
}
