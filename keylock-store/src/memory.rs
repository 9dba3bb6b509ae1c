//! In-process document store.
//!
//! Mirrors the HTTP store's semantics (not-found, create conflicts, field
//! masks, revision preconditions) without a network. Clones share the same
//! underlying data, so several clients can race on one store.

use crate::document::{Document, DocumentPage, Precondition};
use crate::error::{StoreError, StoreResult};
use crate::store::DocumentStore;
use crate::value::Fields;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, BTreeMap<String, Document>>,
    last_revision: Option<DateTime<Utc>>,
}

impl State {
    /// Returns a revision strictly later than any handed out before.
    fn next_revision(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let revision = match self.last_revision {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last_revision = Some(revision);
        revision
    }
}

/// Document store held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<RwLock<State>>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if the collection holds no documents.
    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }
}

fn check_precondition(
    existing: Option<&Document>,
    precondition: Precondition,
    what: &str,
) -> StoreResult<()> {
    match precondition {
        Precondition::None => Ok(()),
        Precondition::Exists(true) if existing.is_none() => {
            Err(StoreError::NotFound(what.to_string()))
        }
        Precondition::Exists(false) if existing.is_some() => {
            Err(StoreError::Conflict(what.to_string()))
        }
        Precondition::Exists(_) => Ok(()),
        Precondition::UpdateTime(expected) => match existing.and_then(|d| d.update_time) {
            Some(actual) if actual == expected => Ok(()),
            _ => Err(StoreError::PreconditionFailed(what.to_string())),
        },
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Document> {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{collection}/{id}")))
    }

    async fn list(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> StoreResult<DocumentPage> {
        let state = self.state.read().await;
        let Some(docs) = state.collections.get(collection) else {
            return Ok(DocumentPage::default());
        };

        let page_size = page_size.max(1) as usize;
        let mut remaining = docs
            .iter()
            .filter(|(id, _)| page_token.is_none_or(|token| id.as_str() > token));

        let documents: Vec<Document> = remaining
            .by_ref()
            .take(page_size)
            .map(|(_, doc)| doc.clone())
            .collect();
        let next_page_token = match remaining.next() {
            Some(_) => documents.last().map(|d| d.id().to_string()),
            None => None,
        };

        Ok(DocumentPage {
            documents,
            next_page_token,
        })
    }

    async fn create(&self, collection: &str, id: &str, fields: &Fields) -> StoreResult<Document> {
        let mut state = self.state.write().await;
        let what = format!("{collection}/{id}");
        let exists = state
            .collections
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id));
        if exists {
            return Err(StoreError::Conflict(what));
        }

        let revision = state.next_revision();
        let doc = Document {
            name: format!("{collection}/{id}"),
            fields: fields.clone(),
            create_time: Some(revision),
            update_time: Some(revision),
        };
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc.clone());
        Ok(doc)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
        precondition: Precondition,
    ) -> StoreResult<Document> {
        let mut state = self.state.write().await;
        let what = format!("{collection}/{id}");
        let existing = state.collections.get(collection).and_then(|d| d.get(id));
        check_precondition(existing, precondition, &what)?;

        let mut doc = existing.cloned().unwrap_or_else(|| Document {
            name: what.clone(),
            ..Document::default()
        });
        let revision = state.next_revision();
        doc.fields.merge(fields);
        doc.create_time.get_or_insert(revision);
        doc.update_time = Some(revision);

        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc.clone());
        Ok(doc)
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        precondition: Precondition,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let what = format!("{collection}/{id}");
        let existing = state.collections.get(collection).and_then(|d| d.get(id));
        check_precondition(existing, precondition, &what)?;

        if let Some(docs) = state.collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }
}
