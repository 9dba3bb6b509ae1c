//! Shared test helpers for license tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use keylock_license::{ClientConfig, DeviceId, LicenseClient, SessionCache, field};
use keylock_store::{
    Document, DocumentPage, DocumentStore, Fields, MemoryDocumentStore, Precondition, StoreError,
    StoreResult,
};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const KEY: &str = "AB12-CD34-EF56-0078";
pub const COLLECTION: &str = "keys";

/// Local wall-clock time on the given day.
pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Fixed "now" used by most tests.
pub fn now() -> NaiveDateTime {
    at(2026, 3, 1, 10, 0)
}

/// Seeds an unactivated key with the given grant.
pub async fn seed_unactivated(store: &MemoryDocumentStore, key: &str, days: i64) {
    let fields = Fields::new()
        .with(field::DURATION_DAYS, days)
        .with(field::IS_ACTIVE, true)
        .with(field::HWID, keylock_store::Value::Null);
    store.create(COLLECTION, key, &fields).await.unwrap();
}

/// Seeds a key already activated by `hwid` for `bob`/`x`.
pub async fn seed_activated(store: &MemoryDocumentStore, key: &str, hwid: &str, expires_at: &str) {
    let fields = Fields::new()
        .with(field::DURATION_DAYS, 7i64)
        .with(field::IS_ACTIVE, true)
        .with(field::HWID, hwid)
        .with(field::LOGIN, "bob")
        .with(field::PASSWORD, "x")
        .with(field::ACTIVATED_AT, "2026-01-01T09:00:00")
        .with(field::EXPIRES_AT, expires_at);
    store.create(COLLECTION, key, &fields).await.unwrap();
}

pub async fn fields_of(store: &MemoryDocumentStore, key: &str) -> Fields {
    store.get(COLLECTION, key).await.unwrap().fields
}

/// Session cache inside a temp directory.
pub fn cache_in(dir: &Path) -> SessionCache {
    SessionCache::at(dir.join("MoneyTracker").join("auth_session.json"))
}

/// Client config with a short watchdog so hung calls fail fast.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout: Duration::from_millis(200),
        ..ClientConfig::default()
    }
}

pub fn client_for<S: DocumentStore>(store: S, dir: &Path, hwid: &str) -> LicenseClient<S> {
    LicenseClient::with_device(store, cache_in(dir), test_config(), DeviceId::new(hwid))
}

/// Failure injected by [`FlakyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Transport error.
    Network,
    /// Non-404 error status.
    Unavailable,
    /// 200 with a body that does not decode.
    Garbage,
    /// Never answers.
    Hang,
}

impl Failure {
    async fn raise<T>(self) -> StoreResult<T> {
        match self {
            Self::Network => Err(StoreError::Network("connection refused".into())),
            Self::Unavailable => Err(StoreError::Status {
                status: 503,
                body: "unavailable".into(),
            }),
            Self::Garbage => Err(StoreError::Decode("expected value at line 1".into())),
            Self::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(StoreError::Timeout)
            }
        }
    }
}

/// Memory store with injectable failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryDocumentStore,
    get_failure: Mutex<Option<Failure>>,
    /// Number of upcoming updates that fail.
    failing_updates: AtomicUsize,
    /// Number of upcoming creates that hit an existing id.
    conflicting_creates: AtomicUsize,
    /// Fields written by another device just before the next update.
    interloper: Mutex<Option<Fields>>,
}

impl FlakyStore {
    pub fn new(inner: MemoryDocumentStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_gets(&self, failure: Failure) {
        *self.get_failure.lock().unwrap() = Some(failure);
    }

    pub fn heal(&self) {
        *self.get_failure.lock().unwrap() = None;
        self.failing_updates.store(0, Ordering::SeqCst);
    }

    pub fn fail_next_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    pub fn conflict_next_creates(&self, count: usize) {
        self.conflicting_creates.store(count, Ordering::SeqCst);
    }

    /// Makes another writer win the race for the next update.
    pub fn interleave_write(&self, fields: Fields) {
        *self.interloper.lock().unwrap() = Some(fields);
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Document> {
        let failure = *self.get_failure.lock().unwrap();
        match failure {
            Some(failure) => failure.raise().await,
            None => self.inner.get(collection, id).await,
        }
    }

    async fn list(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> StoreResult<DocumentPage> {
        self.inner.list(collection, page_size, page_token).await
    }

    async fn create(&self, collection: &str, id: &str, fields: &Fields) -> StoreResult<Document> {
        let remaining = self.conflicting_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicting_creates.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict(format!("{collection}/{id}")));
        }
        self.inner.create(collection, id, fields).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
        precondition: Precondition,
    ) -> StoreResult<Document> {
        let remaining = self.failing_updates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_updates.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Status {
                status: 500,
                body: "internal".into(),
            });
        }

        let interloper = self.interloper.lock().unwrap().take();
        if let Some(other) = interloper {
            self.inner
                .update(collection, id, &other, Precondition::None)
                .await?;
        }

        self.inner.update(collection, id, fields, precondition).await
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        precondition: Precondition,
    ) -> StoreResult<()> {
        self.inner.delete(collection, id, precondition).await
    }
}
