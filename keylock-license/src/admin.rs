//! Operator key management: generate, list, ban, extend and delete.

use crate::error::{AdminError, AdminResult};
use crate::generator::{KeyDuration, KeyGenerator};
use crate::key::{Expiry, KeyId, LicenseDocument, field};
use chrono::{Local, NaiveDateTime, TimeDelta, Utc};
use keylock_store::{DocumentStore, Fields, Precondition};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Documents requested per listing page.
pub const LIST_PAGE_SIZE: u32 = 100;

/// Default ledger of issued keys.
pub const GENERATED_KEYS_FILE: &str = "generated_keys.txt";

/// How to extend a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendMode {
    /// Never expires from now on.
    Lifetime,
    AddDays(u32),
}

/// What an extension changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// The activated key now expires at this point.
    ExpiryUpdated(Expiry),
    /// The unactivated key's grant is now this many days.
    DurationIncreased(i64),
}

/// Result of a batch generation.
#[derive(Debug, Default)]
pub struct GenerateReport {
    pub created: Vec<KeyId>,
    pub failed: Vec<(KeyId, AdminError)>,
}

/// Revocation status shown in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Active,
    Banned,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("ACTIVE"),
            Self::Banned => f.write_str("BANNED"),
        }
    }
}

/// One row of the key listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRow {
    pub key: String,
    pub status: KeyStatus,
    /// Expiry date, `Lifetime`, or the remaining grant of an unactivated key.
    /// An unactivated key with an expiry already set shows that instead.
    pub term: String,
    pub hwid: String,
    pub login: String,
    pub activated: bool,
}

impl From<&LicenseDocument> for KeyRow {
    fn from(license: &LicenseDocument) -> Self {
        let status = if license.is_active {
            KeyStatus::Active
        } else {
            KeyStatus::Banned
        };

        match &license.activation {
            Some(activation) => Self {
                key: license.id.clone(),
                status,
                term: match (&activation.expires_at, &activation.expires_at_raw) {
                    (Some(expiry), _) => expiry.short_display(),
                    (None, Some(raw)) => raw.clone(),
                    (None, None) => "-".to_string(),
                },
                hwid: activation.hwid.clone(),
                login: activation.login.clone().unwrap_or_else(|| "-".to_string()),
                activated: true,
            },
            None => Self {
                key: license.id.clone(),
                status,
                term: match &license.pending_expiry {
                    Some(expiry) => format!("{expiry} (not activated)"),
                    None => format!("{} days (not activated)", license.duration_days),
                },
                hwid: "-".to_string(),
                login: "-".to_string(),
                activated: false,
            },
        }
    }
}

/// Key management over a document store.
pub struct KeyAdmin<S> {
    store: S,
    collection: String,
}

impl<S: DocumentStore> KeyAdmin<S> {
    pub fn new(store: S, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Creates `count` unactivated keys. Each key succeeds or fails on its own.
    pub async fn generate(&self, count: u32, duration: KeyDuration) -> GenerateReport {
        let generator = KeyGenerator::new(duration);
        let mut report = GenerateReport::default();

        for new_key in generator.generate(count, Utc::now()) {
            match self
                .store
                .create(&self.collection, new_key.id.as_str(), &new_key.fields)
                .await
            {
                Ok(_) => {
                    debug!("Created key {}-...", new_key.id.short());
                    report.created.push(new_key.id);
                }
                Err(e) => {
                    warn!("Failed to create key {}-...: {}", new_key.id.short(), e);
                    let err = AdminError::from_store(e, new_key.id.as_str());
                    report.failed.push((new_key.id, err));
                }
            }
        }

        info!(
            "Generated {} key(s) for {} ({} failed)",
            report.created.len(),
            duration,
            report.failed.len()
        );
        report
    }

    /// Lists every key, following pagination to the end.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn list(&self) -> AdminResult<Vec<KeyRow>> {
        let mut rows = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .store
                .list(&self.collection, LIST_PAGE_SIZE, page_token.as_deref())
                .await?;

            rows.extend(
                page.documents
                    .iter()
                    .map(|doc| KeyRow::from(&LicenseDocument::from_document(doc))),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Listed {} key(s)", rows.len());
        Ok(rows)
    }

    /// Reads one key.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotFound`] if the key does not exist.
    pub async fn inspect(&self, key: &KeyId) -> AdminResult<LicenseDocument> {
        let doc = self
            .store
            .get(&self.collection, key.as_str())
            .await
            .map_err(|e| AdminError::from_store(e, key.as_str()))?;
        Ok(LicenseDocument::from_document(&doc))
    }

    /// Revokes a key. Banning a banned key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotFound`] if the key does not exist.
    pub async fn ban(&self, key: &KeyId) -> AdminResult<()> {
        let fields = Fields::new().with(field::IS_ACTIVE, false);
        self.store
            .update(
                &self.collection,
                key.as_str(),
                &fields,
                Precondition::Exists(true),
            )
            .await
            .map_err(|e| AdminError::from_store(e, key.as_str()))?;

        info!("Banned key {}-...", key.short());
        Ok(())
    }

    /// Extends a key as of the current local time.
    pub async fn extend(
        &self,
        key: &KeyId,
        mode: ExtendMode,
        confirm_downgrade: bool,
    ) -> AdminResult<ExtendOutcome> {
        self.extend_at(key, mode, confirm_downgrade, Local::now().naive_local())
            .await
    }

    /// Extends a key as of `now`.
    ///
    /// - `Lifetime` sets `expires_at` to the lifetime sentinel.
    /// - `AddDays` on an activated key moves its expiry; a lifetime key is
    ///   only replaced by `now + days` with `confirm_downgrade`.
    /// - `AddDays` on an unactivated key raises `duration_days`.
    ///
    /// The write is conditional on the revision that was read.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotFound`] for a missing key,
    /// [`AdminError::LifetimeDowngradeNeedsConfirmation`] for an unconfirmed
    /// downgrade and [`AdminError::Concurrent`] if the key changed meanwhile.
    pub async fn extend_at(
        &self,
        key: &KeyId,
        mode: ExtendMode,
        confirm_downgrade: bool,
        now: NaiveDateTime,
    ) -> AdminResult<ExtendOutcome> {
        let license = self.inspect(key).await?;

        let (fields, outcome) = match (mode, &license.activation) {
            (ExtendMode::Lifetime, _) => (
                Fields::new().with(field::EXPIRES_AT, Expiry::Lifetime.to_value()),
                ExtendOutcome::ExpiryUpdated(Expiry::Lifetime),
            ),
            (ExtendMode::AddDays(days), None) => {
                let total = license.duration_days + i64::from(days);
                (
                    Fields::new().with(field::DURATION_DAYS, total),
                    ExtendOutcome::DurationIncreased(total),
                )
            }
            (ExtendMode::AddDays(days), Some(activation)) => {
                let base = match activation.expires_at {
                    Some(Expiry::Timed(at)) => at,
                    Some(Expiry::Lifetime) if !confirm_downgrade => {
                        return Err(AdminError::LifetimeDowngradeNeedsConfirmation(
                            key.to_string(),
                        ));
                    }
                    Some(Expiry::Lifetime) | None => now,
                };
                let expiry = base
                    .checked_add_signed(TimeDelta::days(i64::from(days)))
                    .map(Expiry::Timed)
                    .ok_or(AdminError::OutOfRange(days))?;
                (
                    Fields::new().with(field::EXPIRES_AT, expiry.to_value()),
                    ExtendOutcome::ExpiryUpdated(expiry),
                )
            }
        };

        let precondition = match license.update_time {
            Some(revision) => Precondition::UpdateTime(revision),
            None => Precondition::Exists(true),
        };
        self.store
            .update(&self.collection, key.as_str(), &fields, precondition)
            .await
            .map_err(|e| AdminError::from_store(e, key.as_str()))?;

        info!("Extended key {}-...: {:?}", key.short(), outcome);
        Ok(outcome)
    }

    /// Deletes keys one by one; a failure does not stop the rest.
    pub async fn delete(&self, keys: &[KeyId]) -> Vec<(KeyId, AdminResult<()>)> {
        let mut results = Vec::with_capacity(keys.len());

        for key in keys {
            let result = self
                .store
                .delete(&self.collection, key.as_str(), Precondition::Exists(true))
                .await
                .map_err(|e| AdminError::from_store(e, key.as_str()));

            match &result {
                Ok(()) => info!("Deleted key {}-...", key.short()),
                Err(e) => warn!("Failed to delete key {}-...: {}", key.short(), e),
            }
            results.push((key.clone(), result));
        }

        results
    }
}

/// Appends issued keys to a local ledger, one per line.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be opened or written.
pub fn record_generated(path: &Path, keys: &[KeyId]) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for key in keys {
        writeln!(file, "{key}")?;
    }
    Ok(())
}
