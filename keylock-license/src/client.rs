//! Client-side license validation.
//!
//! [`LicenseClient::validate`] drives one pass of the state machine:
//!
//! 1. fetch the key document; a 404 is final
//! 2. if the store cannot be reached, fall back to the offline grace period
//! 3. reject banned keys
//! 4. for an activated key, check device, credentials and expiry
//! 5. for an unactivated key, bind it to this device with a conditional write
//!
//! Every online success refreshes the local session cache. The offline path
//! reads that cache but never refreshes it, so the grace window cannot slide.

use crate::device::{DeviceId, DeviceInfo};
use crate::error::LicenseError;
use crate::key::{Activation, Expiry, KeyId, LicenseDocument};
use crate::session::SessionCache;
use chrono::{Local, NaiveDateTime, TimeDelta};
use keylock_store::{Document, DocumentStore, Precondition, StoreError};
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default offline grace period in hours.
pub const GRACE_PERIOD_HOURS: i64 = 24;

/// Default watchdog for a single store call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch/activate rounds before giving up on a contended key.
const ACTIVATION_ATTEMPTS: usize = 2;

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Collection holding key documents.
    pub collection: String,
    /// Upper bound for one store call; elapsing counts as unreachable.
    pub request_timeout: Duration,
    /// How long a cached session is honoured while offline.
    pub grace_period: TimeDelta,
    /// When false, an unreachable store fails with `NetworkUnavailable`.
    pub offline_grace: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            collection: "keys".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            grace_period: TimeDelta::hours(GRACE_PERIOD_HOURS),
            offline_grace: true,
        }
    }
}

/// What the user typed into the login form.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
    pub key: String,
}

impl Credentials {
    #[must_use]
    pub fn new(
        login: impl Into<String>,
        password: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            key: key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("key", &self.key)
            .finish()
    }
}

/// An authenticated session, owned by the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub login: String,
    pub password: String,
    pub key: KeyId,
}

impl ActiveSession {
    fn new(key: &KeyId, credentials: &Credentials) -> Self {
        Self {
            login: credentials.login.clone(),
            password: credentials.password.clone(),
            key: key.clone(),
        }
    }

    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.login, &self.password, self.key.as_str())
    }
}

impl fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSession")
            .field("login", &self.login)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// How the session was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Already bound to this device.
    Online,
    /// Bound to this device by this validation.
    Activated,
    /// Store unreachable; honoured from the session cache.
    Offline,
}

/// Expiry as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryDisplay {
    Until(Expiry),
    /// Stored text, shown verbatim.
    Stored(String),
    Offline { hours: i64 },
}

impl fmt::Display for ExpiryDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Until(expiry) => write!(f, "{expiry}"),
            Self::Stored(text) => f.write_str(text),
            Self::Offline { hours } => write!(f, "Offline ({hours}h)"),
        }
    }
}

/// A successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub session: ActiveSession,
    pub expiry: ExpiryDisplay,
    pub mode: AuthMode,
}

/// Outcome of one validation.
pub type Validation = Result<Authorized, LicenseError>;

/// Caller-facing summary of a [`Validation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub success: bool,
    /// Shown to the user verbatim.
    pub message: String,
    pub expiry_display: Option<String>,
}

impl From<&Validation> for ValidationReport {
    fn from(validation: &Validation) -> Self {
        match validation {
            Ok(authorized) => Self {
                success: true,
                message: match authorized.mode {
                    AuthMode::Online => "Authorized".to_string(),
                    AuthMode::Activated => "License activated".to_string(),
                    AuthMode::Offline => "Offline mode: license server unreachable".to_string(),
                },
                expiry_display: Some(authorized.expiry.to_string()),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
                expiry_display: None,
            },
        }
    }
}

enum FetchFailure {
    Missing,
    Unreachable(String),
    Unexpected(String),
}

enum ActivationFailure {
    /// Someone else wrote the document since it was read.
    Raced,
    Failed(LicenseError),
}

/// Validates license keys against the document store.
pub struct LicenseClient<S> {
    store: S,
    cache: SessionCache,
    device: DeviceId,
    config: ClientConfig,
}

impl<S: DocumentStore> LicenseClient<S> {
    /// Creates a client bound to this machine's [`DeviceId`].
    pub fn new(store: S, cache: SessionCache, config: ClientConfig) -> Self {
        debug!("Device: {:?}", DeviceInfo::collect());
        Self::with_device(store, cache, config, DeviceId::current())
    }

    /// Creates a client with an explicit device identity.
    pub fn with_device(
        store: S,
        cache: SessionCache,
        config: ClientConfig,
        device: DeviceId,
    ) -> Self {
        Self {
            store,
            cache,
            device,
            config,
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Validates credentials against the current local time.
    pub async fn validate(&self, credentials: &Credentials) -> Validation {
        self.validate_at(credentials, Local::now().naive_local()).await
    }

    /// Validates credentials as of `now` (local wall-clock time).
    pub async fn validate_at(&self, credentials: &Credentials, now: NaiveDateTime) -> Validation {
        let result = self.run(credentials, now).await;

        match &result {
            Ok(authorized) => {
                info!(
                    "License {}-... authorized ({:?})",
                    authorized.session.key.short(),
                    authorized.mode
                );
                if authorized.mode != AuthMode::Offline {
                    let session = &authorized.session;
                    self.cache
                        .save(&session.login, &session.password, session.key.as_str(), now);
                }
            }
            Err(e) => warn!("License validation failed: {}", e),
        }

        result
    }

    /// Re-validates the caller's session, or the cached one if there is none.
    pub async fn check_status(&self, session: Option<&ActiveSession>) -> Validation {
        self.check_status_at(session, Local::now().naive_local()).await
    }

    pub async fn check_status_at(
        &self,
        session: Option<&ActiveSession>,
        now: NaiveDateTime,
    ) -> Validation {
        let credentials = match session {
            Some(session) => session.credentials(),
            None => self
                .remembered_credentials()
                .ok_or(LicenseError::NoSession)?,
        };
        self.validate_at(&credentials, now).await
    }

    /// Credentials of the last successful validation on this machine.
    #[must_use]
    pub fn remembered_credentials(&self) -> Option<Credentials> {
        self.cache
            .load()
            .map(|record| Credentials::new(record.login, record.password, record.key))
    }

    /// Drops the cached session (logout).
    pub fn forget_session(&self) {
        self.cache.clear();
    }

    async fn run(&self, credentials: &Credentials, now: NaiveDateTime) -> Validation {
        let key = KeyId::parse(&credentials.key)?;

        for attempt in 1..=ACTIVATION_ATTEMPTS {
            let doc = match self.fetch(&key).await {
                Ok(doc) => doc,
                Err(FetchFailure::Missing) => return Err(LicenseError::NotFound),
                Err(FetchFailure::Unreachable(reason)) => {
                    return self.offline(&key, credentials, now, &reason);
                }
                Err(FetchFailure::Unexpected(reason)) => {
                    return Err(LicenseError::Unexpected(reason));
                }
            };

            let license = LicenseDocument::from_document(&doc);
            if !license.is_active {
                return Err(LicenseError::Banned);
            }

            if let Some(activation) = &license.activation {
                return self.check_activation(&key, activation, credentials, now);
            }

            match self.activate(&key, &license, credentials, now).await {
                Ok(authorized) => return Ok(authorized),
                Err(ActivationFailure::Failed(e)) => return Err(e),
                Err(ActivationFailure::Raced) => {
                    debug!(
                        "Key {}-... changed during activation (attempt {})",
                        key.short(),
                        attempt
                    );
                }
            }
        }

        Err(LicenseError::ActivationWriteFailed(
            "key changed during activation".to_string(),
        ))
    }

    async fn fetch(&self, key: &KeyId) -> Result<Document, FetchFailure> {
        let request = self.store.get(&self.config.collection, key.as_str());
        match timeout(self.config.request_timeout, request).await {
            Ok(Ok(doc)) => Ok(doc),
            Ok(Err(StoreError::NotFound(_))) => Err(FetchFailure::Missing),
            Ok(Err(
                e @ (StoreError::Decode(_) | StoreError::Serialization(_) | StoreError::Config(_)),
            )) => Err(FetchFailure::Unexpected(e.to_string())),
            Ok(Err(e)) => Err(FetchFailure::Unreachable(e.to_string())),
            Err(_) => Err(FetchFailure::Unreachable(format!(
                "no response within {:?}",
                self.config.request_timeout
            ))),
        }
    }

    fn check_activation(
        &self,
        key: &KeyId,
        activation: &Activation,
        credentials: &Credentials,
        now: NaiveDateTime,
    ) -> Validation {
        if activation.hwid != self.device.as_str() {
            return Err(LicenseError::DeviceMismatch);
        }

        if !activation.credentials_match(&credentials.login, &credentials.password) {
            return Err(LicenseError::CredentialMismatch);
        }

        match (&activation.expires_at, &activation.expires_at_raw) {
            (Some(expiry), _) if expiry.is_expired_at(now) => {
                return Err(LicenseError::Expired(activation.expiry_text()));
            }
            (None, Some(raw)) => {
                warn!("Key {}-... has unreadable expiry {:?}", key.short(), raw);
            }
            _ => {}
        }

        let expiry = match &activation.expires_at_raw {
            Some(raw) => ExpiryDisplay::Stored(raw.clone()),
            None => ExpiryDisplay::Until(activation.expires_at.unwrap_or(Expiry::Lifetime)),
        };

        Ok(Authorized {
            session: ActiveSession::new(key, credentials),
            expiry,
            mode: AuthMode::Online,
        })
    }

    async fn activate(
        &self,
        key: &KeyId,
        license: &LicenseDocument,
        credentials: &Credentials,
        now: NaiveDateTime,
    ) -> Result<Authorized, ActivationFailure> {
        let expires_at = TimeDelta::try_days(license.duration_days)
            .and_then(|grant| now.checked_add_signed(grant))
            .map(Expiry::Timed)
            .ok_or_else(|| {
                ActivationFailure::Failed(LicenseError::Unexpected(format!(
                    "duration of {} days is out of range",
                    license.duration_days
                )))
            })?;

        let fields = Activation::fields(
            self.device.as_str(),
            &credentials.login,
            &credentials.password,
            now,
            expires_at,
        );
        let precondition = match license.update_time {
            Some(revision) => Precondition::UpdateTime(revision),
            None => Precondition::Exists(true),
        };

        info!(
            "Activating key {}-... for {} days",
            key.short(),
            license.duration_days
        );
        let write = self
            .store
            .update(&self.config.collection, key.as_str(), &fields, precondition);

        match timeout(self.config.request_timeout, write).await {
            Ok(Ok(_)) => Ok(Authorized {
                session: ActiveSession::new(key, credentials),
                expiry: ExpiryDisplay::Until(expires_at),
                mode: AuthMode::Activated,
            }),
            Ok(Err(StoreError::PreconditionFailed(_))) => Err(ActivationFailure::Raced),
            Ok(Err(StoreError::NotFound(_))) => {
                Err(ActivationFailure::Failed(LicenseError::NotFound))
            }
            Ok(Err(e)) => Err(ActivationFailure::Failed(
                LicenseError::ActivationWriteFailed(e.to_string()),
            )),
            Err(_) => Err(ActivationFailure::Failed(
                LicenseError::ActivationWriteFailed(format!(
                    "no response within {:?}",
                    self.config.request_timeout
                )),
            )),
        }
    }

    fn offline(
        &self,
        key: &KeyId,
        credentials: &Credentials,
        now: NaiveDateTime,
        reason: &str,
    ) -> Validation {
        if !self.config.offline_grace {
            return Err(LicenseError::NetworkUnavailable(reason.to_string()));
        }
        warn!(
            "License server unreachable ({}); checking offline grace period",
            reason
        );

        let record = self
            .cache
            .load()
            .ok_or(LicenseError::OfflineSessionMissing)?;

        let same_session = KeyId::parse(&record.key).is_ok_and(|cached| cached == *key)
            && record.login == credentials.login
            && record.password == credentials.password;
        if !same_session {
            return Err(LicenseError::OfflineMismatch);
        }

        let last_login = record
            .last_login
            .ok_or(LicenseError::OfflineWindowExpired)?;
        // A clock moved backwards counts as no time elapsed.
        let elapsed = (now - last_login).max(TimeDelta::zero());
        if elapsed >= self.config.grace_period {
            return Err(LicenseError::OfflineWindowExpired);
        }

        Ok(Authorized {
            session: ActiveSession::new(key, credentials),
            expiry: ExpiryDisplay::Offline {
                hours: self.config.grace_period.num_hours(),
            },
            mode: AuthMode::Offline,
        })
    }
}
