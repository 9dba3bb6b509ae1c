//! License key documents.
//!
//! A key is identified by a string of the form `XXXX-XXXX-XXXX-XXXX`
//! (four groups of four upper-case hex digits). Its document in the store
//! carries the grant length, the revocation flag and, once activated, the
//! device and credentials it is bound to.

use crate::error::{LicenseError, LicenseResult};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use keylock_store::{Document, Fields, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Grant length used when a document carries no readable `duration_days`.
pub const DEFAULT_DURATION_DAYS: i64 = 7;

/// Sentinel stored in `expires_at` for keys that never expire.
pub const LIFETIME: &str = "Lifetime";

/// Document field names.
pub mod field {
    pub const DURATION_DAYS: &str = "duration_days";
    pub const IS_ACTIVE: &str = "is_active";
    pub const HWID: &str = "hwid";
    pub const LOGIN: &str = "login";
    pub const PASSWORD: &str = "password";
    pub const ACTIVATED_AT: &str = "activated_at";
    pub const EXPIRES_AT: &str = "expires_at";
    pub const CREATED_AT: &str = "created_at";
}

const GROUPS: usize = 4;
const GROUP_LEN: usize = 4;

/// A validated license key string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    /// Parses a key, tolerating surrounding whitespace and lower-case hex.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidKey`] unless the input is four groups
    /// of four hex digits joined by `-`.
    pub fn parse(input: &str) -> LicenseResult<Self> {
        let candidate = input.trim().to_ascii_uppercase();
        let groups: Vec<&str> = candidate.split('-').collect();

        let well_formed = groups.len() == GROUPS
            && groups
                .iter()
                .all(|g| g.len() == GROUP_LEN && g.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            return Err(LicenseError::InvalidKey(input.trim().to_string()));
        }

        Ok(Self(candidate))
    }

    /// Formats eight random bytes as a key.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        let groups: Vec<String> = bytes
            .chunks(2)
            .map(|pair| format!("{:02X}{:02X}", pair[0], pair[1]))
            .collect();
        Self(groups.join("-"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First group only, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for KeyId {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyId {
    type Error = LicenseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KeyId> for String {
    fn from(key: KeyId) -> Self {
        key.0
    }
}

/// When a license stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Expires at a local wall-clock instant.
    Timed(NaiveDateTime),
    /// Never expires.
    Lifetime,
}

impl Expiry {
    /// Parses a stored expiry string.
    ///
    /// Accepts the `Lifetime` sentinel, naive ISO-8601 local times and
    /// RFC 3339 timestamps (converted to local time).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == LIFETIME {
            return Some(Self::Lifetime);
        }
        parse_local_time(raw).map(Self::Timed)
    }

    /// Returns true if the grant has run out at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: NaiveDateTime) -> bool {
        match self {
            Self::Timed(at) => now > *at,
            Self::Lifetime => false,
        }
    }

    /// Short human form: `dd.mm.yyyy` or `Lifetime`.
    #[must_use]
    pub fn short_display(&self) -> String {
        match self {
            Self::Timed(at) => at.format("%d.%m.%Y").to_string(),
            Self::Lifetime => LIFETIME.to_string(),
        }
    }

    pub(crate) fn to_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timed(at) => f.write_str(&format_local_time(*at)),
            Self::Lifetime => f.write_str(LIFETIME),
        }
    }
}

/// Formats a local time the way stored documents carry it:
/// `2026-01-02T03:04:05` or `2026-01-02T03:04:05.123456`.
#[must_use]
pub fn format_local_time(at: NaiveDateTime) -> String {
    use chrono::Timelike;

    if at.nanosecond() == 0 {
        at.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

/// Parses a naive ISO-8601 or RFC 3339 time into local wall-clock time.
#[must_use]
pub fn parse_local_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    raw.parse::<NaiveDateTime>().ok().or_else(|| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|at| at.with_timezone(&Local).naive_local())
    })
}

fn local_time_field(fields: &Fields, name: &str) -> Option<NaiveDateTime> {
    match fields.get(name)? {
        Value::String(raw) => parse_local_time(raw),
        Value::Timestamp(at) => Some(at.with_timezone(&Local).naive_local()),
        _ => None,
    }
}

fn non_empty(fields: &Fields, name: &str) -> Option<String> {
    fields
        .get_str(name)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Binding written at first activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub hwid: String,
    pub login: Option<String>,
    pub password: Option<String>,
    pub activated_at: Option<NaiveDateTime>,
    /// Parsed expiry. `None` when absent or unreadable.
    pub expires_at: Option<Expiry>,
    /// `expires_at` as stored, when it was a string.
    pub expires_at_raw: Option<String>,
}

impl Activation {
    /// Builds the fields written by a first activation.
    #[must_use]
    pub fn fields(
        hwid: &str,
        login: &str,
        password: &str,
        activated_at: NaiveDateTime,
        expires_at: Expiry,
    ) -> Fields {
        Fields::new()
            .with(field::HWID, hwid)
            .with(field::LOGIN, login)
            .with(field::PASSWORD, password)
            .with(field::ACTIVATED_AT, format_local_time(activated_at))
            .with(field::EXPIRES_AT, expires_at.to_value())
    }

    /// Returns true if `login`/`password` match the captured pair.
    #[must_use]
    pub fn credentials_match(&self, login: &str, password: &str) -> bool {
        match &self.login {
            Some(stored) => stored == login && self.password.as_deref() == Some(password),
            None => true,
        }
    }

    /// Expiry as shown to the user: the stored text, else `Lifetime`.
    #[must_use]
    pub fn expiry_text(&self) -> String {
        match (&self.expires_at_raw, &self.expires_at) {
            (Some(raw), _) => raw.clone(),
            (None, Some(expiry)) => expiry.to_string(),
            (None, None) => LIFETIME.to_string(),
        }
    }
}

/// Lifecycle state of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyState {
    Unactivated { duration_days: i64 },
    Activated(Activation),
}

/// Typed view of a key document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseDocument {
    /// Document id as stored. Not necessarily a well-formed [`KeyId`].
    pub id: String,
    pub duration_days: i64,
    pub is_active: bool,
    pub activation: Option<Activation>,
    /// `expires_at` text set on a key that is not activated yet.
    pub pending_expiry: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Store revision, for conditional writes.
    pub update_time: Option<DateTime<Utc>>,
}

impl LicenseDocument {
    /// Reads a document. Missing or mistyped optional fields fall back to
    /// their defaults; this never fails.
    #[must_use]
    pub fn from_document(doc: &Document) -> Self {
        let fields = &doc.fields;

        let duration_days = fields
            .get_int(field::DURATION_DAYS)
            .unwrap_or(DEFAULT_DURATION_DAYS);
        let is_active = fields.get_bool(field::IS_ACTIVE).unwrap_or(true);

        let activation = non_empty(fields, field::HWID).map(|hwid| {
            let expires_at_raw = fields.get_str(field::EXPIRES_AT).map(str::to_string);
            let expires_at = match &expires_at_raw {
                Some(raw) => Expiry::parse(raw),
                None => local_time_field(fields, field::EXPIRES_AT).map(Expiry::Timed),
            };

            Activation {
                hwid,
                login: non_empty(fields, field::LOGIN),
                password: fields.get_str(field::PASSWORD).map(str::to_string),
                activated_at: local_time_field(fields, field::ACTIVATED_AT),
                expires_at,
                expires_at_raw,
            }
        });

        let pending_expiry = match &activation {
            Some(_) => None,
            None => fields
                .get_str(field::EXPIRES_AT)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };

        Self {
            id: doc.id().to_string(),
            duration_days,
            is_active,
            activation,
            pending_expiry,
            created_at: fields.get_timestamp(field::CREATED_AT),
            update_time: doc.update_time,
        }
    }

    #[must_use]
    pub fn state(&self) -> KeyState {
        match &self.activation {
            Some(activation) => KeyState::Activated(activation.clone()),
            None => KeyState::Unactivated {
                duration_days: self.duration_days,
            },
        }
    }

    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.activation.is_some()
    }
}

impl From<&Document> for LicenseDocument {
    fn from(doc: &Document) -> Self {
        Self::from_document(doc)
    }
}
