//! Error types for the licensing module.

use keylock_store::StoreError;
use thiserror::Error;

/// How a failed validation should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The key or credentials are definitively rejected.
    Terminal,
    /// Nothing was decided; retrying may succeed.
    Transient,
    /// Rejected while offline; reconnecting may succeed.
    OfflineTerminal,
}

/// Reasons a license validation does not authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LicenseError {
    /// No such key in the store.
    #[error("invalid license key")]
    NotFound,

    /// The key string is not in `XXXX-XXXX-XXXX-XXXX` form.
    #[error("malformed license key: {0}")]
    InvalidKey(String),

    /// The key was revoked by an operator.
    #[error("this license key has been banned")]
    Banned,

    /// The key is bound to another machine.
    #[error("this license key is already activated on another device")]
    DeviceMismatch,

    /// Login or password differ from the pair captured at activation.
    #[error("login or password does not match this license key")]
    CredentialMismatch,

    /// The grant ran out.
    #[error("license expired on {0}")]
    Expired(String),

    /// Writing the activation failed; the key is still unactivated.
    #[error("activation failed: {0}")]
    ActivationWriteFailed(String),

    /// The store is unreachable and offline access is disabled.
    #[error("license server unreachable: {0}")]
    NetworkUnavailable(String),

    /// Offline, and this machine has no saved session.
    #[error("license server unreachable and no saved session")]
    OfflineSessionMissing,

    /// Offline, and the saved session belongs to other credentials.
    #[error("license server unreachable and credentials differ from the saved session")]
    OfflineMismatch,

    /// Offline for longer than the grace period.
    #[error("offline access window has expired; connect to the internet")]
    OfflineWindowExpired,

    /// Re-validation requested without a session to re-validate.
    #[error("no active session")]
    NoSession,

    /// Anything the state machine did not anticipate.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl LicenseError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ActivationWriteFailed(_) | Self::NetworkUnavailable(_) | Self::Unexpected(_) => {
                FailureKind::Transient
            }
            Self::OfflineSessionMissing | Self::OfflineMismatch | Self::OfflineWindowExpired => {
                FailureKind::OfflineTerminal
            }
            _ => FailureKind::Terminal,
        }
    }

    /// Returns true if repeating the same validation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() != FailureKind::Terminal
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Errors from operator key-management workflows.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Adding days to a lifetime key replaces it with a dated expiry.
    #[error("key {0} never expires; confirm to replace it with a dated expiry")]
    LifetimeDowngradeNeedsConfirmation(String),

    #[error("an extension of {0} days is out of range")]
    OutOfRange(u32),

    /// The document changed between read and write.
    #[error("key {0} changed while it was being updated; try again")]
    Concurrent(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AdminError {
    /// Maps store outcomes that have a key-level meaning.
    pub(crate) fn from_store(err: StoreError, key: &str) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(key.to_string()),
            StoreError::Conflict(_) => Self::AlreadyExists(key.to_string()),
            StoreError::PreconditionFailed(_) => Self::Concurrent(key.to_string()),
            other => Self::Store(other),
        }
    }
}

/// Result type for admin operations.
pub type AdminResult<T> = Result<T, AdminError>;
