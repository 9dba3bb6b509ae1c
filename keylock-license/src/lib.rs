//! License keys for the desktop application.
//!
//! This crate handles:
//! - Key issuance and lifecycle management for operators ([`KeyAdmin`])
//! - One-time activation binding a key to a device and a credential pair
//! - Validation on every login ([`LicenseClient`])
//! - Offline continuation from a local session cache
//!
//! # Design Principles
//!
//! - **One device per key**: the first activation wins; it is a conditional
//!   write against the revision that was read, so concurrent first
//!   activations cannot both succeed
//! - **Definitive answers stay definitive**: a missing, banned, mismatched or
//!   expired key is never retried through the offline path
//! - **Bounded offline window**: an unreachable store is tolerated for
//!   24 hours after the last successful online validation
//!
//! # Key Format
//!
//! `XXXX-XXXX-XXXX-XXXX`: four groups of four upper-case hex digits drawn
//! from the OS random source.

mod admin;
mod client;
mod device;
mod error;
mod generator;
mod key;
mod session;

pub use admin::{
    ExtendMode, ExtendOutcome, GENERATED_KEYS_FILE, GenerateReport, KeyAdmin, KeyRow, KeyStatus,
    LIST_PAGE_SIZE, record_generated,
};
pub use client::{
    ActiveSession, AuthMode, Authorized, ClientConfig, Credentials, DEFAULT_REQUEST_TIMEOUT,
    ExpiryDisplay, GRACE_PERIOD_HOURS, LicenseClient, Validation, ValidationReport,
};
pub use device::{DeviceId, DeviceInfo, DeviceSource};
pub use error::{AdminError, AdminResult, FailureKind, LicenseError, LicenseResult};
pub use generator::{KeyDuration, KeyGenerator, NewKey, generate_key_id};
pub use key::{
    Activation, DEFAULT_DURATION_DAYS, Expiry, KeyId, KeyState, LIFETIME, LicenseDocument, field,
    format_local_time, parse_local_time,
};
pub use session::{APP_DIR, SESSION_FILE, SessionCache, SessionRecord};
