//! Key generation.

use crate::key::{KeyId, field};
use chrono::{DateTime, SubsecRound, Utc};
use keylock_store::{Fields, Value};
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;

/// Grant lengths offered when issuing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDuration {
    OneDay,
    ThreeDays,
    OneWeek,
    OneMonth,
    ThreeMonths,
    SixMonths,
    /// Effectively unbounded (100 years).
    Unbounded,
}

impl KeyDuration {
    /// All choices, in menu order.
    pub const ALL: [Self; 7] = [
        Self::OneDay,
        Self::ThreeDays,
        Self::OneWeek,
        Self::OneMonth,
        Self::ThreeMonths,
        Self::SixMonths,
        Self::Unbounded,
    ];

    #[must_use]
    pub fn days(self) -> i64 {
        match self {
            Self::OneDay => 1,
            Self::ThreeDays => 3,
            Self::OneWeek => 7,
            Self::OneMonth => 30,
            Self::ThreeMonths => 90,
            Self::SixMonths => 180,
            Self::Unbounded => 36500,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OneDay => "1 day",
            Self::ThreeDays => "3 days",
            Self::OneWeek => "1 week",
            Self::OneMonth => "1 month",
            Self::ThreeMonths => "3 months",
            Self::SixMonths => "6 months",
            Self::Unbounded => "lifetime (100 years)",
        }
    }

    /// Maps a 1-based menu choice. Anything else falls back to one week.
    #[must_use]
    pub fn from_menu_choice(choice: &str) -> Self {
        choice
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or(Self::OneWeek)
    }
}

impl fmt::Display for KeyDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Draws a fresh key from the OS random source.
///
/// 64 bits of entropy; collisions surface as create conflicts.
#[must_use]
pub fn generate_key_id() -> KeyId {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    KeyId::from_bytes(bytes)
}

/// A generated key and the document to create for it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewKey {
    pub id: KeyId,
    pub fields: Fields,
}

/// Builds unactivated key documents.
#[derive(Debug, Clone, Copy)]
pub struct KeyGenerator {
    duration_days: i64,
}

impl KeyGenerator {
    #[must_use]
    pub fn new(duration: KeyDuration) -> Self {
        Self::with_days(duration.days())
    }

    #[must_use]
    pub fn with_days(duration_days: i64) -> Self {
        Self { duration_days }
    }

    /// Fields of a new, unactivated key document.
    #[must_use]
    pub fn document_fields(&self, created_at: DateTime<Utc>) -> Fields {
        Fields::new()
            .with(field::DURATION_DAYS, self.duration_days)
            .with(field::IS_ACTIVE, true)
            .with(field::HWID, Value::Null)
            .with(field::CREATED_AT, created_at.trunc_subsecs(0))
    }

    /// Generates `count` keys stamped with `created_at`.
    #[must_use]
    pub fn generate(&self, count: u32, created_at: DateTime<Utc>) -> Vec<NewKey> {
        (0..count)
            .map(|_| NewKey {
                id: generate_key_id(),
                fields: self.document_fields(created_at),
            })
            .collect()
    }
}
