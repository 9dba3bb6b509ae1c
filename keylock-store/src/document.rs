//! Document envelopes and write preconditions.

use crate::value::Fields;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A stored document: its resource name, fields and store-assigned times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name; the last path segment is the document id.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    /// Revision of the last write. Used as a compare-and-set token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Document {
    /// Returns the document id (last segment of the resource name).
    #[must_use]
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }
}

/// One page of a collection listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPage {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Condition the stored document must satisfy for a write to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional write.
    #[default]
    None,
    /// The document must (or must not) exist.
    Exists(bool),
    /// The document's last write must have happened at exactly this revision.
    UpdateTime(DateTime<Utc>),
}

impl Precondition {
    /// Query parameter expressing this precondition, if any.
    #[must_use]
    pub fn query_param(&self) -> Option<(&'static str, String)> {
        match self {
            Self::None => None,
            Self::Exists(exists) => Some(("currentDocument.exists", exists.to_string())),
            Self::UpdateTime(t) => Some((
                "currentDocument.updateTime",
                t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )),
        }
    }
}
