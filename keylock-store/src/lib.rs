//! Typed client for the remote key-document store.
//!
//! The store is an opaque per-entity document endpoint:
//!
//! - `GET /{collection}/{id}` reads a document, 404 when missing
//! - `POST /{collection}?documentId={id}` creates one
//! - `PATCH /{collection}/{id}?updateMask.fieldPaths=...` writes named fields
//! - `DELETE /{collection}/{id}` removes it
//!
//! Field values carry a type tag (`integerValue`, `booleanValue`,
//! `stringValue`, `nullValue`, `timestampValue`). Errors keep "the document
//! does not exist" apart from "the store could not be reached", which is what
//! the license client's offline fallback keys on.

mod document;
mod error;
mod http;
mod memory;
mod store;
mod value;

pub use document::{Document, DocumentPage, Precondition};
pub use error::{StoreError, StoreResult};
pub use http::{DEFAULT_TIMEOUT_SECS, FIRESTORE_API_BASE, HttpDocumentStore, StoreConfig};
pub use memory::MemoryDocumentStore;
pub use store::DocumentStore;
pub use value::{Fields, Value};
