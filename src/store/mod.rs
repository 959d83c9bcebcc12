//! Document store: the persistence seam.
//!
//! Everything this crate persists is a flat JSON document with an `_id` and
//! an opaque `_rev` concurrency token. The [`DocumentStore`] trait captures
//! the exact contract the rest of the crate relies on (keyed get/put/remove
//! with revision checks, ordered range scans, per-id bulk reads, and a live
//! change feed), so storage backends are swappable behind `Arc<dyn
//! DocumentStore>`. Two implementations ship: [`SqliteStore`] for durable
//! storage and [`MemoryStore`] for tests and ad hoc use.
//!
//! Revision protocol: revisions are `seq-hash` tokens. A put of a new
//! document must carry no `_rev` (or an empty one); a put or remove of an
//! existing document must carry the document's current `_rev`, otherwise
//! the store answers [`StoreError::Conflict`]. Removal leaves a tombstone so
//! a later re-creation continues the sequence.

mod memory;
mod sqlite;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub use crate::error_handling::StoreError;

/// A flat persisted document. Always a JSON object carrying `_id` and,
/// once persisted, `_rev`.
pub type Document = serde_json::Value;

/// Identifier and revision assigned by a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// Document identifier.
    pub id: String,
    /// Revision after the write.
    pub rev: String,
}

/// One row of a range scan.
#[derive(Debug, Clone)]
pub struct DocRow {
    /// Document identifier.
    pub id: String,
    /// Current revision.
    pub rev: String,
    /// The document body, when the scan asked for it.
    pub doc: Option<Document>,
}

/// Options for [`DocumentStore::all_docs`]. Bounds are inclusive; a missing
/// bound leaves that side open.
#[derive(Debug, Clone, Default)]
pub struct AllDocsOptions {
    /// Inclusive lower key bound.
    pub start_key: Option<String>,
    /// Inclusive upper key bound.
    pub end_key: Option<String>,
    /// Whether rows carry document bodies.
    pub include_docs: bool,
}

impl AllDocsOptions {
    /// Scan covering exactly the keys starting with `prefix`, with bodies.
    pub fn for_prefix(prefix: &str) -> Self {
        AllDocsOptions {
            start_key: Some(prefix.to_string()),
            end_key: Some(crate::keys::prefix_end(prefix)),
            include_docs: true,
        }
    }

    /// Same bounds without bodies (id + rev only).
    pub fn keys_only(mut self) -> Self {
        self.include_docs = false;
        self
    }
}

/// One entry of the live change feed.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Identifier of the changed document.
    pub id: String,
    /// The new document body; absent for deletions.
    pub doc: Option<Document>,
    /// Whether the change was a deletion.
    pub deleted: bool,
}

/// Keyed document storage with optimistic concurrency and a change feed.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches a live document by identifier.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no live document exists under `id`.
    async fn get(&self, id: &str) -> Result<Document, StoreError>;

    /// Writes a document, assigning the next revision.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when the supplied `_rev` does not match the
    /// stored revision, [`StoreError::MissingId`] / [`StoreError::NotAnObject`]
    /// for malformed input.
    async fn put(&self, doc: Document) -> Result<PutResult, StoreError>;

    /// Deletes a document, leaving a tombstone.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no live document exists,
    /// [`StoreError::Conflict`] on a stale revision.
    async fn remove(&self, id: &str, rev: &str) -> Result<PutResult, StoreError>;

    /// Ordered range scan over live documents.
    async fn all_docs(&self, options: AllDocsOptions) -> Result<Vec<DocRow>, StoreError>;

    /// Fetches several documents, reporting success or failure per id.
    async fn bulk_get(&self, ids: &[String]) -> Result<Vec<Result<Document, StoreError>>, StoreError>;

    /// Subscribes to the live change feed.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Reads a document's `_id`.
pub fn doc_id(doc: &Document) -> Option<&str> {
    doc.get("_id").and_then(|value| value.as_str())
}

/// Reads a document's `_rev`, empty string when unset.
pub fn doc_rev(doc: &Document) -> &str {
    doc.get("_rev").and_then(|value| value.as_str()).unwrap_or("")
}

/// Splits a put payload into (id, supplied rev, body without `_id`/`_rev`).
///
/// The body is what revisions are computed over and what backends persist;
/// `_id` and `_rev` are re-injected on read.
pub(crate) fn split_for_put(
    doc: Document,
) -> Result<(String, String, serde_json::Map<String, serde_json::Value>), StoreError> {
    let mut body = match doc {
        serde_json::Value::Object(map) => map,
        _ => return Err(StoreError::NotAnObject),
    };
    let id = match body.remove("_id") {
        Some(serde_json::Value::String(id)) if !id.is_empty() => id,
        _ => return Err(StoreError::MissingId),
    };
    let supplied_rev = match body.remove("_rev") {
        Some(serde_json::Value::String(rev)) => rev,
        _ => String::new(),
    };
    Ok((id, supplied_rev, body))
}

/// Re-injects `_id` and `_rev` into a stored body.
pub(crate) fn assemble_doc(
    id: &str,
    rev: &str,
    mut body: serde_json::Map<String, serde_json::Value>,
) -> Document {
    body.insert("_id".to_string(), serde_json::Value::String(id.to_string()));
    body.insert(
        "_rev".to_string(),
        serde_json::Value::String(rev.to_string()),
    );
    serde_json::Value::Object(body)
}

/// Computes the `seq-hash` revision token for one write.
///
/// The hash covers identifier, sequence number, and the canonical body
/// serialization, so identical rewrites of the same content still advance
/// to a distinct revision through `seq`.
pub(crate) fn make_rev(id: &str, seq: u64, body_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(seq.to_be_bytes());
    hasher.update(b"\x1f");
    hasher.update(body_json.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", seq, &digest[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_for_put_extracts_id_and_rev() {
        let doc = json!({"_id": "account/x", "_rev": "1-abc", "userName": "jdoe"});
        let (id, rev, body) = split_for_put(doc).unwrap();
        assert_eq!(id, "account/x");
        assert_eq!(rev, "1-abc");
        assert!(body.get("_id").is_none());
        assert!(body.get("_rev").is_none());
        assert_eq!(body.get("userName"), Some(&json!("jdoe")));
    }

    #[test]
    fn test_split_for_put_rejects_malformed_docs() {
        assert!(matches!(
            split_for_put(json!(["not", "an", "object"])),
            Err(StoreError::NotAnObject)
        ));
        assert!(matches!(
            split_for_put(json!({"userName": "jdoe"})),
            Err(StoreError::MissingId)
        ));
        assert!(matches!(
            split_for_put(json!({"_id": ""})),
            Err(StoreError::MissingId)
        ));
    }

    #[test]
    fn test_make_rev_carries_sequence_prefix() {
        let rev = make_rev("account/x", 3, "{}");
        assert!(rev.starts_with("3-"));
        // distinct inputs give distinct hashes at the same seq
        assert_ne!(rev, make_rev("account/y", 3, "{}"));
        assert_ne!(rev, make_rev("account/x", 3, r#"{"a":1}"#));
    }

    #[test]
    fn test_prefix_options_bound_the_scan() {
        let options = AllDocsOptions::for_prefix("account/");
        assert_eq!(options.start_key.as_deref(), Some("account/"));
        assert_eq!(
            options.end_key.as_deref(),
            Some("account/\u{fff0}")
        );
        assert!(options.include_docs);
        assert!(!AllDocsOptions::for_prefix("account/").keys_only().include_docs);
    }
}
