//! In-memory document store.
//!
//! Backs tests and ad hoc runs with the same revision and range-scan
//! semantics as the SQLite store: a `BTreeMap` keeps keys ordered for
//! prefix scans, and removed documents leave tombstones so the revision
//! sequence survives delete/re-create cycles.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{
    assemble_doc, make_rev, split_for_put, AllDocsOptions, ChangeEvent, DocRow, Document,
    DocumentStore, PutResult, StoreError,
};
use crate::config::CHANGE_FEED_CAPACITY;

#[derive(Debug, Clone)]
struct StoredEntry {
    seq: u64,
    rev: String,
    deleted: bool,
    body: serde_json::Map<String, serde_json::Value>,
}

/// Document store held entirely in memory.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, StoredEntry>>,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        MemoryStore {
            entries: Mutex::new(BTreeMap::new()),
            change_tx,
        }
    }

    fn broadcast(&self, event: ChangeEvent) {
        // Nobody listening is fine
        let _ = self.change_tx.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Document, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(id) {
            Some(entry) if !entry.deleted => {
                Ok(assemble_doc(id, &entry.rev, entry.body.clone()))
            }
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn put(&self, doc: Document) -> Result<PutResult, StoreError> {
        let (id, supplied_rev, body) = split_for_put(doc)?;
        let body_json = serde_json::to_string(&body)?;

        let (rev, stored_doc) = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let next_seq = match entries.get(&id) {
                Some(entry) if !entry.deleted => {
                    if supplied_rev != entry.rev {
                        return Err(StoreError::Conflict {
                            id,
                            supplied: supplied_rev,
                            current: entry.rev.clone(),
                        });
                    }
                    entry.seq + 1
                }
                Some(tombstone) => {
                    // Re-creating over a tombstone: a fresh put (no rev) or
                    // one quoting the tombstone's rev both pass.
                    if !supplied_rev.is_empty() && supplied_rev != tombstone.rev {
                        return Err(StoreError::Conflict {
                            id,
                            supplied: supplied_rev,
                            current: tombstone.rev.clone(),
                        });
                    }
                    tombstone.seq + 1
                }
                None => {
                    if !supplied_rev.is_empty() {
                        return Err(StoreError::Conflict {
                            id,
                            supplied: supplied_rev,
                            current: String::new(),
                        });
                    }
                    1
                }
            };
            let rev = make_rev(&id, next_seq, &body_json);
            entries.insert(
                id.clone(),
                StoredEntry {
                    seq: next_seq,
                    rev: rev.clone(),
                    deleted: false,
                    body: body.clone(),
                },
            );
            let stored = assemble_doc(&id, &rev, body);
            (rev, stored)
        };

        self.broadcast(ChangeEvent {
            id: id.clone(),
            doc: Some(stored_doc),
            deleted: false,
        });
        Ok(PutResult { id, rev })
    }

    async fn remove(&self, id: &str, rev: &str) -> Result<PutResult, StoreError> {
        let new_rev = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let entry = match entries.get_mut(id) {
                Some(entry) if !entry.deleted => entry,
                _ => return Err(StoreError::NotFound(id.to_string())),
            };
            if rev != entry.rev {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    supplied: rev.to_string(),
                    current: entry.rev.clone(),
                });
            }
            entry.seq += 1;
            entry.rev = make_rev(id, entry.seq, "");
            entry.deleted = true;
            entry.body = serde_json::Map::new();
            entry.rev.clone()
        };

        self.broadcast(ChangeEvent {
            id: id.to_string(),
            doc: None,
            deleted: true,
        });
        Ok(PutResult {
            id: id.to_string(),
            rev: new_rev,
        })
    }

    async fn all_docs(&self, options: AllDocsOptions) -> Result<Vec<DocRow>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let lower = match &options.start_key {
            Some(key) => Bound::Included(key.clone()),
            None => Bound::Unbounded,
        };
        let upper = match &options.end_key {
            Some(key) => Bound::Included(key.clone()),
            None => Bound::Unbounded,
        };
        let rows = entries
            .range((lower, upper))
            .filter(|(_, entry)| !entry.deleted)
            .map(|(id, entry)| DocRow {
                id: id.clone(),
                rev: entry.rev.clone(),
                doc: options
                    .include_docs
                    .then(|| assemble_doc(id, &entry.rev, entry.body.clone())),
            })
            .collect();
        Ok(rows)
    }

    async fn bulk_get(
        &self,
        ids: &[String],
    ) -> Result<Vec<Result<Document, StoreError>>, StoreError> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.get(id).await);
        }
        Ok(results)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }
}
