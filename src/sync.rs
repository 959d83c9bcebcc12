//! Applies the store's live change feed to the in-memory caches.
//!
//! Replication (or any other writer sharing the store) surfaces here:
//! whatever lands in the store shows up in the caches without the rest
//! of the crate polling for it.

use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::account::Account;
use crate::cache::CacheManager;
use crate::keys;
use crate::store::DocumentStore;

/// Spawns the listener task. Account documents are re-adopted into the
/// right cache partition on every write and evicted on delete; documents
/// of other kinds pass through untouched. The task ends when the store
/// drops its feed.
pub fn spawn_cache_listener(store: &dyn DocumentStore, caches: CacheManager) -> JoinHandle<()> {
    let mut rx = store.changes();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.deleted {
                        caches.evict_everywhere(&event.id);
                        continue;
                    }
                    if !keys::is_account_doc_id(&event.id) {
                        continue;
                    }
                    let Some(doc) = event.doc else { continue };
                    match Account::from_document(&doc) {
                        Ok(account) => caches.adopt(&account),
                        Err(e) => {
                            debug!("Change feed: {} did not parse as an account: {}", event.id, e)
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Change feed lagged; {} events were dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Change feed closed; cache listener stopping");
    })
}
