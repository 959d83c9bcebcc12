//! In-memory caches over the two account partitions.
//!
//! A [`DocCache`] keeps the latest known copy of each document and tells
//! subscribers when something changed. The [`CacheManager`] owns one
//! cache per partition (standalone accounts and search-scoped results)
//! and routes each adopted account to the right one by its identifier.
//!
//! Bulk operations wrap themselves in [`CacheManager::suspend_events`] so
//! subscribers see one catch-up notification instead of hundreds of
//! per-document ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::account::Account;
use crate::events::{EventBus, Notice, SubscriptionId, Topic};
use crate::keys;

/// Anything a [`DocCache`] can hold.
pub trait CacheItem {
    /// Document identifier the item is cached under.
    fn cache_id(&self) -> &str;
    /// Store revision, used to tell refreshes from no-ops.
    fn cache_revision(&self) -> &str;
}

impl CacheItem for Account {
    fn cache_id(&self) -> &str {
        &self.id
    }

    fn cache_revision(&self) -> &str {
        &self.revision
    }
}

/// Counts outstanding event suspensions. Notifications are suppressed
/// while the count is above zero.
pub(crate) struct EventGate {
    depth: AtomicUsize,
}

impl EventGate {
    fn new() -> Self {
        EventGate {
            depth: AtomicUsize::new(0),
        }
    }

    fn acquire(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns true when this release brought the depth back to zero.
    fn release(&self) -> bool {
        match self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
        {
            Ok(previous) => previous == 1,
            Err(_) => {
                error!("Event gate released more times than acquired");
                false
            }
        }
    }

    fn is_blocked(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }
}

/// Cache of one document partition, with change notification.
pub struct DocCache<T: CacheItem> {
    name: &'static str,
    items: Mutex<HashMap<String, T>>,
    bus: EventBus,
    gate: Arc<EventGate>,
}

impl<T: CacheItem> DocCache<T> {
    fn new(name: &'static str, gate: Arc<EventGate>) -> Self {
        DocCache {
            name,
            items: Mutex::new(HashMap::new()),
            bus: EventBus::new(),
            gate,
        }
    }

    /// Inserts or refreshes an item. Emits `Update` only when the item is
    /// new or its revision moved, and `Change` on every call.
    pub fn add(&self, item: T) {
        let id = item.cache_id().to_string();
        let changed = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            let changed = items
                .get(&id)
                .map(|old| old.cache_revision() != item.cache_revision())
                .unwrap_or(true);
            items.insert(id.clone(), item);
            changed
        };
        if changed {
            self.notify(Notice::about(Topic::Update, &id));
        }
        self.notify(Notice::about(Topic::Change, &id));
    }

    /// Drops an item, returning it if it was cached.
    pub fn remove(&self, id: &str) -> Option<T> {
        let removed = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            items.remove(id)
        };
        if removed.is_some() {
            self.notify(Notice::about(Topic::Remove, id));
            self.notify(Notice::about(Topic::Change, id));
        }
        removed
    }

    /// Empties the cache.
    pub fn clear(&self) {
        {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            items.clear();
        }
        self.notify(Notice::broad(Topic::Clear));
        self.notify(Notice::broad(Topic::Change));
    }

    pub fn has(&self, id: &str) -> bool {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to this cache's notices; keep the returned id to
    /// unsubscribe later.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    fn notify(&self, notice: Notice) {
        if self.gate.is_blocked() {
            return;
        }
        self.bus.emit(notice);
    }

    fn emit_catchup(&self) {
        debug!("Cache '{}' emitting catch-up change notice", self.name);
        self.bus.emit(Notice::broad(Topic::Change));
    }
}

impl<T: CacheItem + Clone> DocCache<T> {
    pub fn get(&self, id: &str) -> Option<T> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.get(id).cloned()
    }

    /// Snapshot of every cached item matching the predicate.
    pub fn filter<P>(&self, predicate: P) -> Vec<T>
    where
        P: Fn(&T) -> bool,
    {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.values().filter(|item| predicate(item)).cloned().collect()
    }
}

struct ManagerInner {
    accounts: DocCache<Account>,
    results: DocCache<Account>,
    gate: Arc<EventGate>,
}

/// Owns the account-partition and result-partition caches.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<ManagerInner>,
}

impl CacheManager {
    pub fn new() -> Self {
        let gate = Arc::new(EventGate::new());
        CacheManager {
            inner: Arc::new(ManagerInner {
                accounts: DocCache::new("accounts", Arc::clone(&gate)),
                results: DocCache::new("results", Arc::clone(&gate)),
                gate,
            }),
        }
    }

    /// Cache of standalone accounts (no search-scope prefix).
    pub fn accounts(&self) -> &DocCache<Account> {
        &self.inner.accounts
    }

    /// Cache of search-scoped result copies.
    pub fn results(&self) -> &DocCache<Account> {
        &self.inner.results
    }

    /// Registers an account in whichever partition its identifier names.
    pub fn adopt(&self, account: &Account) {
        if keys::is_result_id(&account.id) {
            self.inner.results.add(account.clone());
        } else {
            self.inner.accounts.add(account.clone());
        }
    }

    /// Drops an identifier from both partitions.
    pub fn evict_everywhere(&self, id: &str) {
        self.inner.accounts.remove(id);
        self.inner.results.remove(id);
    }

    pub fn clear_all(&self) {
        self.inner.accounts.clear();
        self.inner.results.clear();
    }

    /// Suppresses per-document notices until the returned guard drops.
    /// Nested suspensions stack; the last guard out emits one catch-up
    /// `Change` notice per cache.
    pub fn suspend_events(&self) -> EventBlock {
        self.inner.gate.acquire();
        EventBlock {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard holding cache notifications back.
pub struct EventBlock {
    inner: Arc<ManagerInner>,
}

impl Drop for EventBlock {
    fn drop(&mut self) {
        if self.inner.gate.release() {
            self.inner.accounts.emit_catchup();
            self.inner.results.emit_catchup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DetectionRule, Site};

    fn test_site(name: &str) -> Site {
        Site {
            name: name.to_string(),
            url_main: "https://example.com".to_string(),
            url: Some("https://example.com/{}".to_string()),
            url_probe: None,
            error_type: DetectionRule::StatusCode,
            error_msg: None,
            error_url: None,
            request_head_only: false,
            headers: Default::default(),
            omit: false,
            tags: vec![],
            username_claimed: None,
            username_unclaimed: None,
        }
    }

    fn recorded_topics(cache: &DocCache<Account>) -> Arc<Mutex<Vec<Topic>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache.subscribe(move |notice| sink.lock().unwrap().push(notice.topic));
        seen
    }

    #[test]
    fn test_add_emits_update_then_change() {
        let manager = CacheManager::new();
        let seen = recorded_topics(manager.accounts());

        let account = Account::unregistered(test_site("A"), "alice", "");
        manager.accounts().add(account);

        assert_eq!(*seen.lock().unwrap(), vec![Topic::Update, Topic::Change]);
    }

    #[test]
    fn test_unchanged_revision_skips_update() {
        let manager = CacheManager::new();
        let account = Account::unregistered(test_site("A"), "alice", "");
        manager.accounts().add(account.clone());

        let seen = recorded_topics(manager.accounts());
        manager.accounts().add(account);

        assert_eq!(*seen.lock().unwrap(), vec![Topic::Change]);
    }

    #[test]
    fn test_adopt_routes_by_partition() {
        let manager = CacheManager::new();
        let standalone = Account::unregistered(test_site("A"), "alice", "");
        let result = Account::unregistered(
            test_site("A"),
            "alice",
            "searchDef/1/search/2/searchResult/",
        );

        manager.adopt(&standalone);
        manager.adopt(&result);

        assert!(manager.accounts().has(&standalone.id));
        assert!(!manager.accounts().has(&result.id));
        assert!(manager.results().has(&result.id));
        assert_eq!(manager.accounts().len(), 1);
        assert_eq!(manager.results().len(), 1);
    }

    #[test]
    fn test_suspension_coalesces_notices() {
        let manager = CacheManager::new();
        let seen = recorded_topics(manager.accounts());

        {
            let _block = manager.suspend_events();
            for user in ["a", "b", "c"] {
                manager
                    .accounts()
                    .add(Account::unregistered(test_site("A"), user, ""));
            }
            assert!(seen.lock().unwrap().is_empty());
        }

        // one catch-up change, not three update/change pairs
        assert_eq!(*seen.lock().unwrap(), vec![Topic::Change]);
        assert_eq!(manager.accounts().len(), 3);
    }

    #[test]
    fn test_nested_suspensions_release_on_last_guard() {
        let manager = CacheManager::new();
        let seen = recorded_topics(manager.accounts());

        let outer = manager.suspend_events();
        let inner = manager.suspend_events();
        drop(inner);
        assert!(seen.lock().unwrap().is_empty());
        drop(outer);
        assert_eq!(*seen.lock().unwrap(), vec![Topic::Change]);
    }

    #[test]
    fn test_unbalanced_release_is_not_fatal() {
        let gate = EventGate::new();
        assert!(!gate.release());
        gate.acquire();
        assert!(gate.release());
    }

    #[test]
    fn test_remove_and_filter() {
        let manager = CacheManager::new();
        let a = Account::unregistered(test_site("A"), "alice", "");
        let b = Account::registered(test_site("B"), "bob", "", vec![], vec![]);
        manager.accounts().add(a.clone());
        manager.accounts().add(b);

        let registered = manager
            .accounts()
            .filter(|acct| matches!(acct.kind, crate::account::AccountKind::Registered(_)));
        assert_eq!(registered.len(), 1);

        assert!(manager.accounts().remove(&a.id).is_some());
        assert!(manager.accounts().remove(&a.id).is_none());
        assert_eq!(manager.accounts().len(), 1);
    }
}
