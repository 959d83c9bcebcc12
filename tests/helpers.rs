// Shared test helpers for store setup, site fixtures, and a scripted probe transport.
//
// This module provides common utilities used across multiple test files to reduce duplication.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use account_scout::cache::CacheManager;
use account_scout::catalog::{DetectionRule, Site, SiteCatalog};
use account_scout::error_handling::ProbeErrorKind;
use account_scout::probe::{
    substitute_username, ProbeRequest, ProbeResponse, ProbeTransport, Prober, TransportError,
};
use account_scout::search::SearchContext;
use account_scout::store::{DocumentStore, MemoryStore, SqliteStore};

/// Creates an empty in-memory document store.
#[allow(dead_code)] // Used by other test files
pub fn memory_store() -> Arc<dyn DocumentStore> {
    Arc::new(MemoryStore::new())
}

/// Creates an in-memory SQLite-backed store.
#[allow(dead_code)] // Used by other test files
pub async fn sqlite_store() -> Arc<dyn DocumentStore> {
    Arc::new(
        SqliteStore::open_memory()
            .await
            .expect("Failed to open in-memory SQLite store"),
    )
}

/// Creates a file-backed SQLite store in a fresh temp directory.
/// The directory handle must stay alive for as long as the store is used.
#[allow(dead_code)] // Used by other test files
pub async fn temp_sqlite_store() -> (Arc<dyn DocumentStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = SqliteStore::open(&dir.path().join("accounts.db"))
        .await
        .expect("Failed to open SQLite store");
    (Arc::new(store), dir)
}

/// A status-rule site whose probe URL is `https://<name>.example.com/<user>`.
#[allow(dead_code)] // Used by other test files
pub fn status_site(name: &str) -> Site {
    Site {
        name: name.to_string(),
        url_main: format!("https://{}.example.com", name.to_lowercase()),
        url: Some(format!("https://{}.example.com/{{}}", name.to_lowercase())),
        url_probe: None,
        error_type: DetectionRule::StatusCode,
        error_msg: None,
        error_url: None,
        request_head_only: false,
        headers: Default::default(),
        omit: false,
        tags: Vec::new(),
        username_claimed: None,
        username_unclaimed: None,
    }
}

/// Same fixture with tags attached.
#[allow(dead_code)] // Used by other test files
pub fn tagged_site(name: &str, tags: &[&str]) -> Site {
    let mut site = status_site(name);
    site.tags = tags.iter().map(|tag| tag.to_string()).collect();
    site
}

/// The URL a probe of (site, user) will request, for scripting responses.
#[allow(dead_code)] // Used by other test files
pub fn probe_url(site: &Site, user: &str) -> String {
    substitute_username(
        site.probe_template().expect("site fixture has no probe URL"),
        user,
    )
}

/// Builds a catalog from the given site fixtures.
#[allow(dead_code)] // Used by other test files
pub fn catalog_with(sites: Vec<Site>) -> SiteCatalog {
    SiteCatalog::from_sites(sites)
}

/// Scripted probe transport: canned responses per URL, every request
/// recorded. URLs without a script entry answer 404.
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, Result<ProbeResponse, TransportError>>>,
    calls: Mutex<Vec<ProbeRequest>>,
}

#[allow(dead_code)] // Used by other test files
impl ScriptedTransport {
    pub fn new() -> Self {
        ScriptedTransport {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts a response with the given status and body.
    pub fn ok(&self, url: &str, status: u16, body: &str) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Ok(ProbeResponse {
                status,
                final_url: url.to_string(),
                body: body.to_string(),
            }),
        );
    }

    /// Scripts a transport failure.
    pub fn fail(&self, url: &str, kind: ProbeErrorKind, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(TransportError::new(kind, message)));
    }

    /// Number of requests made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of requests made to the given URL.
    pub fn calls_to(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url == url)
            .count()
    }
}

#[async_trait]
impl ProbeTransport for ScriptedTransport {
    async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let scripted = self.responses.lock().unwrap().get(&request.url).cloned();
        match scripted {
            Some(result) => result,
            None => Ok(ProbeResponse {
                status: 404,
                final_url: request.url,
                body: String::new(),
            }),
        }
    }
}

/// Builds a search context over the store, probing through a fresh
/// scripted transport. Returns the transport and cache manager handles
/// for assertions.
#[allow(dead_code)] // Used by other test files
pub fn scripted_context(
    store: Arc<dyn DocumentStore>,
) -> (SearchContext, Arc<ScriptedTransport>, CacheManager) {
    let transport = Arc::new(ScriptedTransport::new());
    let caches = CacheManager::new();
    let ctx = SearchContext {
        store,
        prober: Arc::new(Prober::new(
            Arc::clone(&transport) as Arc<dyn ProbeTransport>,
            Duration::from_secs(8),
        )),
        caches: caches.clone(),
    };
    (ctx, transport, caches)
}
