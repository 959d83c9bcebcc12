//! account_scout library: username-to-account discovery across a site catalog
//!
//! This library probes a catalog of third-party sites for accounts held under
//! a set of usernames, classifies each (site, username) pair as registered,
//! unregistered, or failed, and records every outcome as a document in a
//! local store. Discovered accounts can later be claimed or rejected, grouped
//! onto profile pages, and re-searched without re-probing known pairs.
//!
//! # Example
//!
//! ```no_run
//! use account_scout::{run_search, Config};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     user_names: vec!["jdoe".to_string()],
//!     tags: vec!["social".to_string()],
//!     ..Default::default()
//! };
//!
//! let report = run_search(config).await?;
//! println!("Found {} accounts across {} sites", report.found, report.sites);
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your
//! application or ensure you're calling library functions within an async
//! context.

#![warn(missing_docs)]

pub mod account;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error_handling;
pub mod events;
pub mod initialization;
pub mod keys;
pub mod probe;
pub mod profile;
pub mod search;
pub mod settings;
pub mod store;
mod sync;

// Re-export public API
pub use account::{Account, AccountKind, ActionTaken};
pub use cache::CacheManager;
pub use catalog::{Site, SiteCatalog};
pub use config::{Config, LogFormat, LogLevel};
pub use probe::{HttpTransport, Prober, SiteCheck};
pub use profile::ProfilePage;
pub use run::{run_search, run_site_checks, SearchReport};
pub use search::{Search, SearchContext, SearchDefinition, SearchParams, SearchState};
pub use settings::AppSettings;
pub use store::{DocumentStore, MemoryStore, SqliteStore};
pub use sync::spawn_cache_listener;

// Internal run module (contains the main search orchestration)
mod run {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{bail, Context, Result};
    use log::{info, warn};

    use crate::cache::CacheManager;
    use crate::catalog::SiteCatalog;
    use crate::config::{Config, LOGGING_INTERVAL_SECS};
    use crate::initialization::{init_client, init_cookie_client};
    use crate::probe::{HttpTransport, Prober, SiteCheck};
    use crate::search::{SearchContext, SearchDefinition, SearchParams, SearchState};
    use crate::settings::AppSettings;
    use crate::store::{DocumentStore, SqliteStore};
    use crate::sync::spawn_cache_listener;

    /// Results of a completed (or interrupted) search run.
    ///
    /// Contains summary statistics and metadata about the search.
    #[derive(Debug, Clone)]
    pub struct SearchReport {
        /// Number of sites the search covered
        pub sites: usize,
        /// Number of usernames probed per site
        pub user_names: usize,
        /// Total account documents recorded, whatever their outcome
        pub results: usize,
        /// Accounts that probed as registered or were already claimed
        pub found: usize,
        /// Pairs confirmed absent
        pub unregistered: usize,
        /// Probes that failed outright (timeouts, transport errors)
        pub failed: usize,
        /// State the search ended in
        pub state: SearchState,
        /// Identifier of the search document (scoped under its definition)
        pub search_id: String,
        /// Path to the SQLite database containing results
        pub db_path: PathBuf,
        /// Elapsed time in seconds
        pub elapsed_seconds: f64,
    }

    /// Runs a username search with the provided configuration.
    ///
    /// This is the main entry point for the library. It loads the site
    /// catalog, opens the document store, builds a one-off search definition
    /// from the configuration, and drives the search to completion while
    /// logging progress. Ctrl-C cancels the search; results recorded up to
    /// that point stay persisted.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The site catalog cannot be loaded or selects no searchable sites
    /// - No usernames were given
    /// - The document store cannot be opened
    /// - HTTP client initialization fails
    ///
    /// Individual probe failures do not fail the run; they are recorded as
    /// failed accounts and counted in the report.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use account_scout::{run_search, Config};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = Config {
    ///     user_names: vec!["jdoe".to_string()],
    ///     ..Default::default()
    /// };
    /// let report = run_search(config).await?;
    /// println!("Checked {} pairs", report.results);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_search(config: Config) -> Result<SearchReport> {
        if config.user_names.is_empty() {
            bail!("No usernames given; pass at least one username to search for");
        }

        let catalog = SiteCatalog::load_from_path(&config.catalog)
            .context("Failed to load site catalog")?;
        info!(
            "Loaded {} sites from {}",
            catalog.len(),
            config.catalog.display()
        );

        let store: Arc<dyn DocumentStore> = Arc::new(
            SqliteStore::open(&config.db_path)
                .await
                .context("Failed to open document store")?,
        );
        let caches = CacheManager::new();
        let listener = spawn_cache_listener(store.as_ref(), caches.clone());

        let mut settings = AppSettings::load_or_default(store.as_ref())
            .await
            .context("Failed to load settings")?;
        if settings.revision.is_empty() {
            settings.probe_timeout_secs = config.probe_timeout_seconds;
            settings.catalog_path = Some(config.catalog.display().to_string());
            settings
                .save(store.as_ref())
                .await
                .context("Failed to persist initial settings")?;
        }

        let client = init_client(&config)
            .await
            .context("Failed to initialize HTTP client")?;
        let cookie_client = init_cookie_client(&config)
            .await
            .context("Failed to initialize cookie-carrying HTTP client")?;
        let transport = Arc::new(HttpTransport::new(client, cookie_client));
        let prober = Arc::new(Prober::new(
            transport,
            Duration::from_secs(config.probe_timeout_seconds),
        ));

        let ctx = SearchContext {
            store: Arc::clone(&store),
            prober: Arc::clone(&prober),
            caches: caches.clone(),
        };

        let mut params = SearchParams {
            name: config.search_name.clone(),
            site_names: config.sites.clone(),
            user_names: config.user_names.clone(),
            first_names: config.first_names.clone(),
            last_names: config.last_names.clone(),
            tags: config.tags.clone(),
        };
        if params.site_names.is_empty() && params.tags.is_empty() {
            // No site filter means the whole catalog.
            params.site_names = catalog.iter().map(|site| site.name.clone()).collect();
        }

        let mut definition = SearchDefinition::new(&catalog, params);
        if definition.included_sites.is_empty() {
            bail!("No searchable sites selected; check --site/--tag against the catalog");
        }

        let mut search = definition.new_search(store.as_ref()).await?;
        info!(
            "Starting search {} ({} sites x {} usernames)",
            search.id,
            definition.included_sites.len(),
            definition.user_names.len()
        );

        let control = search.control();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; cancelling search");
                control.cancel();
            }
        });

        let start_time = std::time::Instant::now();
        let total_pairs = definition.included_sites.len() * definition.user_names.len();
        let caches_for_logging = caches.clone();
        let (stop_logging, mut stopped) = tokio::sync::oneshot::channel::<()>();
        let logging_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(LOGGING_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let done = caches_for_logging.results().len();
                        let elapsed = start_time.elapsed().as_secs_f64();
                        info!("Checked {}/{} site-username pairs in {:.1}s", done, total_pairs, elapsed);
                    }
                    _ = &mut stopped => break,
                }
            }
        });

        let outcome = search.start(&ctx).await;

        interrupt.abort();
        drop(stop_logging);
        let _ = logging_task.await;

        outcome.context("Search failed to run")?;

        prober.stats().log_summary();

        let results = search.results();
        let report = SearchReport {
            sites: definition.included_sites.len(),
            user_names: definition.user_names.len(),
            results: results.len(),
            found: results.discovered().len(),
            unregistered: results.unregistered().len(),
            failed: results.failed().len(),
            state: search.state(),
            search_id: search.id.clone(),
            db_path: config.db_path.clone(),
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
        };

        listener.abort();

        Ok(report)
    }

    /// Probes each selected site's own fixture usernames and reports
    /// whether its detection rule still classifies them correctly.
    ///
    /// Sites are taken from `--site` flags when given, otherwise the whole
    /// catalog is checked. No documents are written.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be loaded, a named site is
    /// unknown, or HTTP client initialization fails.
    pub async fn run_site_checks(config: Config) -> Result<Vec<SiteCheck>> {
        let catalog = SiteCatalog::load_from_path(&config.catalog)
            .context("Failed to load site catalog")?;

        let sites: Vec<&crate::catalog::Site> = if config.sites.is_empty() {
            catalog.iter().collect()
        } else {
            let mut picked = Vec::with_capacity(config.sites.len());
            for name in &config.sites {
                match catalog.get(name) {
                    Some(site) => picked.push(site),
                    None => bail!("Site '{}' is not in the catalog", name),
                }
            }
            picked
        };

        let client = init_client(&config)
            .await
            .context("Failed to initialize HTTP client")?;
        let cookie_client = init_cookie_client(&config)
            .await
            .context("Failed to initialize cookie-carrying HTTP client")?;
        let transport = Arc::new(HttpTransport::new(client, cookie_client));
        let prober = Prober::new(
            transport,
            Duration::from_secs(config.probe_timeout_seconds),
        );

        info!("Checking detection rules for {} sites", sites.len());
        let mut checks = Vec::with_capacity(sites.len());
        for site in sites {
            let check = prober.check_site(site).await;
            if check.passed() {
                info!("{}: ok", check.site_name);
            } else {
                warn!(
                    "{}: claimed_ok={:?} unclaimed_ok={:?}",
                    check.site_name, check.claimed_ok, check.unclaimed_ok
                );
            }
            checks.push(check);
        }
        Ok(checks)
    }
}
