//! One search execution: the driving loop and its persistence.
//!
//! The loop walks the site × username cross-product sequentially, one
//! probe at a time, checking for a pause or cancel request before every
//! probe. Pausing writes the position into the resume cursor; a later
//! start picks the iteration back up from there. Results are persisted
//! and cached as they arrive, so an interrupted search loses at most the
//! probe that was in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::definition::SearchDefinition;
use super::results::ResultSet;
use super::{ResumeCursor, SearchContext, SearchControl, SearchState};
use crate::account::{Account, AccountKind};
use crate::cache::CacheManager;
use crate::catalog::Site;
use crate::error_handling::{ModelError, SearchError};
use crate::events::{EventBus, Notice, SubscriptionId, Topic};
use crate::keys;
use crate::probe::ResultScope;
use crate::store::{AllDocsOptions, Document, DocumentStore};

const DOC_TYPE: &str = "search";

/// A single execution of a search definition.
pub struct Search {
    /// Hierarchical identifier under the owning definition's key.
    pub id: String,
    /// Store revision; empty until first persisted.
    pub revision: String,
    /// Identifier of the definition this run belongs to.
    pub definition_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub(crate) control: SearchControl,
    pub(crate) cursor: ResumeCursor,
    pub(crate) sites: Arc<Vec<Site>>,
    pub(crate) user_names: Arc<Vec<String>>,
    pub(crate) first_names: Arc<Vec<String>>,
    pub(crate) last_names: Arc<Vec<String>>,
    results: ResultSet,
    bus: EventBus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    rev: String,
    #[serde(rename = "type")]
    kind: String,
    state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ended_at: Option<DateTime<Utc>>,
    definition_id: String,
    last_site_index: usize,
    last_user_name_index: usize,
}

impl Search {
    pub(crate) fn new(definition: &SearchDefinition) -> Self {
        Search {
            id: keys::search_key(&definition.id, keys::unique_millis()),
            revision: String::new(),
            definition_id: definition.id.clone(),
            started_at: None,
            ended_at: None,
            control: SearchControl::new(SearchState::Created),
            cursor: ResumeCursor::default(),
            sites: Arc::new(definition.included_sites.clone()),
            user_names: Arc::new(definition.user_names.clone()),
            first_names: Arc::new(definition.first_names.clone()),
            last_names: Arc::new(definition.last_names.clone()),
            results: ResultSet::default(),
            bus: EventBus::new(),
        }
    }

    pub fn state(&self) -> SearchState {
        self.control.current()
    }

    /// Handle for pausing or cancelling this search from another task.
    pub fn control(&self) -> SearchControl {
        self.control.clone()
    }

    /// Where the next start would resume.
    pub fn cursor(&self) -> ResumeCursor {
        self.cursor
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    /// Percentage of the site × username cross-product resolved so far.
    /// An empty cross-product is vacuously complete.
    pub fn progress(&self) -> u8 {
        let denominator = self.sites.len() * self.user_names.len();
        if denominator == 0 {
            return 100;
        }
        let ratio = self.results.len() as f64 / denominator as f64;
        ((100.0 * ratio).round() as u8).min(100)
    }

    /// Subscribes to this search's notices. A `Result` notice carries
    /// the identifier of each newly recorded account.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub(crate) fn record_result(&mut self, account: Account) -> bool {
        let id = account.id.clone();
        if self.results.insert(account) {
            self.bus.emit(Notice::about(Topic::Result, &id));
            true
        } else {
            false
        }
    }

    fn result_scope(&self) -> ResultScope {
        ResultScope {
            prefix: keys::result_scope(&self.id),
            first_names: (*self.first_names).clone(),
            last_names: (*self.last_names).clone(),
        }
    }

    /// Serializes the execution state. Results are not embedded; they
    /// live as their own documents under this search's result scope.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Serde` if the document cannot be built.
    pub fn to_document(&self) -> Result<Document, ModelError> {
        let doc = SearchDoc {
            id: self.id.clone(),
            rev: self.revision.clone(),
            kind: DOC_TYPE.to_string(),
            state: self.state().as_str().to_string(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            definition_id: self.definition_id.clone(),
            last_site_index: self.cursor.site_index,
            last_user_name_index: self.cursor.user_name_index,
        };
        Ok(serde_json::to_value(&doc)?)
    }

    /// Rebuilds a search from its document. Sites and names come from
    /// the owning definition; results are reloaded separately via
    /// [`Search::load_results`].
    ///
    /// # Errors
    ///
    /// Returns `ModelError::IdMismatch` when the document belongs to a
    /// different definition and `ModelError::MalformedField` for an
    /// unrecognized state or type.
    pub fn from_document(
        doc: &Document,
        definition: &SearchDefinition,
    ) -> Result<Self, ModelError> {
        let parsed: SearchDoc = serde_json::from_value(doc.clone())?;
        if parsed.kind != DOC_TYPE {
            return Err(ModelError::MalformedField("type"));
        }
        if parsed.definition_id != definition.id {
            return Err(ModelError::IdMismatch {
                expected: definition.id.clone(),
                actual: parsed.definition_id,
            });
        }
        let state =
            SearchState::parse(&parsed.state).ok_or(ModelError::MalformedField("state"))?;
        Ok(Search {
            id: parsed.id,
            revision: parsed.rev,
            definition_id: parsed.definition_id,
            started_at: parsed.started_at,
            ended_at: parsed.ended_at,
            control: SearchControl::new(state),
            cursor: ResumeCursor {
                site_index: parsed.last_site_index,
                user_name_index: parsed.last_user_name_index,
            },
            sites: Arc::new(definition.included_sites.clone()),
            user_names: Arc::new(definition.user_names.clone()),
            first_names: Arc::new(definition.first_names.clone()),
            last_names: Arc::new(definition.last_names.clone()),
            results: ResultSet::default(),
            bus: EventBus::new(),
        })
    }

    /// Persists the execution state and adopts the assigned revision.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the put fails.
    pub async fn save(&mut self, store: &dyn DocumentStore) -> Result<(), ModelError> {
        let result = store.put(self.to_document()?).await?;
        self.revision = result.rev;
        Ok(())
    }

    /// Reloads this search's result documents from its result scope,
    /// registering each in the caches. Returns how many were loaded.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the scan fails; unreadable
    /// individual documents are skipped with a warning.
    pub async fn load_results(
        &mut self,
        store: &dyn DocumentStore,
        caches: &CacheManager,
    ) -> Result<usize, ModelError> {
        let rows = store
            .all_docs(AllDocsOptions::for_prefix(&keys::result_scope(&self.id)))
            .await?;
        let mut loaded = 0;
        for row in rows {
            let Some(doc) = row.doc else { continue };
            match Account::from_document(&doc) {
                Ok(account) => {
                    caches.adopt(&account);
                    if self.results.insert(account) {
                        loaded += 1;
                    }
                }
                Err(e) => warn!("Skipping unreadable result document {}: {}", row.id, e),
            }
        }
        Ok(loaded)
    }

    /// Runs (or resumes) this search to its next stopping point.
    ///
    /// Probe failures are folded into failed accounts and never abort
    /// the run; a persistence failure marks the search failed. Either
    /// way the final state is saved before returning.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::InvalidTransition` when called in any state
    /// other than created or paused, and `SearchError::Store` when the
    /// terminal save itself fails.
    pub async fn start(&mut self, ctx: &SearchContext) -> Result<(), SearchError> {
        match self.control.current() {
            SearchState::Created => self.started_at = Some(Utc::now()),
            SearchState::Paused => info!(
                "Resuming search {} from site {} / username {}",
                self.id, self.cursor.site_index, self.cursor.user_name_index
            ),
            other => {
                return Err(SearchError::InvalidTransition {
                    op: "start",
                    state: other.as_str(),
                });
            }
        }
        self.control.set(SearchState::InProgress);
        self.save(ctx.store.as_ref()).await?;

        match drive(self, ctx).await {
            Ok(DriveOutcome::Finished) => {
                // An exhausted loop means every pair has a result.
                debug_assert_eq!(self.progress(), 100);
                self.control.set(SearchState::Completed);
                self.ended_at = Some(Utc::now());
                self.save(ctx.store.as_ref()).await?;
                info!(
                    "Search {} completed with {} results",
                    self.id,
                    self.results.len()
                );
            }
            Ok(DriveOutcome::Paused) => {
                self.save(ctx.store.as_ref()).await?;
                info!(
                    "Search {} paused at site {} / username {}",
                    self.id, self.cursor.site_index, self.cursor.user_name_index
                );
            }
            Ok(DriveOutcome::Cancelled) => {
                self.ended_at = Some(Utc::now());
                self.save(ctx.store.as_ref()).await?;
                info!("Search {} cancelled", self.id);
            }
            Err(e) => {
                error!("Search {} failed: {}", self.id, e);
                self.control.set(SearchState::Failed);
                self.ended_at = Some(Utc::now());
                if let Err(save_err) = self.save(ctx.store.as_ref()).await {
                    error!(
                        "Could not persist failed state for search {}: {}",
                        self.id, save_err
                    );
                }
            }
        }
        Ok(())
    }

    /// Continues a paused search. Any other state is a logged no-op.
    ///
    /// # Errors
    ///
    /// Same as [`Search::start`].
    pub async fn resume(&mut self, ctx: &SearchContext) -> Result<(), SearchError> {
        if self.control.current() != SearchState::Paused {
            warn!(
                "Resume requested for search {} in state {}; ignoring",
                self.id,
                self.state().as_str()
            );
            return Ok(());
        }
        self.start(ctx).await
    }
}

enum DriveOutcome {
    Finished,
    Paused,
    Cancelled,
}

/// Walks the cross-product from the search's cursor. On pause the cursor
/// is updated to the interrupted position; on cancel it is left exactly
/// where the last save put it; on completion it resets to fresh.
async fn drive(search: &mut Search, ctx: &SearchContext) -> Result<DriveOutcome, SearchError> {
    if search.cursor.is_fresh() {
        preload_known_accounts(search, ctx).await?;
    }

    let sites = Arc::clone(&search.sites);
    let user_names = Arc::clone(&search.user_names);
    let scope = search.result_scope();
    let resume = search.cursor;

    for site_index in resume.site_index..sites.len() {
        let site = &sites[site_index];
        for user_index in resume.user_start(site_index)..user_names.len() {
            let user_name = &user_names[user_index];
            match search.control.current() {
                SearchState::Cancelled => return Ok(DriveOutcome::Cancelled),
                SearchState::Paused => {
                    search.cursor = ResumeCursor {
                        site_index,
                        user_name_index: user_index,
                    };
                    return Ok(DriveOutcome::Paused);
                }
                _ => {}
            }
            if site.omit {
                debug!("Skipping omitted site {}", site.name);
                continue;
            }
            if search.results.contains_pair(&site.name, user_name) {
                debug!(
                    "Skipping {} for '{}': pair already resolved",
                    site.name, user_name
                );
                continue;
            }

            let mut account = ctx.prober.find_account(site, user_name, Some(&scope)).await;
            account.save(ctx.store.as_ref()).await?;
            ctx.caches.adopt(&account);
            search.record_result(account);
        }
    }

    search.cursor.reset();
    Ok(DriveOutcome::Finished)
}

/// Seeds the result set with accounts already resolved by earlier
/// searches or manual review, so they are not probed again. Manual
/// accounts never seed results. Cache notifications are held back for
/// the duration of the sweep.
async fn preload_known_accounts(
    search: &mut Search,
    ctx: &SearchContext,
) -> Result<(), SearchError> {
    let _quiet = ctx.caches.suspend_events();
    let known = Account::load_all(ctx.store.as_ref()).await?;
    debug!("Preloading {} known accounts", known.len());
    for account in &known {
        ctx.caches.adopt(account);
    }

    let sites = Arc::clone(&search.sites);
    let user_names = Arc::clone(&search.user_names);
    for site in sites.iter() {
        for user_name in user_names.iter() {
            let base_id = keys::account_key(&site.name, user_name);
            let Some(account) = ctx.caches.accounts().get(&base_id) else {
                continue;
            };
            if matches!(account.kind, AccountKind::Manual { .. }) {
                continue;
            }
            search.record_result(account);
        }
    }
    Ok(())
}
