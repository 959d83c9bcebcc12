//! Search definitions: the frozen description of a repeatable search.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::execution::Search;
use crate::catalog::{Site, SiteCatalog};
use crate::error_handling::{ModelError, SearchError};
use crate::keys;
use crate::store::{AllDocsOptions, Document, DocumentStore};

const DOC_TYPE: &str = "searchDef";

/// Inputs for building a new definition.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub name: String,
    /// Explicit site names; unknown names are dropped with a warning.
    pub site_names: Vec<String>,
    pub user_names: Vec<String>,
    pub first_names: Vec<String>,
    pub last_names: Vec<String>,
    /// Tags pulling in every matching catalog site.
    pub tags: Vec<String>,
}

/// What a repeatable search covers. The site selection is computed once
/// at construction and never re-reads the catalog afterwards.
pub struct SearchDefinition {
    pub id: String,
    /// Store revision; empty until first persisted.
    pub revision: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_edited_at: DateTime<Utc>,
    pub included_sites: Vec<Site>,
    pub user_names: Vec<String>,
    pub first_names: Vec<String>,
    pub last_names: Vec<String>,
    pub tags: Vec<String>,
    /// Past executions, filled by [`SearchDefinition::load_history`].
    pub history: Vec<Search>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchDefinitionDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    rev: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    created_at: DateTime<Utc>,
    last_edited_at: DateTime<Utc>,
    included_sites: Vec<Site>,
    #[serde(default)]
    user_names: Vec<String>,
    #[serde(default)]
    first_names: Vec<String>,
    #[serde(default)]
    last_names: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl SearchDefinition {
    /// Builds a definition from explicit site names unioned with every
    /// catalog site carrying one of the given tags, deduplicated by site
    /// name. Sites flagged `omit` are left out either way.
    pub fn new(catalog: &SiteCatalog, params: SearchParams) -> Self {
        let mut included_sites = Vec::new();
        let mut seen = HashSet::new();
        for name in &params.site_names {
            match catalog.get(name) {
                Some(site) if site.omit => {
                    debug!("Site {} is flagged omit; leaving it out", name);
                }
                Some(site) => {
                    if seen.insert(site.name.clone()) {
                        included_sites.push(site.clone());
                    }
                }
                None => warn!("Site '{}' is not in the catalog; dropping it", name),
            }
        }
        for site in catalog.sites_with_tags(&params.tags) {
            if site.omit {
                continue;
            }
            if seen.insert(site.name.clone()) {
                included_sites.push(site.clone());
            }
        }

        let now = Utc::now();
        SearchDefinition {
            id: keys::new_search_def_key(),
            revision: String::new(),
            name: params.name,
            created_at: now,
            last_edited_at: now,
            included_sites,
            user_names: params.user_names,
            first_names: params.first_names,
            last_names: params.last_names,
            tags: params.tags,
            history: Vec::new(),
        }
    }

    /// Serializes the definition. History is not embedded; executions
    /// are their own documents under this definition's key.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Serde` if the document cannot be built.
    pub fn to_document(&self) -> Result<Document, ModelError> {
        let doc = SearchDefinitionDoc {
            id: self.id.clone(),
            rev: self.revision.clone(),
            kind: DOC_TYPE.to_string(),
            name: self.name.clone(),
            created_at: self.created_at,
            last_edited_at: self.last_edited_at,
            included_sites: self.included_sites.clone(),
            user_names: self.user_names.clone(),
            first_names: self.first_names.clone(),
            last_names: self.last_names.clone(),
            tags: self.tags.clone(),
        };
        Ok(serde_json::to_value(&doc)?)
    }

    /// Rebuilds a definition from its document, with an empty history.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::MalformedField` when the document is not a
    /// definition and `ModelError::Serde` when it does not parse.
    pub fn from_document(doc: &Document) -> Result<Self, ModelError> {
        let parsed: SearchDefinitionDoc = serde_json::from_value(doc.clone())?;
        if parsed.kind != DOC_TYPE {
            return Err(ModelError::MalformedField("type"));
        }
        Ok(SearchDefinition {
            id: parsed.id,
            revision: parsed.rev,
            name: parsed.name,
            created_at: parsed.created_at,
            last_edited_at: parsed.last_edited_at,
            included_sites: parsed.included_sites,
            user_names: parsed.user_names,
            first_names: parsed.first_names,
            last_names: parsed.last_names,
            tags: parsed.tags,
            history: Vec::new(),
        })
    }

    /// Persists the definition, bumping its last-edited timestamp.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the put fails.
    pub async fn save(&mut self, store: &dyn DocumentStore) -> Result<(), ModelError> {
        self.last_edited_at = Utc::now();
        let result = store.put(self.to_document()?).await?;
        self.revision = result.rev;
        Ok(())
    }

    /// Loads one definition by identifier.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the document is missing and a
    /// model error when it does not parse.
    pub async fn load(store: &dyn DocumentStore, id: &str) -> Result<Self, ModelError> {
        let doc = store.get(id).await?;
        SearchDefinition::from_document(&doc)
    }

    /// Loads every definition in the store. The definition prefix also
    /// covers execution and result documents, so rows are filtered by
    /// their `type` field; unreadable definitions are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the scan fails.
    pub async fn load_all(store: &dyn DocumentStore) -> Result<Vec<Self>, ModelError> {
        let rows = store
            .all_docs(AllDocsOptions::for_prefix(keys::SEARCH_DEF_PREFIX))
            .await?;
        let mut definitions = Vec::new();
        for row in rows {
            let Some(doc) = row.doc else { continue };
            if doc.get("type").and_then(|v| v.as_str()) != Some(DOC_TYPE) {
                continue;
            }
            match SearchDefinition::from_document(&doc) {
                Ok(definition) => definitions.push(definition),
                Err(e) => warn!("Skipping unreadable definition {}: {}", row.id, e),
            }
        }
        Ok(definitions)
    }

    /// Reloads this definition's past executions, oldest first. Result
    /// documents under the same prefix are ignored here; each execution
    /// reloads its own via [`Search::load_results`].
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the scan fails.
    pub async fn load_history(&mut self, store: &dyn DocumentStore) -> Result<(), ModelError> {
        let rows = store
            .all_docs(AllDocsOptions::for_prefix(&keys::search_prefix(&self.id)))
            .await?;
        let mut history = Vec::new();
        for row in rows {
            let Some(doc) = row.doc else { continue };
            if doc.get("type").and_then(|v| v.as_str()) != Some("search") {
                continue;
            }
            match Search::from_document(&doc, self) {
                Ok(search) => history.push(search),
                Err(e) => warn!("Skipping unreadable search document {}: {}", row.id, e),
            }
        }
        // The key embeds the start timestamp, so id order is chronological.
        history.sort_by(|a, b| a.id.cmp(&b.id));
        self.history = history;
        Ok(())
    }

    /// Creates a fresh execution of this definition, persisting the
    /// definition first if it never was.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Store` when that first save fails.
    pub async fn new_search(&mut self, store: &dyn DocumentStore) -> Result<Search, SearchError> {
        if self.revision.is_empty() {
            debug!("Persisting definition {} before its first search", self.id);
            self.save(store).await?;
        }
        Ok(Search::new(self))
    }

    /// Removes the definition and everything under it: executions and
    /// their result documents. Children that fail to remove are logged
    /// and skipped so one stale revision cannot strand the rest.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the scan or the definition's own
    /// removal fails.
    pub async fn remove(self, store: &dyn DocumentStore) -> Result<(), ModelError> {
        let rows = store
            .all_docs(AllDocsOptions::for_prefix(&keys::search_prefix(&self.id)).keys_only())
            .await?;
        for row in rows {
            if let Err(e) = store.remove(&row.id, &row.rev).await {
                warn!(
                    "Could not remove {} while deleting definition {}: {}",
                    row.id, self.id, e
                );
            }
        }
        store.remove(&self.id, &self.revision).await?;
        Ok(())
    }
}
