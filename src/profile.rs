//! Profile pages: named, user-curated collections of accounts.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::cache::CacheManager;
use crate::error_handling::ModelError;
use crate::keys;
use crate::store::{AllDocsOptions, Document, DocumentStore};

const DOC_TYPE: &str = "profile";

/// A page grouping accounts the user put together, stored as a list of
/// account identifiers.
pub struct ProfilePage {
    pub id: String,
    /// Store revision; empty until first persisted.
    pub revision: String,
    pub name: String,
    pub account_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfilePageDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    rev: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    account_ids: Vec<String>,
}

impl ProfilePage {
    pub fn new(name: &str) -> Self {
        ProfilePage {
            id: keys::new_profile_key(),
            revision: String::new(),
            name: name.to_string(),
            account_ids: Vec::new(),
        }
    }

    /// Adds an account reference unless it is already on the page.
    pub fn add_account(&mut self, account_id: &str) -> bool {
        if self.account_ids.iter().any(|id| id == account_id) {
            return false;
        }
        self.account_ids.push(account_id.to_string());
        true
    }

    pub fn remove_account(&mut self, account_id: &str) -> bool {
        let before = self.account_ids.len();
        self.account_ids.retain(|id| id != account_id);
        self.account_ids.len() != before
    }

    pub fn to_document(&self) -> Result<Document, ModelError> {
        let doc = ProfilePageDoc {
            id: self.id.clone(),
            rev: self.revision.clone(),
            kind: DOC_TYPE.to_string(),
            name: self.name.clone(),
            account_ids: self.account_ids.clone(),
        };
        Ok(serde_json::to_value(&doc)?)
    }

    pub fn from_document(doc: &Document) -> Result<Self, ModelError> {
        let parsed: ProfilePageDoc = serde_json::from_value(doc.clone())?;
        if parsed.kind != DOC_TYPE {
            return Err(ModelError::MalformedField("type"));
        }
        Ok(ProfilePage {
            id: parsed.id,
            revision: parsed.rev,
            name: parsed.name,
            account_ids: parsed.account_ids,
        })
    }

    /// # Errors
    ///
    /// Returns `ModelError::Store` when the put fails.
    pub async fn save(&mut self, store: &dyn DocumentStore) -> Result<(), ModelError> {
        let result = store.put(self.to_document()?).await?;
        self.revision = result.rev;
        Ok(())
    }

    pub async fn load(store: &dyn DocumentStore, id: &str) -> Result<Self, ModelError> {
        let doc = store.get(id).await?;
        ProfilePage::from_document(&doc)
    }

    /// Loads every profile page, skipping unreadable ones with a warning.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the scan fails.
    pub async fn load_all(store: &dyn DocumentStore) -> Result<Vec<Self>, ModelError> {
        let rows = store
            .all_docs(AllDocsOptions::for_prefix(keys::PROFILE_PREFIX))
            .await?;
        let mut pages = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(doc) = row.doc else { continue };
            match ProfilePage::from_document(&doc) {
                Ok(page) => pages.push(page),
                Err(e) => warn!("Skipping unreadable profile document {}: {}", row.id, e),
            }
        }
        Ok(pages)
    }

    /// Resolves the page's account references, preferring cached copies
    /// and fetching the rest in one bulk read. References that no longer
    /// resolve are skipped with a warning, preserving the page order for
    /// the rest.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the bulk read itself fails.
    pub async fn load_accounts(
        &self,
        store: &dyn DocumentStore,
        caches: &CacheManager,
    ) -> Result<Vec<Account>, ModelError> {
        let mut found: Vec<Option<Account>> = Vec::with_capacity(self.account_ids.len());
        let mut missing: Vec<(usize, String)> = Vec::new();
        for (index, id) in self.account_ids.iter().enumerate() {
            let cached = caches
                .accounts()
                .get(id)
                .or_else(|| caches.results().get(id));
            if cached.is_none() {
                missing.push((index, id.clone()));
            }
            found.push(cached);
        }

        if !missing.is_empty() {
            let ids: Vec<String> = missing.iter().map(|(_, id)| id.clone()).collect();
            let fetched = store.bulk_get(&ids).await?;
            for ((index, id), result) in missing.into_iter().zip(fetched) {
                match result {
                    Ok(doc) => match Account::from_document(&doc) {
                        Ok(account) => {
                            caches.adopt(&account);
                            found[index] = Some(account);
                        }
                        Err(e) => {
                            warn!("Profile '{}': account {} does not parse: {}", self.name, id, e)
                        }
                    },
                    Err(e) => warn!(
                        "Profile '{}': account {} could not be loaded: {}",
                        self.name, id, e
                    ),
                }
            }
        }

        Ok(found.into_iter().flatten().collect())
    }
}
