//! Claim and reject decisions on discovered accounts.
//!
//! Both actions produce a fresh account under the *global* account
//! partition identifier, even when invoked on a search-scoped result
//! copy. The result copy stays where it is and merely records the
//! decision, so a later search can still see what was decided.

use chrono::Utc;
use log::debug;

use super::{Account, AccountKind, ActionTaken, AutoSearchData};
use crate::cache::CacheManager;
use crate::error_handling::{ModelError, StoreError};
use crate::keys;
use crate::store::{doc_rev, DocumentStore};

impl Account {
    /// Marks this account as belonging to the searched-for person.
    ///
    /// Creates (or overwrites) the claimed copy at the account-partition
    /// identifier, records the decision on this instance, persists the
    /// documents, and registers them in the caches. Claiming an account
    /// that already lives at that identifier overwrites it in place.
    /// Re-claiming an already claimed account is tolerated and refreshes
    /// the claim timestamp.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidAction` for manual accounts and
    /// `ModelError::Store` when persisting either copy fails.
    pub async fn claim(
        &mut self,
        store: &dyn DocumentStore,
        caches: &CacheManager,
    ) -> Result<Account, ModelError> {
        self.decide(store, caches, ActionTaken::Claimed).await
    }

    /// Marks this account as belonging to someone else.
    ///
    /// Symmetric to [`Account::claim`]: the rejected copy lands at the
    /// same account-partition identifier, so flipping a decision always
    /// overwrites the previous one rather than leaving both resolvable.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidAction` for manual accounts and
    /// `ModelError::Store` when persisting either copy fails.
    pub async fn reject(
        &mut self,
        store: &dyn DocumentStore,
        caches: &CacheManager,
    ) -> Result<Account, ModelError> {
        self.decide(store, caches, ActionTaken::Rejected).await
    }

    async fn decide(
        &mut self,
        store: &dyn DocumentStore,
        caches: &CacheManager,
        action: ActionTaken,
    ) -> Result<Account, ModelError> {
        let action_name = if action == ActionTaken::Claimed {
            "claim"
        } else {
            "reject"
        };
        if matches!(self.kind, AccountKind::Manual { .. }) {
            return Err(ModelError::InvalidAction {
                action: action_name,
                kind: "manual",
            });
        }
        if self.action_taken() == action {
            debug!(
                "Repeating {} on {} ({}); refreshing the existing decision",
                action_name, self.site.name, self.user_name
            );
        }

        let data = AutoSearchData {
            matched_first_names: self
                .auto_data()
                .map(|d| d.matched_first_names.clone())
                .unwrap_or_default(),
            matched_last_names: self
                .auto_data()
                .map(|d| d.matched_last_names.clone())
                .unwrap_or_default(),
            action_taken: action,
        };
        let kind = if action == ActionTaken::Claimed {
            AccountKind::Claimed {
                data,
                claimed_at: Utc::now(),
            }
        } else {
            AccountKind::Rejected {
                data,
                rejected_at: Utc::now(),
            }
        };

        // The decision always lands at the unscoped identifier. A scoped
        // source keeps its own document and merely records the decision;
        // an unscoped source is itself the document being replaced, so it
        // gets no separate write.
        let base_id = keys::account_key(&self.site.name, &self.user_name);
        let source_is_base = self.id == base_id;
        self.set_action_taken(action);
        if !source_is_base {
            self.save(store).await?;
        }

        // Fetched after the source save: reuse whatever revision is stored
        // under the base id right now, so claim/reject cycles keep updating
        // one document instead of piling up conflicts.
        let existing_rev = match store.get(&base_id).await {
            Ok(doc) => doc_rev(&doc).to_string(),
            Err(StoreError::NotFound(_)) => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut decided = Account {
            id: base_id,
            revision: existing_rev,
            created_at: self.created_at,
            site: self.site.clone(),
            user_name: self.user_name.clone(),
            kind,
        };
        decided.save(store).await?;

        if source_is_base {
            // This instance's document was just superseded; track the new
            // revision so a later flip through it still lands cleanly.
            self.revision = decided.revision.clone();
        } else {
            caches.adopt(self);
        }
        caches.adopt(&decided);
        Ok(decided)
    }
}
