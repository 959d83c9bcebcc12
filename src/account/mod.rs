//! Account lifecycle model.
//!
//! An [`Account`] names one (site, username) pair and tracks what we know
//! about it: discovered by a probe (registered/unregistered/failed),
//! promoted or demoted by the user (claimed/rejected), or entered by hand
//! (manual). Each account serializes to a flat document whose `type`
//! field selects the variant on the way back in.
//!
//! The same pair always hashes to the same base identifier. A copy scoped
//! to one search execution carries that search's key as a prefix, so the
//! standalone account and the per-search result coexist as separate
//! documents with independent revisions.

mod actions;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::catalog::Site;
use crate::error_handling::ModelError;
use crate::keys;
use crate::store::{AllDocsOptions, Document, DocumentStore};

const TYPE_REGISTERED: &str = "registered";
const TYPE_UNREGISTERED: &str = "unregistered";
const TYPE_FAILED: &str = "failed";
const TYPE_CLAIMED: &str = "claimed";
const TYPE_REJECTED: &str = "rejected";
const TYPE_MANUAL: &str = "manual";

/// The decision recorded on a probe-discovered account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionTaken {
    /// No decision yet.
    #[default]
    None,
    /// The user claimed the account as theirs.
    Claimed,
    /// The user rejected the account as someone else's.
    Rejected,
}

/// Fields shared by every probe-discovered account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoSearchData {
    /// First names found in the probed page body.
    pub matched_first_names: Vec<String>,
    /// Last names found in the probed page body.
    pub matched_last_names: Vec<String>,
    /// The decision recorded against this copy of the account.
    pub action_taken: ActionTaken,
}

/// Lifecycle state of an account, with the state-specific fields.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountKind {
    /// A probe found the account.
    Registered(AutoSearchData),
    /// A probe determined the account does not exist.
    Unregistered(AutoSearchData),
    /// A probe could not determine existence.
    Failed {
        data: AutoSearchData,
        reason: String,
    },
    /// A discovered account the user claimed.
    Claimed {
        data: AutoSearchData,
        claimed_at: DateTime<Utc>,
    },
    /// A discovered account the user rejected.
    Rejected {
        data: AutoSearchData,
        rejected_at: DateTime<Utc>,
    },
    /// An account entered by hand, never produced by a probe.
    Manual { last_edited_at: DateTime<Utc> },
}

/// One account on one site under one username.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Content-addressed identifier, optionally search-scoped (see [`keys`]).
    pub id: String,
    /// Store revision; empty until first persisted.
    pub revision: String,
    /// When this account record was first created.
    pub created_at: DateTime<Utc>,
    /// The site descriptor this account lives on.
    pub site: Site,
    /// The probed or entered username.
    pub user_name: String,
    /// Lifecycle state and its fields.
    pub kind: AccountKind,
}

/// Flat document shape shared by all account variants.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    rev: String,
    #[serde(rename = "type")]
    kind: String,
    created_at: DateTime<Utc>,
    site: Site,
    user_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    matched_first_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    matched_last_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action_taken: Option<ActionTaken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_edited_at: Option<DateTime<Utc>>,
}

impl Account {
    fn new(site: Site, user_name: &str, scope_prefix: &str, kind: AccountKind) -> Self {
        let id = format!(
            "{}{}",
            scope_prefix,
            keys::account_key(&site.name, user_name)
        );
        Account {
            id,
            revision: String::new(),
            created_at: Utc::now(),
            site,
            user_name: user_name.to_string(),
            kind,
        }
    }

    /// Account a probe found to exist. An empty `scope_prefix` places it
    /// in the global account partition.
    pub fn registered(
        site: Site,
        user_name: &str,
        scope_prefix: &str,
        matched_first_names: Vec<String>,
        matched_last_names: Vec<String>,
    ) -> Self {
        Account::new(
            site,
            user_name,
            scope_prefix,
            AccountKind::Registered(AutoSearchData {
                matched_first_names,
                matched_last_names,
                action_taken: ActionTaken::None,
            }),
        )
    }

    /// Account a probe found not to exist.
    pub fn unregistered(site: Site, user_name: &str, scope_prefix: &str) -> Self {
        Account::new(
            site,
            user_name,
            scope_prefix,
            AccountKind::Unregistered(AutoSearchData::default()),
        )
    }

    /// Account whose probe could not determine existence.
    pub fn failed(
        site: Site,
        user_name: &str,
        scope_prefix: &str,
        reason: impl Into<String>,
    ) -> Self {
        Account::new(
            site,
            user_name,
            scope_prefix,
            AccountKind::Failed {
                data: AutoSearchData::default(),
                reason: reason.into(),
            },
        )
    }

    /// Account entered by the user rather than discovered by a probe.
    /// Always lives in the global account partition.
    pub fn manual(site: Site, user_name: &str) -> Self {
        Account::new(
            site,
            user_name,
            "",
            AccountKind::Manual {
                last_edited_at: Utc::now(),
            },
        )
    }

    /// The `type` discriminant written into this account's document.
    pub fn kind_tag(&self) -> &'static str {
        match &self.kind {
            AccountKind::Registered(_) => TYPE_REGISTERED,
            AccountKind::Unregistered(_) => TYPE_UNREGISTERED,
            AccountKind::Failed { .. } => TYPE_FAILED,
            AccountKind::Claimed { .. } => TYPE_CLAIMED,
            AccountKind::Rejected { .. } => TYPE_REJECTED,
            AccountKind::Manual { .. } => TYPE_MANUAL,
        }
    }

    /// The decision recorded on this account. Claimed and rejected
    /// variants answer from their own identity so the discriminant and
    /// the recorded action can never disagree.
    pub fn action_taken(&self) -> ActionTaken {
        match &self.kind {
            AccountKind::Claimed { .. } => ActionTaken::Claimed,
            AccountKind::Rejected { .. } => ActionTaken::Rejected,
            AccountKind::Manual { .. } => ActionTaken::None,
            AccountKind::Registered(data)
            | AccountKind::Unregistered(data)
            | AccountKind::Failed { data, .. } => data.action_taken,
        }
    }

    /// Probe-derived fields, when this variant carries them.
    pub fn auto_data(&self) -> Option<&AutoSearchData> {
        match &self.kind {
            AccountKind::Registered(data)
            | AccountKind::Unregistered(data)
            | AccountKind::Failed { data, .. }
            | AccountKind::Claimed { data, .. }
            | AccountKind::Rejected { data, .. } => Some(data),
            AccountKind::Manual { .. } => None,
        }
    }

    pub(crate) fn set_action_taken(&mut self, action: ActionTaken) {
        match &mut self.kind {
            AccountKind::Registered(data)
            | AccountKind::Unregistered(data)
            | AccountKind::Failed { data, .. }
            | AccountKind::Claimed { data, .. }
            | AccountKind::Rejected { data, .. } => data.action_taken = action,
            AccountKind::Manual { .. } => {}
        }
    }

    /// How confident we are that this account belongs to the person being
    /// searched for, on a 0 to 10 scale. A confirmed registration is worth
    /// three points, each matched first name one, each matched last name
    /// two.
    pub fn confidence(&self) -> u8 {
        let base: usize = match &self.kind {
            AccountKind::Registered(_) => 3,
            _ => 0,
        };
        let score = match self.auto_data() {
            Some(data) => {
                base + data.matched_first_names.len() + 2 * data.matched_last_names.len()
            }
            None => 0,
        };
        score.min(10) as u8
    }

    /// Serializes this account to its flat document form.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Serde` if the document cannot be built.
    pub fn to_document(&self) -> Result<Document, ModelError> {
        let mut doc = AccountDoc {
            id: self.id.clone(),
            rev: self.revision.clone(),
            kind: self.kind_tag().to_string(),
            created_at: self.created_at,
            site: self.site.clone(),
            user_name: self.user_name.clone(),
            matched_first_names: Vec::new(),
            matched_last_names: Vec::new(),
            action_taken: None,
            reason: None,
            claimed_at: None,
            rejected_at: None,
            last_edited_at: None,
        };
        if let Some(data) = self.auto_data() {
            doc.matched_first_names = data.matched_first_names.clone();
            doc.matched_last_names = data.matched_last_names.clone();
            doc.action_taken = Some(self.action_taken());
        }
        match &self.kind {
            AccountKind::Failed { reason, .. } => doc.reason = Some(reason.clone()),
            AccountKind::Claimed { claimed_at, .. } => doc.claimed_at = Some(*claimed_at),
            AccountKind::Rejected { rejected_at, .. } => doc.rejected_at = Some(*rejected_at),
            AccountKind::Manual { last_edited_at } => {
                doc.last_edited_at = Some(*last_edited_at);
            }
            _ => {}
        }
        Ok(serde_json::to_value(&doc)?)
    }

    /// Reconstructs an account from its document, dispatching on the
    /// `type` discriminant. Deserializing the same document twice yields
    /// field-for-field equal accounts.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::UnknownAccountType` for an unrecognized
    /// discriminant, `ModelError::MalformedField` when a variant's
    /// required field is missing, and `ModelError::Serde` for documents
    /// that do not parse at all.
    pub fn from_document(doc: &Document) -> Result<Self, ModelError> {
        let parsed: AccountDoc = serde_json::from_value(doc.clone())?;
        let data = |action: Option<ActionTaken>| AutoSearchData {
            matched_first_names: parsed.matched_first_names.clone(),
            matched_last_names: parsed.matched_last_names.clone(),
            action_taken: action.or(parsed.action_taken).unwrap_or_default(),
        };
        let kind = match parsed.kind.as_str() {
            TYPE_REGISTERED => AccountKind::Registered(data(None)),
            TYPE_UNREGISTERED => AccountKind::Unregistered(data(None)),
            TYPE_FAILED => AccountKind::Failed {
                data: data(None),
                reason: parsed
                    .reason
                    .clone()
                    .ok_or(ModelError::MalformedField("reason"))?,
            },
            TYPE_CLAIMED => AccountKind::Claimed {
                data: data(Some(ActionTaken::Claimed)),
                claimed_at: parsed
                    .claimed_at
                    .ok_or(ModelError::MalformedField("claimedAt"))?,
            },
            TYPE_REJECTED => AccountKind::Rejected {
                data: data(Some(ActionTaken::Rejected)),
                rejected_at: parsed
                    .rejected_at
                    .ok_or(ModelError::MalformedField("rejectedAt"))?,
            },
            TYPE_MANUAL => AccountKind::Manual {
                last_edited_at: parsed
                    .last_edited_at
                    .ok_or(ModelError::MalformedField("lastEditedAt"))?,
            },
            other => return Err(ModelError::UnknownAccountType(other.to_string())),
        };
        Ok(Account {
            id: parsed.id,
            revision: parsed.rev,
            created_at: parsed.created_at,
            site: parsed.site,
            user_name: parsed.user_name,
            kind,
        })
    }

    /// Refreshes this account in place from a newer document for the same
    /// identifier.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::IdMismatch` when the document belongs to a
    /// different account.
    pub fn update_from(&mut self, doc: &Document) -> Result<(), ModelError> {
        let fresh = Account::from_document(doc)?;
        if fresh.id != self.id {
            return Err(ModelError::IdMismatch {
                expected: self.id.clone(),
                actual: fresh.id,
            });
        }
        *self = fresh;
        Ok(())
    }

    /// Persists this account and adopts the revision the store assigned.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the put fails, including on a
    /// revision conflict.
    pub async fn save(&mut self, store: &dyn DocumentStore) -> Result<(), ModelError> {
        let result = store.put(self.to_document()?).await?;
        self.revision = result.rev;
        Ok(())
    }

    /// Removes this account's document from the store.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the remove fails.
    pub async fn delete(&mut self, store: &dyn DocumentStore) -> Result<(), ModelError> {
        let result = store.remove(&self.id, &self.revision).await?;
        self.revision = result.rev;
        Ok(())
    }

    /// Loads one account by identifier.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the document is missing and a
    /// model error when it does not parse as an account.
    pub async fn load(store: &dyn DocumentStore, id: &str) -> Result<Self, ModelError> {
        let doc = store.get(id).await?;
        Account::from_document(&doc)
    }

    /// Loads every account in the global account partition. Documents
    /// that fail to parse are skipped with a warning rather than failing
    /// the whole scan.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` when the underlying scan fails.
    pub async fn load_all(store: &dyn DocumentStore) -> Result<Vec<Self>, ModelError> {
        let rows = store
            .all_docs(AllDocsOptions::for_prefix(keys::ACCOUNT_PREFIX))
            .await?;
        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(doc) = row.doc else { continue };
            match Account::from_document(&doc) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!("Skipping unreadable account document {}: {}", row.id, e),
            }
        }
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DetectionRule, Site};

    fn test_site(name: &str) -> Site {
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
            tags: vec![],
            username_claimed: None,
            username_unclaimed: None,
        }
    }

    #[test]
    fn test_same_pair_yields_same_base_id() {
        let a = Account::unregistered(test_site("Wikipedia"), "alice", "");
        let b = Account::registered(test_site("Wikipedia"), "alice", "", vec![], vec![]);
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("account/"));
    }

    #[test]
    fn test_scope_prefix_is_kept_in_id() {
        let prefix = "searchDef/1/search/2/searchResult/";
        let scoped = Account::unregistered(test_site("Wikipedia"), "alice", prefix);
        let base = Account::unregistered(test_site("Wikipedia"), "alice", "");
        assert!(scoped.id.starts_with(prefix));
        assert!(scoped.id.ends_with(&base.id));
        assert_ne!(scoped.id, base.id);
    }

    #[test]
    fn test_round_trip_preserves_every_variant() {
        let site = test_site("Wikipedia");
        let variants = vec![
            Account::registered(
                site.clone(),
                "alice",
                "",
                vec!["Alice".into()],
                vec!["Smith".into()],
            ),
            Account::unregistered(site.clone(), "alice", ""),
            Account::failed(site.clone(), "alice", "", "connect refused"),
            Account::manual(site.clone(), "alice"),
        ];
        for account in variants {
            let doc = account.to_document().unwrap();
            let back = Account::from_document(&doc).unwrap();
            assert_eq!(back, account, "variant {}", account.kind_tag());
        }
    }

    #[test]
    fn test_deserialize_is_idempotent() {
        let account = Account::registered(
            test_site("Wikipedia"),
            "alice",
            "",
            vec!["Alice".into()],
            vec![],
        );
        let doc = account.to_document().unwrap();
        let once = Account::from_document(&doc).unwrap();
        let twice = Account::from_document(&doc).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let mut doc = Account::manual(test_site("Wikipedia"), "alice")
            .to_document()
            .unwrap();
        doc["type"] = serde_json::json!("hallucinated");
        let err = Account::from_document(&doc).unwrap_err();
        assert!(matches!(err, ModelError::UnknownAccountType(t) if t == "hallucinated"));
    }

    #[test]
    fn test_confidence_scores_names_and_registration() {
        let none = Account::unregistered(test_site("A"), "u", "");
        assert_eq!(none.confidence(), 0);

        let registered = Account::registered(
            test_site("A"),
            "u",
            "",
            vec!["Alice".into()],
            vec!["Smith".into(), "Jones".into()],
        );
        // 3 for registration, 1 per first name, 2 per last name
        assert_eq!(registered.confidence(), 8);

        let saturated = Account::registered(
            test_site("A"),
            "u",
            "",
            vec!["a".into(); 5],
            vec!["b".into(); 5],
        );
        assert_eq!(saturated.confidence(), 10);
    }

    #[test]
    fn test_update_from_guards_identifier() {
        let mut account = Account::unregistered(test_site("Wikipedia"), "alice", "");
        let other = Account::unregistered(test_site("Wikipedia"), "bob", "");
        let err = account.update_from(&other.to_document().unwrap()).unwrap_err();
        assert!(matches!(err, ModelError::IdMismatch { .. }));
    }
}
