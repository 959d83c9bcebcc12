//! Hierarchical document identifiers.
//!
//! Every persisted document lives under a slash-joined key. Accounts are
//! content-addressed: the base segment is `account/<sha256(site, username)>`,
//! so the same (site, username) pair always resolves to the same identifier.
//! An account produced as the result of a specific search carries that
//! search's scope as a prefix, which places it in the result partition:
//!
//! ```text
//! account/<hash>                                          account partition
//! searchDef/<id>                                          search definition
//! searchDef/<id>/search/<millis>                          one execution
//! searchDef/<id>/search/<millis>/searchResult/account/<hash>   result partition
//! profile/<millis>                                        profile page
//! settings                                                app settings
//! ```
//!
//! Prefix scans bound the range with [`KEY_RANGE_END`], a sentinel that
//! sorts above every character the key alphabet uses.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Separator between key segments.
pub const KEY_SEPARATOR: &str = "/";

/// Prefix of account-partition documents.
pub const ACCOUNT_PREFIX: &str = "account/";

/// Prefix of search definition documents.
pub const SEARCH_DEF_PREFIX: &str = "searchDef/";

/// Segment introducing one execution under its definition.
pub const SEARCH_SEGMENT: &str = "search/";

/// Segment introducing the result partition under one execution.
pub const RESULT_SEGMENT: &str = "searchResult/";

/// Prefix of profile page documents.
pub const PROFILE_PREFIX: &str = "profile/";

/// Identifier of the singleton settings document.
pub const SETTINGS_KEY: &str = "settings";

/// High-key sentinel bounding a prefix scan. Sorts above every ASCII
/// character, so `prefix..prefix+KEY_RANGE_END` covers exactly the keys
/// starting with `prefix`.
pub const KEY_RANGE_END: &str = "\u{fff0}";

/// Separator between the hashed fields, so ("ab", "c") and ("a", "bc")
/// cannot collide.
const HASH_FIELD_SEPARATOR: &[u8] = b"\x1f";

/// Marker present in every result-partition account identifier.
const RESULT_ACCOUNT_MARKER: &str = "searchResult/account/";

/// Content hash of a (site, username) pair.
pub fn account_hash(site_name: &str, user_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site_name.as_bytes());
    hasher.update(HASH_FIELD_SEPARATOR);
    hasher.update(user_name.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Account-partition identifier for a (site, username) pair.
pub fn account_key(site_name: &str, user_name: &str) -> String {
    format!("{}{}", ACCOUNT_PREFIX, account_hash(site_name, user_name))
}

static LAST_KEY_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Millisecond timestamp for key generation, nudged forward when two
/// calls land in the same millisecond so fresh keys never repeat.
pub(crate) fn unique_millis() -> i64 {
    let now = Utc::now().timestamp_millis();
    let mut last = LAST_KEY_MILLIS.load(Ordering::SeqCst);
    loop {
        let candidate = now.max(last + 1);
        match LAST_KEY_MILLIS.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Fresh search definition identifier, keyed by creation time.
pub fn new_search_def_key() -> String {
    format!("{}{}", SEARCH_DEF_PREFIX, unique_millis())
}

/// Identifier of one execution under its definition.
pub fn search_key(definition_id: &str, millis: i64) -> String {
    format!(
        "{}{}{}{}",
        definition_id, KEY_SEPARATOR, SEARCH_SEGMENT, millis
    )
}

/// Prefix covering every execution (and its results) under a definition.
pub fn search_prefix(definition_id: &str) -> String {
    format!("{}{}{}", definition_id, KEY_SEPARATOR, SEARCH_SEGMENT)
}

/// Result-partition prefix of one execution. Prepending this to an account
/// key scopes the account to that execution.
pub fn result_scope(search_id: &str) -> String {
    format!("{}{}{}", search_id, KEY_SEPARATOR, RESULT_SEGMENT)
}

/// Fresh profile page identifier, keyed by creation time.
pub fn new_profile_key() -> String {
    format!("{}{}", PROFILE_PREFIX, unique_millis())
}

/// Whether the identifier lives in the result partition.
pub fn is_result_id(id: &str) -> bool {
    id.contains(RESULT_SEGMENT)
}

/// Whether the identifier names an account document in either partition.
pub fn is_account_doc_id(id: &str) -> bool {
    id.starts_with(ACCOUNT_PREFIX) || id.contains(RESULT_ACCOUNT_MARKER)
}

/// Inclusive upper bound for a scan over keys starting with `prefix`.
pub fn prefix_end(prefix: &str) -> String {
    format!("{}{}", prefix, KEY_RANGE_END)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_key_is_stable() {
        let a = account_key("Wikipedia", "jdoe");
        let b = account_key("Wikipedia", "jdoe");
        assert_eq!(a, b);
        assert!(a.starts_with(ACCOUNT_PREFIX));
    }

    #[test]
    fn test_account_key_distinguishes_pairs() {
        assert_ne!(account_key("Wikipedia", "jdoe"), account_key("GitHub", "jdoe"));
        assert_ne!(account_key("Wikipedia", "jdoe"), account_key("Wikipedia", "jane"));
    }

    #[test]
    fn test_field_separator_prevents_concatenation_collisions() {
        assert_ne!(account_key("ab", "c"), account_key("a", "bc"));
    }

    #[test]
    fn test_scoped_key_contains_and_starts_with_scope() {
        let scope = result_scope("searchDef/1/search/2");
        let id = format!("{}{}", scope, account_key("Wikipedia", "jdoe"));
        assert!(id.starts_with(&scope));
        assert!(id.contains(&scope));
        assert!(is_result_id(&id));
        assert!(is_account_doc_id(&id));
    }

    #[test]
    fn test_partition_classification() {
        let base = account_key("Wikipedia", "jdoe");
        assert!(!is_result_id(&base));
        assert!(is_account_doc_id(&base));
        assert!(!is_account_doc_id("searchDef/1"));
        assert!(!is_account_doc_id("profile/5"));
    }

    #[test]
    fn test_search_keys_nest_under_definition() {
        let search_id = search_key("searchDef/17", 42);
        assert_eq!(search_id, "searchDef/17/search/42");
        assert!(search_id.starts_with("searchDef/17"));
        assert!(search_id.starts_with(&search_prefix("searchDef/17")));
    }

    #[test]
    fn test_prefix_end_sorts_above_members() {
        let end = prefix_end(ACCOUNT_PREFIX);
        let member = account_key("Wikipedia", "jdoe");
        assert!(member > ACCOUNT_PREFIX.to_string());
        assert!(member < end);
        // but not above the next sibling prefix
        assert!(end < "searchDef/".to_string());
    }

    #[test]
    fn test_fresh_keys_never_repeat_within_a_millisecond() {
        let keys: Vec<String> = (0..5).map(|_| new_search_def_key()).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
