// Claim/reject lifecycle tests: a decision about a discovered account
// always lands at the global account-partition identifier, and flipping
// the decision overwrites it there.

mod helpers;

use account_scout::account::{Account, AccountKind, ActionTaken};
use account_scout::cache::CacheManager;
use account_scout::error_handling::ModelError;
use account_scout::keys;
use account_scout::profile::ProfilePage;

use helpers::{memory_store, status_site};

#[tokio::test]
async fn test_claim_copies_result_into_account_partition() {
    let site = status_site("Alpha");
    let store = memory_store();
    let caches = CacheManager::new();

    let scope = keys::result_scope("searchDef/1/search/2");
    let mut found = Account::registered(
        site.clone(),
        "carol",
        &scope,
        vec!["Carol".to_string()],
        vec![],
    );
    found.save(store.as_ref()).await.expect("save result");

    let claimed = found.claim(store.as_ref(), &caches).await.expect("claim");

    let base_id = keys::account_key("Alpha", "carol");
    assert_eq!(claimed.id, base_id);
    assert!(matches!(claimed.kind, AccountKind::Claimed { .. }));
    assert_eq!(claimed.action_taken(), ActionTaken::Claimed);

    // The search result itself is marked, not replaced.
    assert!(keys::is_result_id(&found.id));
    assert_eq!(found.action_taken(), ActionTaken::Claimed);
    assert!(matches!(found.kind, AccountKind::Registered(_)));
    assert!(found.revision.starts_with("2-"));

    // Both copies are persisted and cached in their partitions.
    let stored = Account::load(store.as_ref(), &base_id)
        .await
        .expect("load claimed");
    assert!(matches!(stored.kind, AccountKind::Claimed { .. }));
    assert_eq!(
        stored.auto_data().expect("data").matched_first_names,
        vec!["Carol".to_string()]
    );
    assert!(caches.results().has(&found.id));
    assert!(caches.accounts().has(&base_id));
}

#[tokio::test]
async fn test_reject_overwrites_claim_at_the_same_identifier() {
    let site = status_site("Alpha");
    let store = memory_store();
    let caches = CacheManager::new();

    let scope = keys::result_scope("searchDef/1/search/2");
    let mut found = Account::registered(site.clone(), "carol", &scope, vec![], vec![]);
    found.save(store.as_ref()).await.expect("save result");

    let claimed = found.claim(store.as_ref(), &caches).await.expect("claim");
    assert!(claimed.revision.starts_with("1-"));

    let rejected = found.reject(store.as_ref(), &caches).await.expect("reject");
    assert_eq!(rejected.id, claimed.id);
    assert!(rejected.revision.starts_with("2-"));
    assert!(matches!(rejected.kind, AccountKind::Rejected { .. }));

    // Only the rejection is resolvable now.
    let stored = Account::load(store.as_ref(), &rejected.id)
        .await
        .expect("load decision");
    assert!(matches!(stored.kind, AccountKind::Rejected { .. }));
    assert_eq!(stored.action_taken(), ActionTaken::Rejected);
    assert_eq!(found.action_taken(), ActionTaken::Rejected);
}

#[tokio::test]
async fn test_repeated_claim_updates_in_place() {
    let site = status_site("Alpha");
    let store = memory_store();
    let caches = CacheManager::new();

    let scope = keys::result_scope("searchDef/1/search/2");
    let mut found = Account::registered(site.clone(), "carol", &scope, vec![], vec![]);
    found.save(store.as_ref()).await.expect("save result");

    let first = found.claim(store.as_ref(), &caches).await.expect("claim");
    let second = found.claim(store.as_ref(), &caches).await.expect("reclaim");

    assert_eq!(first.id, second.id);
    assert!(second.revision.starts_with("2-"));
    assert!(matches!(second.kind, AccountKind::Claimed { .. }));
}

#[tokio::test]
async fn test_reject_flips_the_claimed_copy_in_place() {
    let site = status_site("Alpha");
    let store = memory_store();
    let caches = CacheManager::new();

    let scope = keys::result_scope("searchDef/1/search/2");
    let mut found = Account::registered(site.clone(), "carol", &scope, vec![], vec![]);
    found.save(store.as_ref()).await.expect("save result");

    // The claimed copy lives at the base identifier; deciding on it again
    // must overwrite that same document, not conflict with it.
    let mut claimed = found.claim(store.as_ref(), &caches).await.expect("claim");
    let mut rejected = claimed
        .reject(store.as_ref(), &caches)
        .await
        .expect("reject the claimed copy");

    assert_eq!(rejected.id, claimed.id);
    assert!(rejected.revision.starts_with("2-"));
    let stored = Account::load(store.as_ref(), &rejected.id)
        .await
        .expect("load decision");
    assert!(matches!(stored.kind, AccountKind::Rejected { .. }));

    // Flipping back continues the same revision lineage.
    let reclaimed = rejected
        .claim(store.as_ref(), &caches)
        .await
        .expect("reclaim");
    assert_eq!(reclaimed.id, claimed.id);
    assert!(reclaimed.revision.starts_with("3-"));
    assert!(matches!(reclaimed.kind, AccountKind::Claimed { .. }));
}

#[tokio::test]
async fn test_claim_on_an_unscoped_account_overwrites_its_document() {
    let site = status_site("Alpha");
    let store = memory_store();
    let caches = CacheManager::new();

    // An account already living at the base identifier, as seeded known
    // accounts in a later search's results are.
    let mut known = Account::registered(site.clone(), "erin", "", vec![], vec![]);
    known.save(store.as_ref()).await.expect("save known");
    assert_eq!(known.id, keys::account_key("Alpha", "erin"));

    let claimed = known.claim(store.as_ref(), &caches).await.expect("claim");
    assert_eq!(claimed.id, known.id);
    assert!(claimed.revision.starts_with("2-"));
    let stored = Account::load(store.as_ref(), &known.id)
        .await
        .expect("load decision");
    assert!(matches!(stored.kind, AccountKind::Claimed { .. }));

    // The instance tracks the new revision, so a flip through it works.
    let rejected = known.reject(store.as_ref(), &caches).await.expect("reject");
    assert!(rejected.revision.starts_with("3-"));
    assert!(matches!(rejected.kind, AccountKind::Rejected { .. }));

    // No result-scoped copy is involved anywhere in this flow.
    assert!(caches.results().is_empty());
    assert!(caches.accounts().has(&known.id));
}

#[tokio::test]
async fn test_manual_accounts_cannot_be_claimed_or_rejected() {
    let site = status_site("Alpha");
    let store = memory_store();
    let caches = CacheManager::new();

    let mut entered = Account::manual(site.clone(), "dan");
    entered.save(store.as_ref()).await.expect("save manual");

    let err = entered
        .claim(store.as_ref(), &caches)
        .await
        .expect_err("claim manual");
    assert!(matches!(err, ModelError::InvalidAction { .. }));

    let err = entered
        .reject(store.as_ref(), &caches)
        .await
        .expect_err("reject manual");
    assert!(matches!(err, ModelError::InvalidAction { .. }));

    // The manual entry is untouched.
    assert!(matches!(entered.kind, AccountKind::Manual { .. }));
    assert_eq!(entered.action_taken(), ActionTaken::None);
}

#[tokio::test]
async fn test_profile_page_resolves_claimed_accounts() {
    let site = status_site("Alpha");
    let store = memory_store();
    let caches = CacheManager::new();

    let scope = keys::result_scope("searchDef/1/search/2");
    let mut found = Account::registered(site.clone(), "carol", &scope, vec![], vec![]);
    found.save(store.as_ref()).await.expect("save result");
    let claimed = found.claim(store.as_ref(), &caches).await.expect("claim");

    let mut page = ProfilePage::new("mine");
    assert!(page.add_account(&claimed.id));
    assert!(!page.add_account(&claimed.id));
    page.add_account("account/deadbeef");
    page.save(store.as_ref()).await.expect("save page");

    // Resolve through a fresh cache manager to force store reads; the
    // dangling identifier is skipped.
    let fresh = CacheManager::new();
    let resolved = page
        .load_accounts(store.as_ref(), &fresh)
        .await
        .expect("load_accounts");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, claimed.id);
    assert!(matches!(resolved[0].kind, AccountKind::Claimed { .. }));
}
