//! Result set with read views.
//!
//! All indexes are derived from one backing list and every insertion
//! goes through [`ResultSet::insert`], so they cannot drift apart.

use std::collections::HashMap;

use crate::account::{Account, AccountKind};

/// Accounts produced by one search, at most one per (site, username)
/// pair, in insertion order.
#[derive(Default)]
pub struct ResultSet {
    order: Vec<Account>,
    by_pair: HashMap<(String, String), usize>,
    by_id: HashMap<String, usize>,
    by_site: HashMap<String, Vec<usize>>,
    by_user: HashMap<String, Vec<usize>>,
}

impl ResultSet {
    /// Adds a result unless its (site, username) pair is already present.
    /// Returns whether the account was inserted.
    pub fn insert(&mut self, account: Account) -> bool {
        let pair = (account.site.name.clone(), account.user_name.clone());
        if self.by_pair.contains_key(&pair) {
            return false;
        }
        let index = self.order.len();
        self.by_id.insert(account.id.clone(), index);
        self.by_site
            .entry(pair.0.clone())
            .or_default()
            .push(index);
        self.by_user
            .entry(pair.1.clone())
            .or_default()
            .push(index);
        self.by_pair.insert(pair, index);
        self.order.push(account);
        true
    }

    pub fn contains_pair(&self, site_name: &str, user_name: &str) -> bool {
        self.by_pair
            .contains_key(&(site_name.to_string(), user_name.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&Account> {
        self.by_id.get(id).map(|&index| &self.order[index])
    }

    pub fn for_site(&self, site_name: &str) -> Vec<&Account> {
        self.view(self.by_site.get(site_name))
    }

    pub fn for_user(&self, user_name: &str) -> Vec<&Account> {
        self.view(self.by_user.get(user_name))
    }

    /// Accounts that exist on their site: probed as registered, or
    /// registered and since claimed.
    pub fn discovered(&self) -> Vec<&Account> {
        self.filtered(|account| {
            matches!(
                account.kind,
                AccountKind::Registered(_) | AccountKind::Claimed { .. }
            )
        })
    }

    pub fn registered(&self) -> Vec<&Account> {
        self.filtered(|account| matches!(account.kind, AccountKind::Registered(_)))
    }

    pub fn unregistered(&self) -> Vec<&Account> {
        self.filtered(|account| matches!(account.kind, AccountKind::Unregistered(_)))
    }

    pub fn failed(&self) -> Vec<&Account> {
        self.filtered(|account| matches!(account.kind, AccountKind::Failed { .. }))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn view(&self, indexes: Option<&Vec<usize>>) -> Vec<&Account> {
        indexes
            .map(|list| list.iter().map(|&index| &self.order[index]).collect())
            .unwrap_or_default()
    }

    fn filtered<P>(&self, predicate: P) -> Vec<&Account>
    where
        P: Fn(&Account) -> bool,
    {
        self.order.iter().filter(|a| predicate(a)).collect()
    }
}
