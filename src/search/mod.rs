//! Search definitions and their executions.
//!
//! A [`SearchDefinition`] freezes which sites, usernames and identity
//! names a repeatable search covers. Each run is a [`Search`], a state
//! machine driven site by site and username by username, which can be
//! paused, resumed from a saved cursor, or cancelled. Results accumulate
//! in a [`ResultSet`] with one entry per (site, username) pair.

mod definition;
mod execution;
mod results;

pub use definition::{SearchDefinition, SearchParams};
pub use execution::Search;
pub use results::ResultSet;

use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cache::CacheManager;
use crate::probe::Prober;
use crate::store::DocumentStore;

/// Lifecycle of one search execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    /// Built but never started.
    Created,
    /// Actively probing.
    InProgress,
    /// Interrupted with a saved resume cursor.
    Paused,
    /// Ran out of pairs to probe.
    Completed,
    /// Aborted by a persistence failure.
    Failed,
    /// Abandoned by the user; progress frozen where it was.
    Cancelled,
}

impl SearchState {
    /// The string stored in search documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchState::Created => "created",
            SearchState::InProgress => "inProgress",
            SearchState::Paused => "paused",
            SearchState::Completed => "completed",
            SearchState::Failed => "failed",
            SearchState::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<SearchState> {
        match value {
            "created" => Some(SearchState::Created),
            "inProgress" => Some(SearchState::InProgress),
            "paused" => Some(SearchState::Paused),
            "completed" => Some(SearchState::Completed),
            "failed" => Some(SearchState::Failed),
            "cancelled" => Some(SearchState::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchState::Completed | SearchState::Failed | SearchState::Cancelled
        )
    }
}

/// Where to pick a paused search back up.
///
/// The username index applies only to the first site visited after a
/// resume; every later site starts its usernames from zero again. That
/// way a search paused mid-site continues exactly where it stopped
/// without starving the remaining sites of the earlier usernames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCursor {
    pub site_index: usize,
    pub user_name_index: usize,
}

impl ResumeCursor {
    /// A fresh cursor means the search never made progress, which is
    /// what triggers the preload of already-known accounts.
    pub fn is_fresh(&self) -> bool {
        self.site_index == 0 && self.user_name_index == 0
    }

    pub fn reset(&mut self) {
        *self = ResumeCursor::default();
    }

    /// First username index to visit for a given site position.
    pub(crate) fn user_start(&self, site_index: usize) -> usize {
        if site_index == self.site_index {
            self.user_name_index
        } else {
            0
        }
    }
}

/// Shared handle onto a running search's state, for pausing or
/// cancelling from another task.
#[derive(Clone)]
pub struct SearchControl {
    state: Arc<Mutex<SearchState>>,
}

impl SearchControl {
    pub(crate) fn new(state: SearchState) -> Self {
        SearchControl {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn current(&self) -> SearchState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set(&self, state: SearchState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Asks a running search to stop after the probe in flight. Ignored
    /// unless the search is in progress.
    pub fn pause(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == SearchState::InProgress {
            *state = SearchState::Paused;
        } else {
            debug!("Ignoring pause request in state {}", state.as_str());
        }
    }

    /// Abandons the search. A no-op once the search reached a terminal
    /// state.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.is_terminal() {
            *state = SearchState::Cancelled;
        }
    }
}

/// Everything a search execution needs from the outside.
pub struct SearchContext {
    pub store: Arc<dyn DocumentStore>,
    pub prober: Arc<Prober>,
    pub caches: CacheManager,
}
