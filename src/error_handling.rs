//! Error types and probe failure tracking.
//!
//! Each subsystem carries its own `thiserror` enum; `anyhow` wraps them with
//! context only at the application boundary. Probe failures additionally
//! feed [`ProbeStats`] counters for the end-of-run summary.

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use strum::IntoEnumIterator;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;
use tokio_retry::strategy::ExponentialBackoff;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),
}

/// Error types for document store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No live document under the identifier.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The write carried a stale or missing revision token.
    #[error("revision conflict on {id}: write carried {supplied:?}, store has {current:?}")]
    Conflict {
        /// Identifier of the contested document.
        id: String,
        /// Revision supplied by the caller (empty for "new document").
        supplied: String,
        /// Revision currently held by the store.
        current: String,
    },

    /// A document passed to `put` was not a JSON object.
    #[error("document is not a JSON object")]
    NotAnObject,

    /// A document passed to `put` had no `_id` field.
    #[error("document has no _id")]
    MissingId,

    /// Error creating the database file.
    #[error("database file creation error: {0}")]
    FileCreation(String),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Document body could not be serialized or parsed.
    #[error("document body error: {0}")]
    Body(#[from] serde_json::Error),
}

/// Error types for the account document model.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A document was applied to an instance with a different identifier.
    #[error("document id mismatch: expected {expected}, got {actual}")]
    IdMismatch {
        /// Identifier of the target instance.
        expected: String,
        /// Identifier carried by the document.
        actual: String,
    },

    /// The `type` tag named no known account variant.
    #[error("unknown account type tag: {0}")]
    UnknownAccountType(String),

    /// A required document field was absent or of the wrong shape.
    #[error("document field {0} is missing or malformed")]
    MalformedField(&'static str),

    /// The requested lifecycle action is not defined for this variant.
    #[error("cannot {action} a {kind} account")]
    InvalidAction {
        /// Action that was attempted.
        action: &'static str,
        /// Variant tag of the target account.
        kind: &'static str,
    },

    /// Underlying store failure during a model operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Document (de)serialization failure.
    #[error("document serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Error types for site catalog loading.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Catalog file could not be read.
    #[error("cannot read site catalog {path}: {source}")]
    Io {
        /// Path that failed to load.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Catalog JSON could not be parsed.
    #[error("cannot parse site catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Error types for search lifecycle operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The operation is not legal in the search's current state.
    #[error("cannot {op} a search in state {state}")]
    InvalidTransition {
        /// Operation that was attempted.
        op: &'static str,
        /// State the search was in.
        state: &'static str,
    },

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Underlying document model failure.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Failure modes a probe can hit.
///
/// Categorizes probe failures for tracking and the end-of-run summary. Each
/// variant represents a specific way an existence check can fail to reach a
/// registered/unregistered verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum ProbeErrorKind {
    /// The probe exceeded its own timeout race.
    Timeout,
    /// TCP/TLS connection failure.
    Connect,
    /// Request could not be sent.
    Request,
    /// Request could not be built.
    Builder,
    /// Redirect policy failure.
    Redirect,
    /// Status-level failure reported by the client.
    Status,
    /// Response body could not be read.
    BodyRead,
    /// Response body could not be decoded.
    Decode,
    /// Server answered 429.
    TooManyRequests,
    /// Site descriptor carries neither `urlProbe` nor `url`.
    MissingProbeUrl,
    /// Site descriptor names a detection rule this engine does not implement.
    UnsupportedRule,
    /// Anything else.
    Other,
}

impl ProbeErrorKind {
    /// Human-readable label used in summary log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeErrorKind::Timeout => "probe timeout",
            ProbeErrorKind::Connect => "connect error",
            ProbeErrorKind::Request => "request error",
            ProbeErrorKind::Builder => "request builder error",
            ProbeErrorKind::Redirect => "redirect error",
            ProbeErrorKind::Status => "status error",
            ProbeErrorKind::BodyRead => "body read error",
            ProbeErrorKind::Decode => "body decode error",
            ProbeErrorKind::TooManyRequests => "too many requests",
            ProbeErrorKind::MissingProbeUrl => "missing probe url",
            ProbeErrorKind::UnsupportedRule => "unsupported detection rule",
            ProbeErrorKind::Other => "other error",
        }
    }
}

/// Thread-safe probe failure statistics.
///
/// Tracks the count of each failure kind using atomic counters, allowing
/// concurrent access from multiple tasks. All kinds are initialized to zero
/// on creation.
pub struct ProbeStats {
    failures: HashMap<ProbeErrorKind, AtomicUsize>,
}

impl ProbeStats {
    /// Creates a tracker with every failure kind at zero.
    pub fn new() -> Self {
        let mut failures = HashMap::new();
        for kind in ProbeErrorKind::iter() {
            failures.insert(kind, AtomicUsize::new(0));
        }
        ProbeStats { failures }
    }

    /// Increments the counter for one failure kind.
    pub fn increment(&self, kind: ProbeErrorKind) {
        // All kinds are initialized in new(), so the lookup cannot miss
        if let Some(counter) = self.failures.get(&kind) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current count for one failure kind.
    pub fn get_count(&self, kind: ProbeErrorKind) -> usize {
        self.failures
            .get(&kind)
            .map(|counter| counter.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Total failures across all kinds.
    pub fn total(&self) -> usize {
        ProbeErrorKind::iter().map(|kind| self.get_count(kind)).sum()
    }

    /// Logs one line per nonzero failure kind, or a single line when the run
    /// saw no failures.
    pub fn log_summary(&self) {
        let total = self.total();
        if total == 0 {
            log::info!("No probe failures recorded");
            return;
        }
        log::info!("Probe failures: {}", total);
        for kind in ProbeErrorKind::iter() {
            let count = self.get_count(kind);
            if count > 0 {
                log::info!("  {}: {}", kind.as_str(), count);
            }
        }
    }
}

impl Default for ProbeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates an exponential backoff retry strategy.
///
/// Returns a retry strategy configured with:
/// - Initial delay: `RETRY_INITIAL_DELAY_MS` milliseconds
/// - Backoff factor: `RETRY_FACTOR` (doubles delay each retry)
/// - Maximum delay: `RETRY_MAX_DELAY_SECS` seconds
pub fn get_retry_strategy() -> ExponentialBackoff {
    ExponentialBackoff::from_millis(crate::config::RETRY_INITIAL_DELAY_MS)
        .factor(crate::config::RETRY_FACTOR)
        .max_delay(Duration::from_secs(crate::config::RETRY_MAX_DELAY_SECS))
}

/// Categorizes a `reqwest::Error` into a probe failure kind.
///
/// Handles both HTTP status errors (e.g. 429 Too Many Requests) and
/// network-level errors (timeouts, connection failures, etc.).
pub fn classify_transport_error(error: &reqwest::Error) -> ProbeErrorKind {
    match error.status() {
        Some(status) if status.as_u16() == 429 => ProbeErrorKind::TooManyRequests,
        Some(_) => ProbeErrorKind::Status,
        None => {
            if error.is_timeout() {
                ProbeErrorKind::Timeout
            } else if error.is_connect() {
                ProbeErrorKind::Connect
            } else if error.is_builder() {
                ProbeErrorKind::Builder
            } else if error.is_redirect() {
                ProbeErrorKind::Redirect
            } else if error.is_status() {
                ProbeErrorKind::Status
            } else if error.is_body() {
                ProbeErrorKind::BodyRead
            } else if error.is_decode() {
                ProbeErrorKind::Decode
            } else if error.is_request() {
                ProbeErrorKind::Request
            } else {
                ProbeErrorKind::Other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_stats_initialization() {
        let stats = ProbeStats::new();
        for kind in ProbeErrorKind::iter() {
            assert_eq!(stats.get_count(kind), 0);
        }
        assert_eq!(stats.total(), 0);
    }

    #[test]
    fn test_probe_stats_increment() {
        let stats = ProbeStats::new();
        stats.increment(ProbeErrorKind::Timeout);
        assert_eq!(stats.get_count(ProbeErrorKind::Timeout), 1);
        assert_eq!(stats.get_count(ProbeErrorKind::Connect), 0);
        assert_eq!(stats.total(), 1);
    }

    #[test]
    fn test_probe_stats_multiple_increments() {
        let stats = ProbeStats::new();
        stats.increment(ProbeErrorKind::Connect);
        stats.increment(ProbeErrorKind::Connect);
        stats.increment(ProbeErrorKind::UnsupportedRule);
        assert_eq!(stats.get_count(ProbeErrorKind::Connect), 2);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_store_error_messages_name_the_document() {
        let not_found = StoreError::NotFound("account/abc".into());
        assert!(not_found.to_string().contains("account/abc"));

        let conflict = StoreError::Conflict {
            id: "account/abc".into(),
            supplied: "1-x".into(),
            current: "2-y".into(),
        };
        let message = conflict.to_string();
        assert!(message.contains("account/abc"));
        assert!(message.contains("1-x"));
        assert!(message.contains("2-y"));
    }

    #[test]
    fn test_search_error_transition_message() {
        let error = SearchError::InvalidTransition {
            op: "start",
            state: "completed",
        };
        assert_eq!(error.to_string(), "cannot start a search in state completed");
    }
}
