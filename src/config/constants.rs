//! Configuration constants.
//!
//! This module defines the configuration constants used throughout the
//! application: probe timeouts, retry behavior, and storage defaults.

use std::time::Duration;

/// Upper bound for a single probe, enforced by racing the request against a
/// timer. Independent of the HTTP client's own timeout so a stalled body
/// read cannot hold the search loop past this bound.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// Interval between progress log lines during a running search
pub const LOGGING_INTERVAL_SECS: u64 = 5;

/// Default User-Agent string for HTTP requests.
///
/// Uses a generic Chrome-like string without a specific version number to avoid
/// becoming outdated. Some catalog sites serve different "not found" pages to
/// obvious bots, so a browser-shaped value is the safer default.
///
/// Users can override this via the `--user-agent` CLI flag.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Default SQLite database path
pub const DEFAULT_DB_PATH: &str = "./account_scout.db";

/// Default site catalog path (a JSON object mapping site name to descriptor)
pub const DEFAULT_CATALOG_PATH: &str = "./sites.json";

/// Placeholder in site URL templates replaced by the percent-encoded username
pub const USERNAME_PLACEHOLDER: &str = "{}";

// Response and body size limits
/// Maximum response body size in bytes (2MB)
/// Longer bodies are truncated; existence checks only need the leading
/// portion of a page.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// Retry strategy
/// Initial delay in milliseconds before first retry
pub const RETRY_INITIAL_DELAY_MS: u64 = 500;
/// Factor by which retry delay is multiplied on each attempt
pub const RETRY_FACTOR: u64 = 2;
/// Maximum delay between retries in seconds
pub const RETRY_MAX_DELAY_SECS: u64 = 4;
/// Retries after the initial attempt, applied to connect-class transport
/// errors only. Kept at one so the whole retry cycle stays inside
/// `PROBE_TIMEOUT`.
pub const PROBE_RETRY_ATTEMPTS: usize = 1;

/// Capacity of the document-store change feed. Subscribers that fall further
/// behind than this observe a `Lagged` error and resume from the current
/// position.
pub const CHANGE_FEED_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_timeout_exceeds_full_retry_cycle() {
        // One initial attempt plus PROBE_RETRY_ATTEMPTS retries with backoff
        // must fit inside the probe timeout, otherwise the retry path can
        // never complete.
        let mut total_ms = 0u64;
        let mut delay = RETRY_INITIAL_DELAY_MS;
        for _ in 0..PROBE_RETRY_ATTEMPTS {
            total_ms += delay.min(RETRY_MAX_DELAY_SECS * 1000);
            delay *= RETRY_FACTOR;
        }
        assert!(Duration::from_millis(total_ms) < PROBE_TIMEOUT);
    }

    #[test]
    fn test_username_placeholder_is_braces() {
        assert_eq!(USERNAME_PLACEHOLDER, "{}");
    }
}
