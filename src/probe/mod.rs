//! Probe engine: one existence check per (site, username) pair.
//!
//! [`Prober::find_account`] never fails. Every outcome, including
//! timeouts, DNS trouble and malformed site descriptors, resolves to one
//! of the three probe-terminal accounts: registered, unregistered or
//! failed. Searches stay alive no matter how broken an individual site
//! is.
//!
//! Detection rules, per the site descriptor's `errorType`:
//! - `status_code`: the account exists when the probe URL answers 2xx.
//! - `message`: the account exists when the body contains *none* of the
//!   site's error strings.
//! - `response_url`: the account exists when the request does not get
//!   redirected to the site's error URL.

mod transport;

pub use transport::{
    HttpTransport, ProbeMethod, ProbeRequest, ProbeResponse, ProbeTransport, TransportError,
};

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio_retry::RetryIf;

use crate::account::Account;
use crate::catalog::{DetectionRule, Site};
use crate::config::{PROBE_RETRY_ATTEMPTS, USERNAME_PLACEHOLDER};
use crate::error_handling::{get_retry_strategy, ProbeErrorKind, ProbeStats};

/// Where probe results belong and which names to look for in page
/// bodies. Passed when probing on behalf of a search; standalone probes
/// (site self-checks) run without one.
#[derive(Debug, Clone, Default)]
pub struct ResultScope {
    /// Identifier prefix placing produced accounts in a search's result
    /// partition. Empty means the global account partition.
    pub prefix: String,
    pub first_names: Vec<String>,
    pub last_names: Vec<String>,
}

impl ResultScope {
    fn wants_names(&self) -> bool {
        !self.first_names.is_empty() || !self.last_names.is_empty()
    }
}

/// What a single probe concluded.
enum ProbeOutcome {
    Found {
        matched_first_names: Vec<String>,
        matched_last_names: Vec<String>,
    },
    NotFound,
}

/// Why a probe could not conclude anything.
#[derive(Debug, thiserror::Error)]
enum ProbeFailure {
    #[error("site descriptor has no probe URL")]
    MissingProbeUrl,
    #[error("unsupported detection rule '{0}'")]
    UnsupportedRule(String),
    #[error("probe timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("{0}")]
    Transport(#[from] TransportError),
}

impl ProbeFailure {
    fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeFailure::MissingProbeUrl => ProbeErrorKind::MissingProbeUrl,
            ProbeFailure::UnsupportedRule(_) => ProbeErrorKind::UnsupportedRule,
            ProbeFailure::Timeout(_) => ProbeErrorKind::Timeout,
            ProbeFailure::Transport(e) => e.kind,
        }
    }
}

/// Substitutes the username into a site URL template, percent-encoding
/// it on the way in.
pub fn substitute_username(template: &str, user_name: &str) -> String {
    template.replace(USERNAME_PLACEHOLDER, &urlencoding::encode(user_name))
}

/// Case-insensitive scan of a page body for the given names. Matches are
/// reported with their original casing.
fn match_names(body: &str, first_names: &[String], last_names: &[String]) -> (Vec<String>, Vec<String>) {
    let haystack = body.to_lowercase();
    let matched = |names: &[String]| {
        names
            .iter()
            .filter(|name| !name.is_empty() && haystack.contains(&name.to_lowercase()))
            .cloned()
            .collect::<Vec<String>>()
    };
    (matched(first_names), matched(last_names))
}

fn urls_equivalent(left: &str, right: &str) -> bool {
    match (url::Url::parse(left), url::Url::parse(right)) {
        (Ok(a), Ok(b)) => a == b,
        _ => left == right,
    }
}

/// Outcome of probing a site's own claimed/unclaimed fixture usernames.
#[derive(Debug, Clone)]
pub struct SiteCheck {
    pub site_name: String,
    /// Whether the known-claimed username probed as registered, when the
    /// site supplies one.
    pub claimed_ok: Option<bool>,
    /// Whether the known-unclaimed username probed as unregistered.
    pub unclaimed_ok: Option<bool>,
}

impl SiteCheck {
    /// A check passes when nothing it could verify came back wrong.
    pub fn passed(&self) -> bool {
        self.claimed_ok.unwrap_or(true) && self.unclaimed_ok.unwrap_or(true)
    }
}

/// Runs existence probes against sites.
pub struct Prober {
    transport: Arc<dyn ProbeTransport>,
    timeout: Duration,
    stats: ProbeStats,
}

impl Prober {
    pub fn new(transport: Arc<dyn ProbeTransport>, timeout: Duration) -> Self {
        Prober {
            transport,
            timeout,
            stats: ProbeStats::new(),
        }
    }

    /// Tally of probe failures by kind, across this prober's lifetime.
    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    /// Probes one site for one username and always produces an account.
    ///
    /// Failures are folded into a failed account whose reason describes
    /// what went wrong, and counted in [`Prober::stats`].
    pub async fn find_account(
        &self,
        site: &Site,
        user_name: &str,
        scope: Option<&ResultScope>,
    ) -> Account {
        let prefix = scope.map(|s| s.prefix.as_str()).unwrap_or("");
        match self.probe(site, user_name, scope).await {
            Ok(ProbeOutcome::Found {
                matched_first_names,
                matched_last_names,
            }) => Account::registered(
                site.clone(),
                user_name,
                prefix,
                matched_first_names,
                matched_last_names,
            ),
            Ok(ProbeOutcome::NotFound) => Account::unregistered(site.clone(), user_name, prefix),
            Err(failure) => {
                self.stats.increment(failure.kind());
                debug!(
                    "Probe of {} for '{}' failed: {}",
                    site.name, user_name, failure
                );
                Account::failed(site.clone(), user_name, prefix, failure.to_string())
            }
        }
    }

    /// Probes a site's own fixture usernames to verify its detection
    /// rule still works.
    pub async fn check_site(&self, site: &Site) -> SiteCheck {
        let mut check = SiteCheck {
            site_name: site.name.clone(),
            claimed_ok: None,
            unclaimed_ok: None,
        };
        if let Some(user) = &site.username_claimed {
            let account = self.find_account(site, user, None).await;
            check.claimed_ok = Some(matches!(
                account.kind,
                crate::account::AccountKind::Registered(_)
            ));
        }
        if let Some(user) = &site.username_unclaimed {
            let account = self.find_account(site, user, None).await;
            check.unclaimed_ok = Some(matches!(
                account.kind,
                crate::account::AccountKind::Unregistered(_)
            ));
        }
        check
    }

    async fn probe(
        &self,
        site: &Site,
        user_name: &str,
        scope: Option<&ResultScope>,
    ) -> Result<ProbeOutcome, ProbeFailure> {
        let template = site.probe_template().ok_or(ProbeFailure::MissingProbeUrl)?;
        let url = substitute_username(template, user_name);
        match &site.error_type {
            DetectionRule::StatusCode => self.probe_status(site, url, scope).await,
            DetectionRule::Message => self.probe_message(site, url, scope).await,
            DetectionRule::ResponseUrl => self.probe_response_url(site, url, user_name, scope).await,
            DetectionRule::Unknown(name) => Err(ProbeFailure::UnsupportedRule(name.clone())),
        }
    }

    async fn probe_status(
        &self,
        site: &Site,
        url: String,
        scope: Option<&ResultScope>,
    ) -> Result<ProbeOutcome, ProbeFailure> {
        // HEAD saves bandwidth, but only when no body scan is wanted.
        let wants_names = scope.map(ResultScope::wants_names).unwrap_or(false);
        let method = if site.request_head_only && !wants_names {
            ProbeMethod::Head
        } else {
            ProbeMethod::Get
        };
        let response = self
            .fetch_bounded(ProbeRequest {
                method,
                url,
                headers: site.headers.clone(),
                with_cookies: false,
            })
            .await?;
        if !(200..300).contains(&response.status) {
            return Ok(ProbeOutcome::NotFound);
        }
        Ok(found_in_body(&response.body, scope))
    }

    async fn probe_message(
        &self,
        site: &Site,
        url: String,
        scope: Option<&ResultScope>,
    ) -> Result<ProbeOutcome, ProbeFailure> {
        let Some(error_msg) = &site.error_msg else {
            debug!(
                "Site {} uses the message rule without errorMsg; treating as not found",
                site.name
            );
            return Ok(ProbeOutcome::NotFound);
        };
        let response = self
            .fetch_bounded(ProbeRequest {
                method: ProbeMethod::Get,
                url,
                headers: site.headers.clone(),
                with_cookies: true,
            })
            .await?;
        // The account exists when none of the error strings appear.
        if error_msg.found_in(&response.body) {
            Ok(ProbeOutcome::NotFound)
        } else {
            Ok(found_in_body(&response.body, scope))
        }
    }

    async fn probe_response_url(
        &self,
        site: &Site,
        url: String,
        user_name: &str,
        scope: Option<&ResultScope>,
    ) -> Result<ProbeOutcome, ProbeFailure> {
        let Some(error_url) = &site.error_url else {
            debug!(
                "Site {} uses the response-url rule without errorUrl; treating as not found",
                site.name
            );
            return Ok(ProbeOutcome::NotFound);
        };
        let expected_error = substitute_username(error_url, user_name);
        let response = self
            .fetch_bounded(ProbeRequest {
                method: ProbeMethod::Get,
                url,
                headers: site.headers.clone(),
                with_cookies: false,
            })
            .await?;
        if urls_equivalent(&response.final_url, &expected_error) {
            Ok(ProbeOutcome::NotFound)
        } else {
            Ok(found_in_body(&response.body, scope))
        }
    }

    /// One transport fetch bounded by the probe timeout, retrying
    /// connection-level failures. The timeout covers the retries too, so
    /// a flapping host cannot hold a search hostage.
    async fn fetch_bounded(&self, request: ProbeRequest) -> Result<ProbeResponse, ProbeFailure> {
        let transport = Arc::clone(&self.transport);
        let attempt = RetryIf::spawn(
            get_retry_strategy().take(PROBE_RETRY_ATTEMPTS),
            || {
                let transport = Arc::clone(&transport);
                let request = request.clone();
                async move { transport.fetch(request).await }
            },
            |e: &TransportError| e.kind == ProbeErrorKind::Connect,
        );
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ProbeFailure::Transport(e)),
            Err(_) => Err(ProbeFailure::Timeout(self.timeout)),
        }
    }
}

fn found_in_body(body: &str, scope: Option<&ResultScope>) -> ProbeOutcome {
    let (matched_first_names, matched_last_names) = match scope {
        Some(s) => match_names(body, &s.first_names, &s.last_names),
        None => (Vec::new(), Vec::new()),
    };
    ProbeOutcome::Found {
        matched_first_names,
        matched_last_names,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountKind;
    use crate::catalog::ErrorMsg;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Scripted {
        responses: HashMap<String, Result<ProbeResponse, TransportError>>,
        calls: Mutex<Vec<ProbeRequest>>,
    }

    impl Scripted {
        fn new() -> Self {
            Scripted {
                responses: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn ok(mut self, url: &str, status: u16, body: &str) -> Self {
            self.responses.insert(
                url.to_string(),
                Ok(ProbeResponse {
                    status,
                    final_url: url.to_string(),
                    body: body.to_string(),
                }),
            );
            self
        }

        fn redirect(mut self, url: &str, final_url: &str) -> Self {
            self.responses.insert(
                url.to_string(),
                Ok(ProbeResponse {
                    status: 200,
                    final_url: final_url.to_string(),
                    body: String::new(),
                }),
            );
            self
        }

        fn fail(mut self, url: &str, kind: ProbeErrorKind, message: &str) -> Self {
            self.responses
                .insert(url.to_string(), Err(TransportError::new(kind, message)));
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn last_call(&self) -> ProbeRequest {
            self.calls.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProbeTransport for Scripted {
        async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
            self.calls.lock().unwrap().push(request.clone());
            match self.responses.get(&request.url) {
                Some(result) => result.clone(),
                None => Ok(ProbeResponse {
                    status: 404,
                    final_url: request.url,
                    body: String::new(),
                }),
            }
        }
    }

    fn status_site(name: &str) -> Site {
        Site {
            name: name.to_string(),
            url_main: "https://example.com".to_string(),
            url: Some("https://example.com/{}".to_string()),
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

    fn scripted_prober(transport: Scripted) -> (Prober, Arc<Scripted>) {
        let transport = Arc::new(transport);
        let prober = Prober::new(
            Arc::clone(&transport) as Arc<dyn ProbeTransport>,
            Duration::from_secs(8),
        );
        (prober, transport)
    }

    #[test]
    fn test_substitute_username_percent_encodes() {
        assert_eq!(
            substitute_username("https://example.com/{}", "john doe"),
            "https://example.com/john%20doe"
        );
        assert_eq!(
            substitute_username("https://example.com/u/{}/posts", "alice"),
            "https://example.com/u/alice/posts"
        );
    }

    #[tokio::test]
    async fn test_status_rule_classifies_by_status() {
        let (prober, _) = scripted_prober(Scripted::new().ok("https://example.com/alice", 200, ""));
        let account = prober.find_account(&status_site("A"), "alice", None).await;
        assert!(matches!(account.kind, AccountKind::Registered(_)));

        let (prober, _) = scripted_prober(Scripted::new().ok("https://example.com/bob", 404, ""));
        let account = prober.find_account(&status_site("A"), "bob", None).await;
        assert!(matches!(account.kind, AccountKind::Unregistered(_)));
    }

    #[tokio::test]
    async fn test_message_rule_requires_none_of_the_strings() {
        let mut site = status_site("Forum");
        site.error_type = DetectionRule::Message;
        site.error_msg = Some(ErrorMsg::Many(vec![
            "not found".to_string(),
            "no such user".to_string(),
        ]));

        let (prober, transport) = scripted_prober(Scripted::new().ok(
            "https://example.com/alice",
            200,
            "<h1>Profile of alice</h1>",
        ));
        let account = prober.find_account(&site, "alice", None).await;
        assert!(matches!(account.kind, AccountKind::Registered(_)));
        // the message rule always goes through the cookie client
        assert!(transport.last_call().with_cookies);

        let (prober, _) = scripted_prober(Scripted::new().ok(
            "https://example.com/bob",
            200,
            "Sorry, No Such User here",
        ));
        let account = prober.find_account(&site, "bob", None).await;
        assert!(matches!(account.kind, AccountKind::Unregistered(_)));
    }

    #[tokio::test]
    async fn test_message_rule_without_error_msg_defaults_to_unregistered() {
        let mut site = status_site("Forum");
        site.error_type = DetectionRule::Message;
        site.error_msg = None;

        let (prober, transport) = scripted_prober(Scripted::new());
        let account = prober.find_account(&site, "alice", None).await;
        assert!(matches!(account.kind, AccountKind::Unregistered(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_response_url_rule_detects_error_redirect() {
        let mut site = status_site("Echo");
        site.error_type = DetectionRule::ResponseUrl;
        site.error_url = Some("https://example.com/missing/{}".to_string());

        let (prober, _) = scripted_prober(
            Scripted::new()
                .redirect("https://example.com/alice", "https://example.com/missing/alice"),
        );
        let account = prober.find_account(&site, "alice", None).await;
        assert!(matches!(account.kind, AccountKind::Unregistered(_)));

        let (prober, _) = scripted_prober(
            Scripted::new().redirect("https://example.com/bob", "https://example.com/bob"),
        );
        let account = prober.find_account(&site, "bob", None).await;
        assert!(matches!(account.kind, AccountKind::Registered(_)));
    }

    #[tokio::test]
    async fn test_unsupported_rule_fails_without_a_request() {
        let mut site = status_site("Mystery");
        site.error_type = DetectionRule::Unknown("captcha".to_string());

        let (prober, transport) = scripted_prober(Scripted::new());
        let account = prober.find_account(&site, "alice", None).await;
        match account.kind {
            AccountKind::Failed { reason, .. } => assert!(reason.contains("captcha")),
            other => panic!("expected failed account, got {:?}", other),
        }
        assert_eq!(transport.call_count(), 0);
        assert_eq!(prober.stats().get_count(ProbeErrorKind::UnsupportedRule), 1);
    }

    #[tokio::test]
    async fn test_missing_probe_url_short_circuits() {
        let mut site = status_site("Blank");
        site.url = None;
        site.url_probe = None;

        let (prober, transport) = scripted_prober(Scripted::new());
        let account = prober.find_account(&site, "alice", None).await;
        assert!(matches!(account.kind, AccountKind::Failed { .. }));
        assert_eq!(transport.call_count(), 0);
        assert_eq!(prober.stats().get_count(ProbeErrorKind::MissingProbeUrl), 1);
    }

    #[tokio::test]
    async fn test_transport_error_becomes_failed_account() {
        let (prober, _) = scripted_prober(Scripted::new().fail(
            "https://example.com/alice",
            ProbeErrorKind::Request,
            "dns error: no such host",
        ));
        let account = prober.find_account(&status_site("A"), "alice", None).await;
        match account.kind {
            AccountKind::Failed { reason, .. } => assert!(reason.contains("no such host")),
            other => panic!("expected failed account, got {:?}", other),
        }
        assert_eq!(prober.stats().total(), 1);
    }

    #[tokio::test]
    async fn test_connect_errors_retry_once() {
        let (prober, transport) = scripted_prober(Scripted::new().fail(
            "https://example.com/alice",
            ProbeErrorKind::Connect,
            "connection refused",
        ));
        tokio::time::pause();
        let account = prober.find_account(&status_site("A"), "alice", None).await;
        assert!(matches!(account.kind, AccountKind::Failed { .. }));
        assert_eq!(transport.call_count(), 1 + PROBE_RETRY_ATTEMPTS);

        // non-connect failures do not retry
        let (prober, transport) = scripted_prober(Scripted::new().fail(
            "https://example.com/alice",
            ProbeErrorKind::Request,
            "bad request",
        ));
        let _ = prober.find_account(&status_site("A"), "alice", None).await;
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_head_only_site_downgrades_to_get_for_name_matching() {
        let mut site = status_site("HeadFirst");
        site.request_head_only = true;

        let (prober, transport) = scripted_prober(Scripted::new().ok("https://example.com/alice", 200, ""));
        let _ = prober.find_account(&site, "alice", None).await;
        assert_eq!(transport.last_call().method, ProbeMethod::Head);

        let scope = ResultScope {
            prefix: String::new(),
            first_names: vec!["Alice".to_string()],
            last_names: vec![],
        };
        let (prober, transport) = scripted_prober(Scripted::new().ok(
            "https://example.com/alice",
            200,
            "alice wonderland",
        ));
        let account = prober.find_account(&site, "alice", Some(&scope)).await;
        assert_eq!(transport.last_call().method, ProbeMethod::Get);
        match account.kind {
            AccountKind::Registered(data) => {
                assert_eq!(data.matched_first_names, vec!["Alice".to_string()]);
            }
            other => panic!("expected registered account, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scope_prefix_lands_in_account_id() {
        let scope = ResultScope {
            prefix: "searchDef/1/search/2/searchResult/".to_string(),
            first_names: vec![],
            last_names: vec![],
        };
        let (prober, _) = scripted_prober(Scripted::new().ok("https://example.com/alice", 200, ""));
        let account = prober
            .find_account(&status_site("A"), "alice", Some(&scope))
            .await;
        assert!(account.id.starts_with(&scope.prefix));
    }

    #[tokio::test]
    async fn test_timeout_caps_slow_transport() {
        struct Stalled;

        #[async_trait]
        impl ProbeTransport for Stalled {
            async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ProbeResponse {
                    status: 200,
                    final_url: request.url,
                    body: String::new(),
                })
            }
        }

        tokio::time::pause();
        let prober = Prober::new(Arc::new(Stalled), Duration::from_secs(8));
        let account = prober.find_account(&status_site("A"), "alice", None).await;
        match account.kind {
            AccountKind::Failed { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("expected failed account, got {:?}", other),
        }
        assert_eq!(prober.stats().get_count(ProbeErrorKind::Timeout), 1);
    }

    #[test]
    fn test_match_names_is_case_insensitive() {
        let (first, last) = match_names(
            "Welcome back, ALICE Smith!",
            &["Alice".to_string(), "Bob".to_string()],
            &["smith".to_string()],
        );
        assert_eq!(first, vec!["Alice".to_string()]);
        assert_eq!(last, vec!["smith".to_string()]);
    }

    #[tokio::test]
    async fn test_check_site_verifies_both_fixture_usernames() {
        let mut site = status_site("A");
        site.username_claimed = Some("taken".to_string());
        site.username_unclaimed = Some("free".to_string());

        let (prober, _) = scripted_prober(
            Scripted::new()
                .ok("https://example.com/taken", 200, "")
                .ok("https://example.com/free", 404, ""),
        );
        let check = prober.check_site(&site).await;
        assert_eq!(check.claimed_ok, Some(true));
        assert_eq!(check.unclaimed_ok, Some(true));
        assert!(check.passed());

        // A site whose claimed fixture now probes as absent fails the check.
        let (prober, _) = scripted_prober(
            Scripted::new()
                .ok("https://example.com/taken", 404, "")
                .ok("https://example.com/free", 404, ""),
        );
        let check = prober.check_site(&site).await;
        assert_eq!(check.claimed_ok, Some(false));
        assert!(!check.passed());
    }

    #[tokio::test]
    async fn test_check_site_without_fixtures_passes_vacuously() {
        let (prober, transport) = scripted_prober(Scripted::new());
        let check = prober.check_site(&status_site("A")).await;
        assert_eq!(check.claimed_ok, None);
        assert_eq!(check.unclaimed_ok, None);
        assert!(check.passed());
        assert_eq!(transport.call_count(), 0);
    }
}
