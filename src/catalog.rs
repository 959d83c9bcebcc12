//! Site catalog: the read-only list of probeable sites.
//!
//! The catalog is a JSON object mapping site name to a descriptor carrying
//! the site's probe rule (`errorType`), URL templates, optional static
//! headers, tags, and example usernames. Descriptors are immutable input;
//! search definitions freeze copies of them at construction time.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error_handling::CatalogError;

/// How account existence is detected for one site.
///
/// The three supported rules mirror the catalog dialect's `errorType`
/// strings. A descriptor naming anything else parses as [`Unknown`] rather
/// than failing the whole catalog; probing such a site yields a failed
/// account, so one bad descriptor degrades one site, not the load.
///
/// [`Unknown`]: DetectionRule::Unknown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionRule {
    /// Existence when the probe URL answers 2xx.
    StatusCode,
    /// Existence when the response body contains none of the configured
    /// error messages.
    Message,
    /// Existence when the final URL after redirects differs from the
    /// configured error URL.
    ResponseUrl,
    /// A rule this engine does not implement; carries the raw string.
    Unknown(String),
}

impl DetectionRule {
    /// The catalog dialect string for this rule.
    pub fn as_str(&self) -> &str {
        match self {
            DetectionRule::StatusCode => "status_code",
            DetectionRule::Message => "message",
            DetectionRule::ResponseUrl => "response_url",
            DetectionRule::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for DetectionRule {
    fn from(raw: &str) -> Self {
        match raw {
            "status_code" => DetectionRule::StatusCode,
            "message" => DetectionRule::Message,
            "response_url" => DetectionRule::ResponseUrl,
            other => DetectionRule::Unknown(other.to_string()),
        }
    }
}

impl Serialize for DetectionRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DetectionRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DetectionRule::from(raw.as_str()))
    }
}

/// Error message(s) for the `message` rule; the dialect allows a single
/// string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorMsg {
    /// One error message.
    Single(String),
    /// Several alternatives; finding any one of them means "not found".
    Many(Vec<String>),
}

impl ErrorMsg {
    /// Whether the body contains any configured message, case-insensitive.
    pub fn found_in(&self, body: &str) -> bool {
        let body_lower = body.to_lowercase();
        match self {
            ErrorMsg::Single(msg) => body_lower.contains(&msg.to_lowercase()),
            ErrorMsg::Many(msgs) => msgs
                .iter()
                .any(|msg| body_lower.contains(&msg.to_lowercase())),
        }
    }
}

/// One site descriptor.
///
/// Field names follow the catalog JSON dialect (camelCase). `name` is not
/// stored inside the descriptor in catalog files; [`SiteCatalog`] fills it
/// from the map key on load. Embedded copies (in account and definition
/// documents) carry it explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    /// Site name, unique within the catalog.
    #[serde(default)]
    pub name: String,

    /// Site front page.
    pub url_main: String,

    /// Profile URL template with a `{}` username placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Dedicated probe URL template, preferred over `url` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_probe: Option<String>,

    /// Detection rule for this site.
    pub error_type: DetectionRule,

    /// Error message(s) for the `message` rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<ErrorMsg>,

    /// "Not found" redirect target template for the `response_url` rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_url: Option<String>,

    /// Whether a HEAD request suffices when no body is needed.
    #[serde(default)]
    pub request_head_only: bool,

    /// Static headers merged into every probe request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Whether the site is excluded from searches.
    #[serde(default)]
    pub omit: bool,

    /// Free-form tags used for site selection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// A username known to exist on the site, for self checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_claimed: Option<String>,

    /// A username known not to exist on the site, for self checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_unclaimed: Option<String>,
}

impl Site {
    /// The URL template probes should use: `urlProbe` when present,
    /// otherwise `url`.
    pub fn probe_template(&self) -> Option<&str> {
        self.url_probe.as_deref().or(self.url.as_deref())
    }

    /// Whether the site carries any of the given tags.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|tag| tags.contains(tag))
    }
}

/// The site catalog: name → descriptor, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct SiteCatalog {
    sites: BTreeMap<String, Site>,
}

impl SiteCatalog {
    /// Builds a catalog from descriptors whose `name` fields are already set.
    pub fn from_sites(sites: Vec<Site>) -> Self {
        let sites = sites
            .into_iter()
            .map(|site| (site.name.clone(), site))
            .collect();
        SiteCatalog { sites }
    }

    /// Parses the catalog JSON dialect: an object mapping site name to
    /// descriptor. Each descriptor's `name` is filled from its key.
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let parsed: BTreeMap<String, Site> = serde_json::from_str(raw)?;
        let sites = parsed
            .into_iter()
            .map(|(name, mut site)| {
                site.name = name.clone();
                (name, site)
            })
            .collect();
        Ok(SiteCatalog { sites })
    }

    /// Loads and parses a catalog file.
    pub fn load_from_path(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_json(&raw)?;
        info!(
            "Loaded {} site(s) from catalog {}",
            catalog.len(),
            path.display()
        );
        let omitted = catalog.iter().filter(|site| site.omit).count();
        if omitted > 0 {
            debug!("Catalog flags {} site(s) as omitted", omitted);
        }
        Ok(catalog)
    }

    /// Looks a site up by name.
    pub fn get(&self, name: &str) -> Option<&Site> {
        self.sites.get(name)
    }

    /// Every site whose tag set intersects `tags`, in name order.
    pub fn sites_with_tags(&self, tags: &[String]) -> Vec<&Site> {
        if tags.is_empty() {
            return Vec::new();
        }
        self.sites
            .values()
            .filter(|site| site.has_any_tag(tags))
            .collect()
    }

    /// Number of sites in the catalog.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Iterates descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }
}
