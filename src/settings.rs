//! The singleton settings document.

use serde::{Deserialize, Serialize};

use crate::config::PROBE_TIMEOUT;
use crate::error_handling::{ModelError, StoreError};
use crate::keys::SETTINGS_KEY;
use crate::store::{Document, DocumentStore};

const DOC_TYPE: &str = "settings";

/// Per-installation settings, stored under the fixed `settings` key.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    /// Store revision; empty until first persisted.
    pub revision: String,
    /// Bumped when the document layout changes shape.
    pub schema_version: u32,
    pub probe_timeout_secs: u64,
    pub catalog_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppSettingsDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    rev: String,
    #[serde(rename = "type")]
    kind: String,
    schema_version: u32,
    probe_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    catalog_path: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            revision: String::new(),
            schema_version: 1,
            probe_timeout_secs: PROBE_TIMEOUT.as_secs(),
            catalog_path: None,
        }
    }
}

impl AppSettings {
    pub fn to_document(&self) -> Result<Document, ModelError> {
        let doc = AppSettingsDoc {
            id: SETTINGS_KEY.to_string(),
            rev: self.revision.clone(),
            kind: DOC_TYPE.to_string(),
            schema_version: self.schema_version,
            probe_timeout_secs: self.probe_timeout_secs,
            catalog_path: self.catalog_path.clone(),
        };
        Ok(serde_json::to_value(&doc)?)
    }

    pub fn from_document(doc: &Document) -> Result<Self, ModelError> {
        let parsed: AppSettingsDoc = serde_json::from_value(doc.clone())?;
        if parsed.kind != DOC_TYPE {
            return Err(ModelError::MalformedField("type"));
        }
        Ok(AppSettings {
            revision: parsed.rev,
            schema_version: parsed.schema_version,
            probe_timeout_secs: parsed.probe_timeout_secs,
            catalog_path: parsed.catalog_path,
        })
    }

    /// Loads the settings document, falling back to defaults when none
    /// was ever saved.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Store` for store failures other than the
    /// document being absent.
    pub async fn load_or_default(store: &dyn DocumentStore) -> Result<Self, ModelError> {
        match store.get(SETTINGS_KEY).await {
            Ok(doc) => AppSettings::from_document(&doc),
            Err(StoreError::NotFound(_)) => Ok(AppSettings::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    ///
    /// Returns `ModelError::Store` when the put fails.
    pub async fn save(&mut self, store: &dyn DocumentStore) -> Result<(), ModelError> {
        let result = store.put(self.to_document()?).await?;
        self.revision = result.rev;
        Ok(())
    }
}
