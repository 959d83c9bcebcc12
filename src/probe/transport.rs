//! HTTP transport behind the probe engine.
//!
//! Probing is defined against the [`ProbeTransport`] trait so tests can
//! script responses without a network. The real implementation wraps two
//! `reqwest` clients: a plain one, and one with a cookie jar for sites
//! whose error pages only render properly inside a session.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::MAX_BODY_BYTES;
use crate::error_handling::{classify_transport_error, ProbeErrorKind};

/// HTTP method a probe uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Get,
    Head,
}

/// One outbound probe request.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: ProbeMethod,
    pub url: String,
    /// Static per-site headers merged into the request.
    pub headers: BTreeMap<String, String>,
    /// Send through the cookie-jar client.
    pub with_cookies: bool,
}

/// What came back from a probe request.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    /// URL after redirects, used by the response-URL detection rule.
    pub final_url: String,
    /// Response body, empty for HEAD requests, capped at
    /// [`MAX_BODY_BYTES`].
    pub body: String,
}

/// Transport-level failure, classified for the failure tally.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        TransportError {
            kind,
            message: message.into(),
        }
    }

    fn from_reqwest(error: &reqwest::Error) -> Self {
        TransportError {
            kind: classify_transport_error(error),
            message: error.to_string(),
        }
    }
}

/// Performs probe requests. Implemented over the network by
/// [`HttpTransport`] and by scripted fakes in tests.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError>;
}

/// Network transport over shared `reqwest` clients.
pub struct HttpTransport {
    plain: Arc<reqwest::Client>,
    cookie: Arc<reqwest::Client>,
}

impl HttpTransport {
    pub fn new(plain: Arc<reqwest::Client>, cookie: Arc<reqwest::Client>) -> Self {
        HttpTransport { plain, cookie }
    }

    async fn read_body(response: reqwest::Response) -> Result<String, TransportError> {
        let mut response = response;
        let mut collected: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?
        {
            let remaining = MAX_BODY_BYTES.saturating_sub(collected.len());
            if chunk.len() >= remaining {
                collected.extend_from_slice(&chunk[..remaining]);
                break;
            }
            collected.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        let client = if request.with_cookies {
            &self.cookie
        } else {
            &self.plain
        };
        let mut builder = match request.method {
            ProbeMethod::Get => client.get(&request.url),
            ProbeMethod::Head => client.head(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = match request.method {
            ProbeMethod::Head => String::new(),
            ProbeMethod::Get => Self::read_body(response).await?,
        };

        Ok(ProbeResponse {
            status,
            final_url,
            body,
        })
    }
}
