//! Where signing key sets come from.
//!
//! The store only knows the `KeySource` trait. Production uses
//! `HttpKeySource` against the issuer's JWKS endpoint; `StaticKeySource`
//! serves a fixed document.

use std::time::Duration;

use futures::future::BoxFuture;

use super::JwkSet;

/// Error returned when a key set cannot be retrieved.
#[derive(Debug)]
pub enum KeySourceError {
    /// The HTTP request failed before a response arrived.
    Http(reqwest::Error),
    /// The issuer answered with a non-success status.
    Status(u16),
    /// The response body is not a JWKS document.
    Decode(String),
    /// The fetch did not finish within the configured timeout.
    Timeout(Duration),
}

impl std::fmt::Display for KeySourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(e) => write!(f, "key set request failed: {e}"),
            Self::Status(status) => write!(f, "key set endpoint returned status {status}"),
            Self::Decode(reason) => write!(f, "key set response is not a JWKS document: {reason}"),
            Self::Timeout(timeout) => {
                write!(f, "key set fetch timed out after {}ms", timeout.as_millis())
            }
        }
    }
}

impl std::error::Error for KeySourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            Self::Status(_) | Self::Decode(_) | Self::Timeout(_) => None,
        }
    }
}

impl From<reqwest::Error> for KeySourceError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

/// A provider of JWKS documents.
pub trait KeySource: Send + Sync {
    /// Fetch the current key set document.
    fn fetch(&self) -> BoxFuture<'_, Result<JwkSet, KeySourceError>>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

/// Fetches the key set from a JWKS URL.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    /// Create a source for `url`.
    ///
    /// `timeout` bounds each request at the HTTP layer; the store applies
    /// its own timeout on top.
    ///
    /// # Errors
    /// Returns `KeySourceError::Http` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeySourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl KeySource for HttpKeySource {
    fn fetch(&self) -> BoxFuture<'_, Result<JwkSet, KeySourceError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(KeySourceError::Status(status.as_u16()));
            }

            response.json::<JwkSet>().await.map_err(|e| {
                if e.is_decode() {
                    KeySourceError::Decode(e.to_string())
                } else {
                    KeySourceError::Http(e)
                }
            })
        })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Serves a fixed key set document.
#[derive(Debug, Clone, Default)]
pub struct StaticKeySource {
    document: JwkSet,
}

impl StaticKeySource {
    #[must_use]
    pub const fn new(document: JwkSet) -> Self {
        Self { document }
    }
}

impl KeySource for StaticKeySource {
    fn fetch(&self) -> BoxFuture<'_, Result<JwkSet, KeySourceError>> {
        let document = self.document.clone();
        Box::pin(async move { Ok(document) })
    }

    fn describe(&self) -> String {
        format!("static key set ({} keys)", self.document.keys.len())
    }
}
