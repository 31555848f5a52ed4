//! Authenticated HTTP gateway to the Inthegra API
//!
//! Owns the `reqwest` client, the authentication token and the entity
//! cache. Every read goes through [`InthegraClient::get`], which signs
//! the request, authenticates lazily on first use and transparently
//! recovers once from an expired token.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::cache::EntityCache;
use crate::config::InthegraConfig;
use crate::error::Error;

const TOKEN_EXPIRED: &str = "api.error.token.expired";

/// Client for the Inthegra API
///
/// Construction performs no I/O; a client built without credentials only
/// fails once the first request reaches the backend.
#[derive(Debug)]
pub struct InthegraClient {
    http: Client,
    config: InthegraConfig,
    token: RwLock<Option<String>>,
    cache: EntityCache,
}

impl InthegraClient {
    /// Create a new Inthegra client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &InthegraConfig) -> Result<Self, Error> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("inthegra/", env!("CARGO_PKG_VERSION")));

        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            http,
            config: config.clone(),
            token: RwLock::new(None),
            cache: EntityCache::new(config.use_cache),
        })
    }

    /// The configuration this client was built from
    #[must_use]
    pub const fn config(&self) -> &InthegraConfig {
        &self.config
    }

    /// The cache backing derived entity lookups
    #[must_use]
    pub const fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Sign in with the configured credentials and store the session
    /// token
    ///
    /// Called automatically by [`get`](Self::get) when no token is held
    /// yet and when the backend reports an expired token.
    #[instrument(skip(self))]
    pub async fn authenticate(&self) -> Result<(), Error> {
        let url = format!("{}/signin", self.config.base_url);
        let credentials = serde_json::json!({
            "email": self.config.email,
            "password": self.config.password,
        });

        debug!(%url, "signing in");

        let response = self
            .http
            .post(&url)
            .header("date", http_date())
            .header("x-api-key", &self.config.api_key)
            .json(&credentials)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::ParseError(e.to_string()))?;

        if let Some(message) = backend_error(&payload) {
            return Err(Error::Backend(message));
        }
        if !status.is_success() {
            return Err(Error::RequestFailed(format!("HTTP {status}")));
        }

        let session: RawSession =
            serde_json::from_value(payload).map_err(|e| Error::ParseError(e.to_string()))?;
        debug!(valid_minutes = session.minutes, "signed in");
        *self.token.write().await = Some(session.token);
        Ok(())
    }

    /// Perform an authenticated GET against `endpoint` and return the
    /// decoded JSON body
    ///
    /// An `api.error.token.expired` answer triggers exactly one
    /// re-authentication and one retry; any other `api.error.*` message
    /// surfaces as [`Error::Backend`].
    #[instrument(skip(self, params))]
    pub async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, Error> {
        if self.token.read().await.is_none() {
            self.authenticate().await?;
        }

        let payload = self.request(endpoint, params).await?;
        match backend_error(&payload) {
            Some(message) if message == TOKEN_EXPIRED => {
                warn!(endpoint, "auth token expired, re-authenticating");
                self.authenticate().await?;
                let payload = self.request(endpoint, params).await?;
                match backend_error(&payload) {
                    Some(message) => Err(Error::Backend(message)),
                    None => Ok(payload),
                }
            }
            Some(message) => Err(Error::Backend(message)),
            None => Ok(payload),
        }
    }

    async fn request(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, Error> {
        let url = format!("{}{endpoint}", self.config.base_url);
        let token = self.token.read().await.clone().unwrap_or_default();

        debug!(%url, "GET");

        let response = self
            .http
            .get(&url)
            .header("date", http_date())
            .header("x-api-key", &self.config.api_key)
            .header("x-auth-token", token)
            .query(params)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::ParseError(e.to_string()))?;

        // api.error bodies can arrive under any HTTP status; let the
        // caller inspect the message before falling back to the status.
        if !status.is_success() && backend_error(&payload).is_none() {
            return Err(Error::RequestFailed(format!("HTTP {status}")));
        }

        Ok(payload)
    }

    fn transport_error(&self, error: &reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout {
                timeout_secs: self.config.timeout_secs,
            }
        } else {
            Error::ConnectionFailed(error.to_string())
        }
    }
}

/// Current time in the HTTP-date format the backend expects in the
/// `date` header
fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Extract the backend's application-level error message, if any
fn backend_error(payload: &Value) -> Option<String> {
    let message = payload.get("message")?.as_str()?;
    message.starts_with("api.error").then(|| message.to_string())
}

#[derive(Debug, Deserialize)]
struct RawSession {
    token: String,
    #[serde(rename = "minutos", default)]
    minutes: u32,
}
