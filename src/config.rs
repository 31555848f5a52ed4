//! Inthegra service configuration

use serde::{Deserialize, Serialize};

/// Configuration for the Inthegra API (Strans Teresina)
///
/// All credential fields default to empty strings so the client can be
/// constructed without configuration; authentication then fails on the
/// first network call, not at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InthegraConfig {
    /// Base URL for the Inthegra API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Application key sent as the `x-api-key` header
    #[serde(default)]
    pub api_key: String,

    /// Account e-mail used by `/signin`
    #[serde(default)]
    pub email: String,

    /// Account password used by `/signin`
    #[serde(default)]
    pub password: String,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Cache derived entity lookups (stop lists, serving routes, live
    /// positions) in process memory
    #[serde(default = "default_true")]
    pub use_cache: bool,

    /// Skip TLS certificate verification (transport passthrough option)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_base_url() -> String {
    "https://api.inthegra.strans.teresina.pi.gov.br/v1".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

const fn default_true() -> bool {
    true
}

impl Default for InthegraConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            email: String::new(),
            password: String::new(),
            timeout_secs: default_timeout_secs(),
            use_cache: true,
            accept_invalid_certs: false,
        }
    }
}

impl InthegraConfig {
    /// Create a configuration suitable for testing
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            timeout_secs: 5,
            use_cache: false,
            ..Default::default()
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("base_url must not be empty".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}
