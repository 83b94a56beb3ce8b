//! Deployment configuration read from the environment.
//!
//! Values come from the process environment after an optional `.env` file
//! has been loaded with `dotenvy`. Every key has a default so a bare
//! `kassa` invocation talks to a local backend.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::api::client::{ApiClient, CredentialsMode, DEFAULT_CLIENT_TYPE};
use crate::api::error::ApiError;
use crate::api::tokens::{
    CachedTokenStore, FileTokenStore, MemoryTokenStore, TokenStore, TokenStoreError,
};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Where credentials are persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStoreKind {
    Keychain,
    File,
    Memory,
}

impl std::str::FromStr for TokenStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keychain" => Ok(TokenStoreKind::Keychain),
            "file" => Ok(TokenStoreKind::File),
            "memory" => Ok(TokenStoreKind::Memory),
            other => Err(format!("unknown token store '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// API base URL without a trailing slash.
    pub api_url: String,
    pub credentials: CredentialsMode,
    pub client_type: String,
    pub token_store: TokenStoreKind,
    /// `None` means the default per-user location.
    pub token_file: Option<PathBuf>,
    pub connect_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            credentials: CredentialsMode::Omit,
            client_type: DEFAULT_CLIENT_TYPE.to_string(),
            token_store: TokenStoreKind::File,
            token_file: None,
            connect_timeout: Some(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)),
            timeout: None,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        // API base URL: KASSA_API_URL > VITE_API_URL > localhost default
        let api_url = lookup("KASSA_API_URL")
            .or_else(|| lookup("VITE_API_URL"))
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);

        let credentials = match lookup("KASSA_CREDENTIALS") {
            None => defaults.credentials,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "omit" => CredentialsMode::Omit,
                "include" => CredentialsMode::Include,
                _ => return Err(invalid("KASSA_CREDENTIALS", v.clone())),
            },
        };

        let client_type = lookup("KASSA_CLIENT_TYPE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.client_type);

        let token_store = match lookup("KASSA_TOKEN_STORE") {
            None => defaults.token_store,
            Some(v) => v
                .parse()
                .map_err(|_| invalid("KASSA_TOKEN_STORE", v.clone()))?,
        };

        let token_file = lookup("KASSA_TOKEN_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let connect_timeout = match lookup("KASSA_CONNECT_TIMEOUT_SECS") {
            None => defaults.connect_timeout,
            Some(v) => parse_secs("KASSA_CONNECT_TIMEOUT_SECS", v)?,
        };
        let timeout = match lookup("KASSA_TIMEOUT_SECS") {
            None => defaults.timeout,
            Some(v) => parse_secs("KASSA_TIMEOUT_SECS", v)?,
        };

        Ok(Config {
            api_url,
            credentials,
            client_type,
            token_store,
            token_file,
            connect_timeout,
            timeout,
        })
    }

    /// Open the configured token store.
    pub fn open_token_store(&self) -> Result<Arc<dyn TokenStore>, TokenStoreError> {
        let store: Arc<dyn TokenStore> = match self.token_store {
            TokenStoreKind::Memory => Arc::new(MemoryTokenStore::new()),
            TokenStoreKind::File => {
                let file = match self.token_file {
                    Some(ref path) => FileTokenStore::new(path.clone()),
                    None => FileTokenStore::default_location()?,
                };
                Arc::new(CachedTokenStore::new(file))
            }
            #[cfg(feature = "keychain")]
            TokenStoreKind::Keychain => Arc::new(CachedTokenStore::new(
                crate::api::keychain::KeychainTokenStore::default(),
            )),
            #[cfg(not(feature = "keychain"))]
            TokenStoreKind::Keychain => {
                return Err(TokenStoreError::Keychain(
                    "built without keychain support".to_string(),
                ))
            }
        };
        Ok(store)
    }

    /// Build an API client wired to the configured token store.
    pub fn build_client(&self) -> Result<ApiClient, ApiError> {
        let store = self.open_token_store()?;
        ApiClient::builder(&self.api_url, store)
            .credentials(self.credentials)
            .client_type(self.client_type.clone())
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .build()
    }
}

fn invalid(key: &str, value: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    }
}

/// Seconds as a duration; `0` disables the timeout.
fn parse_secs(key: &str, value: String) -> Result<Option<Duration>, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Ok(None),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(_) => Err(invalid(key, value)),
    }
}
