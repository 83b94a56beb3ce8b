//! OS keychain backend for the token store.
//!
//! Uses the `keyring` crate (macOS Keychain, Windows Credential Manager,
//! Linux kernel keyring). The pair is serialized into a single keychain
//! entry so both tokens are replaced together.

use keyring::Entry;
use zeroize::Zeroize;

use super::tokens::{CredentialPair, TokenStore, TokenStoreError};

/// Keychain service name for the Kassa client.
const SERVICE_NAME: &str = "com.kassa.client";

/// Account under which the serialized credential pair is kept.
const CREDENTIALS_KEY: &str = "credentials";

impl From<keyring::Error> for TokenStoreError {
    fn from(err: keyring::Error) -> Self {
        TokenStoreError::Keychain(err.to_string())
    }
}

/// Token store backed by the platform keychain.
#[derive(Debug, Clone)]
pub struct KeychainTokenStore {
    service: String,
    account: String,
}

impl Default for KeychainTokenStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME, CREDENTIALS_KEY)
    }
}

impl KeychainTokenStore {
    /// Store under a custom service/account, e.g. one per backend deployment.
    pub fn new(service: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, TokenStoreError> {
        Ok(Entry::new(&self.service, &self.account)?)
    }
}

impl TokenStore for KeychainTokenStore {
    /// Returns `None` if no entry exists (never logged in or logged out).
    fn load(&self) -> Result<Option<CredentialPair>, TokenStoreError> {
        match self.entry()?.get_password() {
            Ok(mut raw) => {
                let parsed = serde_json::from_str(&raw);
                raw.zeroize();
                Ok(Some(parsed?))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), TokenStoreError> {
        let mut raw = serde_json::to_string(pair)?;
        let stored = self.entry()?.set_password(&raw);
        raw.zeroize();
        stored?;
        Ok(())
    }

    /// Idempotent: ignores `NoEntry` (already deleted or never stored).
    fn clear(&self) -> Result<(), TokenStoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
