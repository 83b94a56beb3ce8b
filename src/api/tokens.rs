//! Client-side credential storage.
//!
//! The access/refresh pair is always persisted as a single record so a
//! reader never sees a new access token next to an old refresh token.
//! Tokens are opaque bearer strings: nothing here parses, trims or
//! validates them.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// Directory (under the platform config dir) holding the token file.
const STORAGE_NAMESPACE: &str = "kassa";

/// File name of the persisted credential pair.
const TOKEN_FILE_NAME: &str = "tokens.json";

/// The current access/refresh token pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Keep tokens out of debug output and logs.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("Keychain operation failed: {0}")]
    Keychain(String),

    #[error("Token file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored credentials are corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("No configuration directory available for the token file")]
    NoStorageDirectory,
}

/// Durable storage for the current credential pair.
///
/// Implementors only provide whole-record `load`/`save`/`clear`; the
/// per-token accessors are derived from those so every write replaces both
/// values at once.
pub trait TokenStore: Send + Sync {
    /// Read the stored pair, `None` when logged out.
    fn load(&self) -> Result<Option<CredentialPair>, TokenStoreError>;

    /// Replace the stored pair.
    fn save(&self, pair: &CredentialPair) -> Result<(), TokenStoreError>;

    /// Remove the stored pair. Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), TokenStoreError>;

    fn access_token(&self) -> Result<Option<String>, TokenStoreError> {
        Ok(self.load()?.map(|pair| pair.access_token))
    }

    fn refresh_token(&self) -> Result<Option<String>, TokenStoreError> {
        Ok(self.load()?.map(|pair| pair.refresh_token))
    }

    fn set_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), TokenStoreError> {
        self.save(&CredentialPair::new(access_token, refresh_token))
    }

    fn clear_tokens(&self) -> Result<(), TokenStoreError> {
        self.clear()
    }
}

/// In-process store. Used by tests and by embedders that keep their own
/// persistence.
#[derive(Default)]
pub struct MemoryTokenStore {
    pair: RwLock<Option<CredentialPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a credential pair.
    pub fn with_tokens(access_token: &str, refresh_token: &str) -> Self {
        Self {
            pair: RwLock::new(Some(CredentialPair::new(access_token, refresh_token))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<CredentialPair>, TokenStoreError> {
        let guard = self.pair.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), TokenStoreError> {
        let mut guard = self.pair.write().unwrap_or_else(|e| e.into_inner());
        if let Some(ref mut old) = *guard {
            old.zeroize();
        }
        *guard = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        let mut guard = self.pair.write().unwrap_or_else(|e| e.into_inner());
        if let Some(ref mut old) = *guard {
            old.zeroize();
        }
        *guard = None;
        Ok(())
    }
}

/// JSON file store, by default `<config dir>/kassa/tokens.json`.
///
/// Writes land in a temporary sibling first and are renamed into place, so
/// a concurrent `load` sees either the old pair or the new one.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default per-user location.
    pub fn default_location() -> Result<Self, TokenStoreError> {
        Ok(Self::new(default_token_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| TOKEN_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Default location of the token file.
pub fn default_token_path() -> Result<PathBuf, TokenStoreError> {
    let base = dirs::config_dir().ok_or(TokenStoreError::NoStorageDirectory)?;
    Ok(base.join(STORAGE_NAMESPACE).join(TOKEN_FILE_NAME))
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<CredentialPair>, TokenStoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let pair = serde_json::from_slice(&bytes)?;
        Ok(Some(pair))
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut bytes = serde_json::to_vec(pair)?;
        let tmp = self.temp_path();
        let written = write_private(&tmp, &bytes);
        bytes.zeroize();
        written?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps the last loaded or written pair in memory in front of a slower
/// store (file, keychain) so the request path does no blocking I/O after the
/// first read. Writes go to the inner store first and only then update the
/// cache.
///
/// Changes made to the inner store behind this wrapper's back (another
/// process rewriting the token file) are not observed.
pub struct CachedTokenStore<S> {
    inner: S,
    // `None` until the inner store has been read once.
    cached: RwLock<Option<Option<CredentialPair>>>,
}

impl<S: TokenStore> CachedTokenStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cached: RwLock::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn replace(&self, next: Option<CredentialPair>) {
        let mut guard = self.cached.write().unwrap_or_else(|e| e.into_inner());
        if let Some(Some(ref mut old)) = *guard {
            old.zeroize();
        }
        *guard = Some(next);
    }
}

impl<S: TokenStore> TokenStore for CachedTokenStore<S> {
    fn load(&self) -> Result<Option<CredentialPair>, TokenStoreError> {
        if let Some(ref pair) = *self.cached.read().unwrap_or_else(|e| e.into_inner()) {
            return Ok(pair.clone());
        }
        let mut guard = self.cached.write().unwrap_or_else(|e| e.into_inner());
        if let Some(ref pair) = *guard {
            return Ok(pair.clone());
        }
        let pair = self.inner.load()?;
        *guard = Some(pair.clone());
        Ok(pair)
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), TokenStoreError> {
        self.inner.save(pair)?;
        self.replace(Some(pair.clone()));
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        self.inner.clear()?;
        self.replace(None);
        Ok(())
    }
}

/// Create (or truncate) `path` readable only by the current user.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_returns_exactly_what_was_set() {
        let store = MemoryTokenStore::new();
        store.set_tokens("  access ", "refresh\n").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("  access "));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("refresh\n"));
    }

    #[test]
    fn memory_store_clear_empties_both_tokens() {
        let store = MemoryTokenStore::with_tokens("a", "r");
        store.clear_tokens().unwrap();
        assert_eq!(store.access_token().unwrap(), None);
        assert_eq!(store.refresh_token().unwrap(), None);
        // Second clear is a no-op
        store.clear_tokens().unwrap();
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("tokens.json"));

        assert_eq!(store.load().unwrap(), None);

        store.set_tokens("a1", "r1").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a1"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));

        store.set_tokens("a2", "r2").unwrap();
        assert_eq!(store.load().unwrap(), Some(CredentialPair::new("a2", "r2")));
        assert!(!store.temp_path().exists());

        store.clear_tokens().unwrap();
        assert_eq!(store.access_token().unwrap(), None);
        assert!(!store.path().exists());
        store.clear_tokens().unwrap();
    }

    #[test]
    fn file_store_reports_corrupt_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, b"not json").unwrap();

        let store = FileTokenStore::new(path);
        assert!(matches!(store.load(), Err(TokenStoreError::Corrupt(_))));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_private_to_the_user() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));
        store.set_tokens("a", "r").unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn cached_store_reads_the_file_once_and_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        FileTokenStore::new(&path).set_tokens("a1", "r1").unwrap();

        let store = CachedTokenStore::new(FileTokenStore::new(&path));
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a1"));

        // Served from memory once loaded
        fs::remove_file(&path).unwrap();
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));

        store.set_tokens("a2", "r2").unwrap();
        assert_eq!(
            store.inner().load().unwrap(),
            Some(CredentialPair::new("a2", "r2"))
        );
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a2"));

        store.clear_tokens().unwrap();
        assert!(!path.exists());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn cached_store_keeps_old_pair_when_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        // The parent is a regular file, so creating the token file fails
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let store = CachedTokenStore::new(FileTokenStore::new(blocker.join("tokens.json")));
        assert_eq!(store.load().unwrap(), None);

        assert!(store.set_tokens("a", "r").is_err());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let pair = CredentialPair::new("secret-access", "secret-refresh");
        let shown = format!("{:?}", pair);
        assert!(!shown.contains("secret"));
    }
}
