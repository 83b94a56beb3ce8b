//! API client module for the Kassa backend.
//!
//! Provides the authenticated HTTP client with transparent token refresh,
//! credential storage (memory, file, OS keychain), error normalization and
//! the auth endpoints built on top of them.

pub mod auth;
pub mod client;
pub mod error;
pub mod form;
#[cfg(feature = "keychain")]
pub mod keychain;
pub mod refresh;
pub mod tokens;
pub mod types;

pub use client::{normalize_path, ApiClient, ApiClientBuilder, CredentialsMode, RequestOptions};
pub use error::{ApiError, HttpError, RequestContext};
pub use form::UploadForm;
pub use refresh::RefreshError;
pub use tokens::{
    CachedTokenStore, CredentialPair, FileTokenStore, MemoryTokenStore, TokenStore,
    TokenStoreError,
};
