//! Client library for the Kassa point-of-sale and inventory backend.
//!
//! The core is [`api::ApiClient`]: it attaches bearer credentials from a
//! [`api::TokenStore`], refreshes an expired access token once per call
//! (coalescing concurrent refreshes), and reports failures as either
//! transport errors or normalized HTTP errors.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kassa_client::api::{auth, ApiClient, MemoryTokenStore};
//!
//! # async fn demo() -> Result<(), kassa_client::api::ApiError> {
//! let client = ApiClient::new("http://127.0.0.1:8000/api", Arc::new(MemoryTokenStore::new()))?;
//! auth::login(&client, "admin", "secret").await?;
//! let products: serde_json::Value = client.get("products?page=1").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
