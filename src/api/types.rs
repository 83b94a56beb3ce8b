//! Request and response types for the Kassa auth endpoints.
//!
//! The backend speaks snake_case JSON, matching the Rust field names.

use serde::{Deserialize, Serialize};

/// Login request body sent to POST /auth/login.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub login: &'a str,
    pub password: &'a str,
}

/// Token pair returned by POST /auth/login and POST /auth/refresh.
///
/// `refresh_token` is optional so a refresh that does not rotate the
/// refresh token keeps the stored one.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Refresh request body sent to POST /auth/refresh.
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Profile of the logged-in user from GET /auth/me.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: i64,
    pub login: String,
    pub name: String,
    pub role: String,
    pub active: bool,
    #[serde(default)]
    pub branch_id: Option<i64>,
    #[serde(default)]
    pub branch_name: Option<String>,
}
