//! Session operations: login, profile and logout.
//!
//! Login stores the returned token pair through the client's token store;
//! from then on every call carries the bearer token and refreshes it on 401.

use super::client::ApiClient;
use super::error::ApiError;
use super::types::{AuthUser, LoginRequest, TokenResponse};

const LOGIN_PATH: &str = "/auth/login";
const PROFILE_PATH: &str = "/auth/me";

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token_type: String,
    /// Whether the backend returned a refresh token. Without one the session
    /// ends at the first 401.
    pub refreshable: bool,
}

/// Log in with a login/password pair and persist the returned tokens.
///
/// A 401 here means wrong credentials, so no refresh is attempted.
pub async fn login(client: &ApiClient, login: &str, password: &str) -> Result<Session, ApiError> {
    log::info!("Logging in as {}", login);

    let resp: TokenResponse = client
        .post_once(LOGIN_PATH, &LoginRequest { login, password })
        .await?;

    let refresh_token = resp.refresh_token.unwrap_or_default();
    client
        .token_store()
        .set_tokens(&resp.access_token, &refresh_token)?;

    log::info!("Login complete for {}", login);
    Ok(Session {
        token_type: resp.token_type,
        refreshable: !refresh_token.is_empty(),
    })
}

/// Fetch the profile of the logged-in user.
pub async fn me(client: &ApiClient) -> Result<AuthUser, ApiError> {
    client.get(PROFILE_PATH).await
}

/// Forget the stored credentials. The backend keeps no server-side
/// session, so this is purely local.
pub fn logout(client: &ApiClient) -> Result<(), ApiError> {
    log::info!("Logging out");
    client.token_store().clear_tokens()?;
    Ok(())
}

/// Whether an access token is currently stored.
pub fn is_logged_in(client: &ApiClient) -> Result<bool, ApiError> {
    Ok(client.token_store().access_token()?.is_some())
}
