//! Access-token refresh with single-flight coalescing.
//!
//! Each `ApiClient` owns one `Refresher`. The first request to hit a 401
//! starts the exchange and parks a shared future in the refresher; requests
//! that hit 401 while it is pending await the same future, so a burst of
//! 401s costs exactly one POST /auth/refresh. Rotated refresh tokens would
//! otherwise invalidate each other and log the user out.

use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

use super::client::CLIENT_TYPE_HEADER;
use super::tokens::TokenStore;
use super::types::{RefreshRequest, TokenResponse};

/// Why a refresh did not produce a new access token. Cloneable so every
/// coalesced waiter receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("No refresh token stored")]
    MissingRefreshToken,

    #[error("Refresh rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Refresh response was not a token pair: {0}")]
    MalformedResponse(String),

    #[error("Token store failed during refresh: {0}")]
    Store(String),
}

/// New access token, or the reason the session ended.
pub type RefreshOutcome = Result<String, RefreshError>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    generation: u64,
    future: SharedRefresh,
}

#[derive(Default)]
struct RefreshSlot {
    next_generation: u64,
    in_flight: Option<InFlight>,
}

pub(crate) struct Refresher {
    http: reqwest::Client,
    url: String,
    client_type: String,
    store: Arc<dyn TokenStore>,
    slot: Mutex<RefreshSlot>,
}

impl Refresher {
    pub(crate) fn new(
        http: reqwest::Client,
        url: String,
        client_type: String,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            http,
            url,
            client_type,
            store,
            slot: Mutex::new(RefreshSlot::default()),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Get a usable access token after a request sent with `rejected` came
    /// back 401.
    ///
    /// Joins a pending refresh if there is one. If the stored token already
    /// differs from `rejected`, another call refreshed in the meantime and
    /// that token is returned without a network call.
    pub(crate) async fn refresh(&self, rejected: Option<&str>) -> RefreshOutcome {
        let (generation, future) = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            let pending = slot
                .in_flight
                .as_ref()
                .filter(|pending| pending.future.peek().is_none())
                .map(|pending| (pending.generation, pending.future.clone()));
            match pending {
                Some(joined) => {
                    log::debug!("Joining in-flight token refresh");
                    joined
                }
                None => {
                    if let Some(current) = self.rotated_token(rejected) {
                        log::debug!("Access token already refreshed by another request");
                        return Ok(current);
                    }
                    slot.next_generation += 1;
                    let generation = slot.next_generation;
                    let future = exchange(
                        self.http.clone(),
                        self.url.clone(),
                        self.client_type.clone(),
                        Arc::clone(&self.store),
                    )
                    .boxed()
                    .shared();
                    slot.in_flight = Some(InFlight {
                        generation,
                        future: future.clone(),
                    });
                    (generation, future)
                }
            }
        };

        let outcome = future.await;

        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot
            .in_flight
            .as_ref()
            .is_some_and(|pending| pending.generation == generation)
        {
            slot.in_flight = None;
        }
        outcome
    }

    /// The stored access token, if it is present and not the rejected one.
    fn rotated_token(&self, rejected: Option<&str>) -> Option<String> {
        match self.store.access_token() {
            Ok(Some(current)) if Some(current.as_str()) != rejected => Some(current),
            _ => None,
        }
    }
}

/// One POST to the refresh endpoint. Any failure clears the store: the
/// session is over and nothing retries automatically.
async fn exchange(
    http: reqwest::Client,
    url: String,
    client_type: String,
    store: Arc<dyn TokenStore>,
) -> RefreshOutcome {
    let refresh_token = match store.refresh_token() {
        Ok(Some(token)) if !token.is_empty() => token,
        Ok(_) => return end_session(&*store, RefreshError::MissingRefreshToken),
        Err(e) => return end_session(&*store, RefreshError::Store(e.to_string())),
    };

    log::debug!("POST {} (token refresh)", url);
    let resp = match http
        .post(&url)
        .header(CLIENT_TYPE_HEADER, client_type)
        .json(&RefreshRequest {
            refresh_token: &refresh_token,
        })
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => return end_session(&*store, RefreshError::Transport(e.to_string())),
    };

    let status = resp.status();
    if !status.is_success() {
        return end_session(
            &*store,
            RefreshError::Rejected {
                status: status.as_u16(),
            },
        );
    }

    let tokens: TokenResponse = match resp.json().await {
        Ok(tokens) => tokens,
        Err(e) => return end_session(&*store, RefreshError::MalformedResponse(e.to_string())),
    };

    let next_refresh = tokens.refresh_token.unwrap_or(refresh_token);
    if let Err(e) = store.set_tokens(&tokens.access_token, &next_refresh) {
        return end_session(&*store, RefreshError::Store(e.to_string()));
    }

    log::info!("Access token refreshed");
    Ok(tokens.access_token)
}

fn end_session(store: &dyn TokenStore, reason: RefreshError) -> RefreshOutcome {
    log::warn!("Token refresh failed, clearing stored credentials: {}", reason);
    if let Err(e) = store.clear_tokens() {
        log::warn!("Failed to clear stored credentials: {}", e);
    }
    Err(reason)
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::tokens::MemoryTokenStore;

    fn refresher(server: &MockServer, store: Arc<dyn TokenStore>) -> Refresher {
        Refresher::new(
            reqwest::Client::new(),
            format!("{}/auth/refresh", server.uri()),
            "test".to_string(),
            store,
        )
    }

    #[tokio::test]
    async fn missing_refresh_token_makes_no_network_call() {
        let server = MockServer::start().await;
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());

        let outcome = refresher(&server, store).refresh(None).await;

        assert_eq!(outcome, Err(RefreshError::MissingRefreshToken));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keeps_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refresh_token": "r1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "a2"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let store = Arc::new(MemoryTokenStore::with_tokens("a1", "r1"));

        let outcome = refresher(&server, store.clone()).refresh(Some("a1")).await;

        assert_eq!(outcome, Ok("a2".to_string()));
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn rejected_refresh_clears_store() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                serde_json::json!({"detail": "Invalid refresh token"}),
            ))
            .mount(&server)
            .await;
        let store = Arc::new(MemoryTokenStore::with_tokens("a1", "r1"));

        let outcome = refresher(&server, store.clone()).refresh(Some("a1")).await;

        assert_eq!(outcome, Err(RefreshError::Rejected { status: 401 }));
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_refresh_response_clears_store() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;
        let store = Arc::new(MemoryTokenStore::with_tokens("a1", "r1"));

        let outcome = refresher(&server, store.clone()).refresh(Some("a1")).await;

        assert!(matches!(outcome, Err(RefreshError::MalformedResponse(_))));
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn already_rotated_token_skips_the_network() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryTokenStore::with_tokens("fresh", "r2"));

        let outcome = refresher(&server, store).refresh(Some("stale")).await;

        assert_eq!(outcome, Ok("fresh".to_string()));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "a2", "refresh_token": "r2"}))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let store = Arc::new(MemoryTokenStore::with_tokens("a1", "r1"));
        let refresher = refresher(&server, store.clone());

        let outcomes =
            futures::future::join_all((0..5).map(|_| refresher.refresh(Some("a1")))).await;

        assert!(outcomes.iter().all(|o| o.as_deref() == Ok("a2")));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r2"));
        assert!(refresher.slot.lock().unwrap().in_flight.is_none());
    }
}
