use std::sync::Arc;

use kassa_client::api::types::AuthUser;
use kassa_client::api::{auth, ApiClient, MemoryTokenStore, TokenStore};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn login_stores_tokens_and_profile_uses_them() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"login": "admin", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("Authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "login": "admin",
            "name": "Administrator",
            "role": "admin",
            "active": true,
            "branch_id": 2,
            "branch_name": "Central"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let client = ApiClient::new(&server.uri(), store.clone()).unwrap();
    assert!(!auth::is_logged_in(&client).unwrap());

    let session = auth::login(&client, "admin", "secret").await.unwrap();
    assert_eq!(session.token_type, "bearer");
    assert!(session.refreshable);
    assert!(auth::is_logged_in(&client).unwrap());

    let user: AuthUser = auth::me(&client).await.unwrap();
    assert_eq!(user.login, "admin");
    assert_eq!(user.branch_name.as_deref(), Some("Central"));

    auth::logout(&client).unwrap();
    assert_eq!(store.access_token().unwrap(), None);
    assert_eq!(store.refresh_token().unwrap(), None);
}

#[tokio::test]
async fn wrong_password_does_not_trigger_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"detail": "Неверный логин или пароль"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // A stale session from an earlier run must survive a failed login
    let store = Arc::new(MemoryTokenStore::with_tokens("old", "old-refresh"));
    let client = ApiClient::new(&server.uri(), store.clone()).unwrap();

    let err = auth::login(&client, "admin", "wrong").await.unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(err.message(), "Неверный логин или пароль");
    assert_eq!(store.access_token().unwrap().as_deref(), Some("old"));
}
