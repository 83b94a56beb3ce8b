//! HTTP client with bearer injection and transparent token refresh.
//!
//! Every call goes through one pipeline: normalize the path, attach
//! headers, send, refresh-and-retry once on 401, parse the body as JSON or
//! text, then turn non-2xx into an `HttpError`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::error::{ApiError, HttpError, RequestContext};
use super::form::UploadForm;
use super::refresh::Refresher;
use super::tokens::TokenStore;

/// Header identifying the calling client to the backend.
pub const CLIENT_TYPE_HEADER: &str = "X-Client-Type";

/// Path of the token refresh endpoint, relative to the API base.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// `X-Client-Type` value when none is configured.
pub const DEFAULT_CLIENT_TYPE: &str = "cli";

/// Whether the client keeps and resends server-set cookies.
///
/// This is fixed per deployment when the client is built; individual calls
/// cannot change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialsMode {
    /// Bearer header only, no cookie jar.
    #[default]
    Omit,
    /// Keep a cookie jar and send its cookies on every call.
    Include,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers, applied over the defaults. `Authorization` is ignored.
    pub headers: HeaderMap,
    /// Aborts the call when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Request body, kept in a form that can be sent twice.
enum Payload<'a> {
    Empty,
    Json(Vec<u8>),
    Multipart(&'a UploadForm),
}

/// Turn any caller-supplied path into exactly one absolute path.
///
/// `"products?page=2"` and `"//products?page=2"` both become
/// `"/products?page=2"`; the query string is kept verbatim.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    store: Arc<dyn TokenStore>,
    credentials: CredentialsMode,
    client_type: String,
    connect_timeout: Option<Duration>,
    timeout: Option<Duration>,
    refresh_path: String,
}

impl ApiClientBuilder {
    pub fn credentials(mut self, mode: CredentialsMode) -> Self {
        self.credentials = mode;
        self
    }

    /// Value sent as `X-Client-Type` and reported as the request origin.
    pub fn client_type(mut self, client_type: impl Into<String>) -> Self {
        self.client_type = client_type.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn refresh_path(mut self, path: &str) -> Self {
        self.refresh_path = normalize_path(path);
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        let mut http = reqwest::Client::builder();
        if let Some(t) = self.connect_timeout {
            http = http.connect_timeout(t);
        }
        if let Some(t) = self.timeout {
            http = http.timeout(t);
        }
        if self.credentials == CredentialsMode::Include {
            http = http.cookie_store(true);
        }
        let http = http.build().map_err(ApiError::Setup)?;

        let base_url = self.base_url.trim_end_matches('/').to_string();
        let refresher = Refresher::new(
            http.clone(),
            format!("{}{}", base_url, self.refresh_path),
            self.client_type.clone(),
            Arc::clone(&self.store),
        );

        Ok(ApiClient {
            http,
            base_url,
            client_type: self.client_type,
            credentials: self.credentials,
            store: self.store,
            refresher,
        })
    }
}

/// Authenticated client for the Kassa REST API.
///
/// Share it behind an `Arc` across tasks; the token refresh is coalesced
/// per client instance.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    client_type: String,
    credentials: CredentialsMode,
    store: Arc<dyn TokenStore>,
    refresher: Refresher,
}

impl ApiClient {
    /// Client with transport defaults and the `omit` credentials policy.
    pub fn new(base_url: &str, store: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        Self::builder(base_url, store).build()
    }

    pub fn builder(base_url: &str, store: Arc<dyn TokenStore>) -> ApiClientBuilder {
        ApiClientBuilder {
            base_url: base_url.to_string(),
            store,
            credentials: CredentialsMode::default(),
            client_type: DEFAULT_CLIENT_TYPE.to_string(),
            connect_timeout: None,
            timeout: None,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn refresh_url(&self) -> &str {
        self.refresher.url()
    }

    pub fn credentials_mode(&self) -> CredentialsMode {
        self.credentials
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Full URL for a path, after normalization.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, normalize_path(path))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.get_with(path, &RequestOptions::default()).await
    }

    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::GET, path, Payload::Empty, options, true)
            .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.post_with(path, body, &RequestOptions::default()).await
    }

    pub async fn post_with<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let payload = json_payload(body)?;
        self.request(Method::POST, path, payload, options, true)
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.put_with(path, body, &RequestOptions::default()).await
    }

    pub async fn put_with<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let payload = json_payload(body)?;
        self.request(Method::PUT, path, payload, options, true)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.delete_with(path, &RequestOptions::default()).await
    }

    pub async fn delete_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, Payload::Empty, options, true)
            .await
    }

    /// Multipart POST. The runtime sets `Content-Type` with the boundary.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &UploadForm,
    ) -> Result<T, ApiError> {
        self.upload_with(path, form, &RequestOptions::default())
            .await
    }

    pub async fn upload_with<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &UploadForm,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Payload::Multipart(form), options, true)
            .await
    }

    /// JSON POST that never triggers a token refresh, for endpoints where a
    /// 401 means bad credentials rather than an expired session.
    pub(crate) async fn post_once<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let payload = json_payload(body)?;
        self.request(
            Method::POST,
            path,
            payload,
            &RequestOptions::default(),
            false,
        )
        .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: Payload<'_>,
        options: &RequestOptions,
        retry_allowed: bool,
    ) -> Result<T, ApiError> {
        let context = self.context(method, path);
        let reply = self
            .execute(&context, &payload, options, retry_allowed)
            .await?;

        let decoded = T::deserialize(&reply.body);
        let decoded = match decoded {
            // `()` and `Option<_>` targets accept a body-less success
            Err(first) if reply.empty => T::deserialize(Value::Null).map_err(|_| first),
            other => other,
        };
        decoded.map_err(|source| ApiError::Decode {
            status: reply.status,
            body: reply.body,
            source,
        })
    }

    fn context(&self, method: Method, path: &str) -> RequestContext {
        let path = normalize_path(path);
        RequestContext {
            method,
            url: format!("{}{}", self.base_url, path),
            path,
            api_base: self.base_url.clone(),
            origin: self.client_type.clone(),
        }
    }

    /// Send, refresh-and-retry at most once on 401, then classify.
    async fn execute(
        &self,
        context: &RequestContext,
        payload: &Payload<'_>,
        options: &RequestOptions,
        mut retry_allowed: bool,
    ) -> Result<Reply, ApiError> {
        let mut refreshed: Option<String> = None;
        let mut is_retry = false;
        loop {
            let token = match refreshed.take() {
                Some(token) => Some(token),
                None => self.store.access_token()?,
            };
            let resp = self
                .send(context, payload, options, token.as_deref())
                .await?;

            if resp.status() == StatusCode::UNAUTHORIZED && is_retry {
                log::warn!(
                    "{} still unauthorized after token refresh, clearing session",
                    context.path
                );
                self.store.clear_tokens()?;
            }

            if resp.status() == StatusCode::UNAUTHORIZED && retry_allowed {
                retry_allowed = false;
                let outcome = self
                    .cancellable(context, options, self.refresher.refresh(token.as_deref()))
                    .await?;
                match outcome {
                    Ok(new_token) => {
                        log::debug!("Retrying {} after token refresh", context.path);
                        refreshed = Some(new_token);
                        is_retry = true;
                        continue;
                    }
                    Err(e) => {
                        log::warn!("Session ended during {}: {}", context.path, e);
                    }
                }
            }

            return self.read_response(context, resp, options).await;
        }
    }

    async fn send(
        &self,
        context: &RequestContext,
        payload: &Payload<'_>,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut extra = options.headers.clone();
        extra.remove(AUTHORIZATION);

        let mut builder = self
            .http
            .request(context.method.clone(), &context.url)
            .header(CLIENT_TYPE_HEADER, &self.client_type)
            .header(ACCEPT, "application/json");

        builder = match payload {
            Payload::Empty => builder.headers(extra),
            Payload::Json(bytes) => builder
                .header(CONTENT_TYPE, "application/json")
                .headers(extra)
                .body(bytes.clone()),
            Payload::Multipart(form) => {
                // The boundary must come from the form itself
                extra.remove(CONTENT_TYPE);
                builder.headers(extra).multipart(form.to_form())
            }
        };

        if let Some(t) = token {
            builder = builder.bearer_auth(t);
        }

        log::debug!("{} {}", context.method, context.url);
        self.cancellable(context, options, builder.send())
            .await?
            .map_err(|source| ApiError::Network {
                context: Box::new(context.clone()),
                source,
            })
    }

    async fn read_response(
        &self,
        context: &RequestContext,
        resp: Response,
        options: &RequestOptions,
    ) -> Result<Reply, ApiError> {
        let status = resp.status();
        let text = self
            .cancellable(context, options, resp.text())
            .await?
            .map_err(|source| ApiError::Network {
                context: Box::new(context.clone()),
                source,
            })?;
        log::debug!("{} {} -> {}", context.method, context.url, status.as_u16());

        if !status.is_success() {
            let body = parse_body(&text).unwrap_or(Value::Null);
            return Err(HttpError::from_response(status.as_u16(), body, &text).into());
        }

        let body = match status {
            StatusCode::NO_CONTENT => None,
            _ => parse_body(&text),
        };
        Ok(Reply {
            status: status.as_u16(),
            empty: body.is_none(),
            body: body.unwrap_or_else(empty_object),
        })
    }

    /// Race `fut` against the call's cancellation token, if any.
    async fn cancellable<F: Future>(
        &self,
        context: &RequestContext,
        options: &RequestOptions,
        fut: F,
    ) -> Result<F::Output, ApiError> {
        let Some(cancel) = options.cancel.as_ref() else {
            return Ok(fut.await);
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("Aborted {}", context);
                Err(ApiError::Aborted { context: Box::new(context.clone()) })
            }
            out = fut => Ok(out),
        }
    }
}

/// A classified successful response.
struct Reply {
    status: u16,
    body: Value,
    /// 204 or a zero-length body; `body` is then `{}`.
    empty: bool,
}

fn json_payload<B: Serialize + ?Sized>(body: &B) -> Result<Payload<'static>, ApiError> {
    serde_json::to_vec(body)
        .map(Payload::Json)
        .map_err(ApiError::Encode)
}

/// JSON if it parses, otherwise the raw text. `None` for an empty body.
fn parse_body(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
