use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use orbit_common::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(2);

pub const API_KEY_HEADER: &str = "X-API-KEY";
pub const USER_HEADER: &str = "USER";
pub const USER_KEY_HEADER: &str = "USER-KEY";

/// Authenticated JSON client for the pool's watcher service.
///
/// Every request carries the tier key in `X-API-KEY`; user identity
/// travels in `USER`/`USER-KEY` when attached. A connection failure is
/// retried once after a short delay; watcher-side failures (any status
/// at or above 400) come back as `Error::WatcherDomain` with the body
/// forwarded verbatim.
#[derive(Debug, Clone)]
pub struct WatcherClient {
    base: String,
    auth_key: String,
    user_id: Option<String>,
    user_api_key: Option<String>,
    http: reqwest::Client,
}

impl WatcherClient {
    pub fn new(watcher_service: &str, auth_key: &str) -> Self {
        let base = if watcher_service.starts_with("http://")
            || watcher_service.starts_with("https://")
        {
            watcher_service.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", watcher_service.trim_end_matches('/'))
        };
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            base,
            auth_key: auth_key.to_string(),
            user_id: None,
            user_api_key: None,
            http,
        }
    }

    /// Attach a user identity to every subsequent request.
    pub fn with_user(mut self, user_id: &str, user_api_key: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self.user_api_key = Some(user_api_key.to_string());
        self
    }

    pub async fn get(&self, endpoint: &str) -> Result<Value> {
        self.request(reqwest::Method::GET, endpoint, None).await
    }

    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.request(reqwest::Method::POST, endpoint, Some(body))
            .await
    }

    /// Health probe with a caller-chosen timeout; never retries.
    pub async fn is_alive(&self, timeout: Duration) -> bool {
        let url = format!("{}/v1/health", self.base);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.auth_key)
            .timeout(timeout)
            .send()
            .await;
        matches!(response, Ok(r) if r.status().is_success())
    }

    async fn request(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let response = match self.send_once(method.clone(), endpoint, body).await {
            Ok(response) => response,
            Err(first) => {
                debug!(endpoint, error = %first, "watcher request failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                self.send_once(method, endpoint, body)
                    .await
                    .map_err(|e| Error::WatcherUnreachable(e.to_string()))?
            }
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::WatcherDomain {
                status: status.as_u16(),
                detail,
            });
        }
        response
            .json()
            .await
            .map_err(|e| Error::WatcherUnreachable(format!("invalid watcher response: {e}")))
    }

    async fn send_once(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}{}", self.base, endpoint);
        let mut request = self
            .http
            .request(method, &url)
            .header(API_KEY_HEADER, &self.auth_key);
        if let (Some(user), Some(key)) = (&self.user_id, &self.user_api_key) {
            request = request.header(USER_HEADER, user).header(USER_KEY_HEADER, key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await
    }
}
