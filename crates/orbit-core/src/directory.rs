use std::time::Duration;

use serde_json::json;
use tracing::info;

use orbit_common::{Error, Result};

const DIRECTORY_URL_ENV: &str = "ORBIT_DIRECTORY_URL";

/// Client for the public pool directory.
///
/// Purely a consumer of an already-minted `user_api_key` carried as a
/// bearer token; this crate never talks to the identity provider itself.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    base: String,
    http: reqwest::Client,
}

impl DirectoryClient {
    /// Build from `ORBIT_DIRECTORY_URL`; `None` when no directory is
    /// configured, which callers treat as "registration disabled".
    pub fn from_env() -> Option<Self> {
        let base = std::env::var(DIRECTORY_URL_ENV).ok()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Some(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    #[cfg(test)]
    fn with_base(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Publish a pool so others can discover and join it.
    pub async fn register_pool(
        &self,
        user_api_key: &str,
        cluster_name: &str,
        join_token: &str,
    ) -> Result<()> {
        let body = json!({ "cluster_name": cluster_name, "join_token": join_token });
        self.post("/v1/pools", user_api_key, &body).await?;
        info!(cluster = %cluster_name, "pool registered with directory");
        Ok(())
    }

    /// Withdraw a pool from the directory.
    pub async fn unregister_pool(&self, user_api_key: &str, cluster_name: &str) -> Result<()> {
        let body = json!({ "cluster_name": cluster_name });
        self.post("/v1/pools/delete", user_api_key, &body).await?;
        Ok(())
    }

    async fn post(
        &self,
        endpoint: &str,
        user_api_key: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        let url = format!("{}{}", self.base, endpoint);
        let response = self
            .http
            .post(&url)
            .bearer_auth(user_api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::WatcherUnreachable(format!("directory: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::WatcherDomain {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn register_sends_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pools"))
            .and(header("authorization", "Bearer minted-key"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = DirectoryClient::with_base(&server.uri());
        client
            .register_pool("minted-key", "my-pool", "token")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn directory_rejection_is_a_domain_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pools"))
            .respond_with(ResponseTemplate::new(403).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let client = DirectoryClient::with_base(&server.uri());
        let err = client
            .register_pool("minted-key", "my-pool", "token")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WatcherDomain { status: 403, .. }));
    }
}
