//! Client-credentials token acquisition

use lockwarden_cloud_api::{CloudError, CloudResult};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are refreshed this long before the provider says they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(120);

/// Service principal credentials
#[derive(Clone)]
pub struct ClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Fetches and caches bearer tokens for the resource-manager audience
pub struct TokenProvider {
    http: reqwest::Client,
    credentials: Option<ClientCredentials>,
    login_endpoint: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(
        http: reqwest::Client,
        credentials: Option<ClientCredentials>,
        login_endpoint: &str,
        management_endpoint: &str,
    ) -> Self {
        Self {
            http,
            credentials,
            login_endpoint: login_endpoint.trim_end_matches('/').to_string(),
            scope: format!("{}/.default", management_endpoint.trim_end_matches('/')),
            cached: Mutex::new(None),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// A valid bearer token, fetching a new one when the cached one is stale
    pub async fn token(&self) -> CloudResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let fresh = self.fetch().await?;
        let value = fresh.access_token.clone();
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: fresh.access_token,
            refresh_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn fetch(&self) -> CloudResult<TokenResponse> {
        let Some(credentials) = &self.credentials else {
            return Err(CloudError::Unauthorized(
                "no service principal credentials configured".into(),
            ));
        };

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint, credentials.tenant_id
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CloudError::Transport(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Unauthorized(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| CloudError::Malformed(format!("token response: {}", e)))?;
        debug!(expires_in = token.expires_in, "Acquired access token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn spawn_token_server(calls: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/tenant-1/oauth2/v2.0/token",
            post(move || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({
                        "token_type": "Bearer",
                        "expires_in": 3599,
                        "access_token": format!("token-{}", n),
                    }))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    fn credentials() -> ClientCredentials {
        ClientCredentials {
            tenant_id: "tenant-1".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
        }
    }

    #[tokio::test]
    async fn token_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let login = spawn_token_server(calls.clone()).await;
        let provider = TokenProvider::new(
            reqwest::Client::new(),
            Some(credentials()),
            &login,
            "https://management.azure.com",
        );

        assert_eq!(provider.token().await.unwrap(), "token-0");
        assert_eq!(provider.token().await.unwrap(), "token-0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_credentials_are_unauthorized() {
        let provider = TokenProvider::new(
            reqwest::Client::new(),
            None,
            "http://127.0.0.1:9",
            "https://management.azure.com",
        );
        assert!(!provider.has_credentials());
        assert!(matches!(
            provider.token().await,
            Err(CloudError::Unauthorized(_))
        ));
    }

    #[test]
    fn secret_is_not_printed() {
        let text = format!("{:?}", credentials());
        assert!(!text.contains("secret\""));
        assert!(text.contains("<redacted>"));
    }
}
