//! OAuth 2.0 refresh-token exchange against the CRM token endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::credentials::CredentialStore;
use crate::error::{CrmError, RefreshError};
use crate::types::Credential;

/// Mints a new access credential when the CRM reports the current one expired.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchanges the stored refresh token, persists the new pair and returns it.
    async fn refresh(&self, store: &dyn CredentialStore) -> Result<Credential, RefreshError>;
}

/// Integration credentials registered with the CRM.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub base_url: Url,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub request_timeout: Duration,
}

pub struct OAuthRefresher {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
    refresh_token: &'a str,
    redirect_uri: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl OAuthRefresher {
    pub fn new(config: OAuthClientConfig) -> Result<Self, CrmError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CrmError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            token_url: format!(
                "{}/oauth2/access_token",
                config.base_url.as_str().trim_end_matches('/')
            ),
            client_id: config.client_id,
            client_secret: config.client_secret,
            redirect_uri: config.redirect_uri,
        })
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, store: &dyn CredentialStore) -> Result<Credential, RefreshError> {
        let current = store.load().await?;
        let refresh_token = current
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(RefreshError::MissingRefreshToken)?;

        let response = self
            .http
            .post(&self.token_url)
            .json(&RefreshRequest {
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                grant_type: "refresh_token",
                refresh_token,
                redirect_uri: &self.redirect_uri,
            })
            .send()
            .await
            .map_err(CrmError::from)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), %body, "Token refresh rejected");
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        if tokens.access_token.is_empty() {
            return Err(RefreshError::InvalidResponse(
                "access_token is empty".to_string(),
            ));
        }

        let refreshed = Credential {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or(current.refresh_token),
        };
        store.save(&refreshed).await?;

        tracing::info!(expires_in = ?tokens.expires_in, "Access token refreshed");
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::FileCredentialStore;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refresher_for(server: &MockServer) -> OAuthRefresher {
        OAuthRefresher::new(OAuthClientConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            client_id: "client-1".into(),
            client_secret: "secret-1".into(),
            redirect_uri: "https://example.com/oauth".into(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    async fn store_with(dir: &tempfile::TempDir, credential: Credential) -> FileCredentialStore {
        let store = FileCredentialStore::new(dir.path().join("tokens.json"));
        store.save(&credential).await.unwrap();
        store
    }

    #[tokio::test]
    async fn refresh_exchanges_and_persists_new_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/access_token"))
            .and(body_json(json!({
                "client_id": "client-1",
                "client_secret": "secret-1",
                "grant_type": "refresh_token",
                "refresh_token": "refresh-1",
                "redirect_uri": "https://example.com/oauth"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "expires_in": 86400,
                "access_token": "access-2",
                "refresh_token": "refresh-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, Credential::new("access-1", Some("refresh-1".into()))).await;

        let refreshed = refresher_for(&server).refresh(&store).await.unwrap();
        assert_eq!(refreshed, Credential::new("access-2", Some("refresh-2".into())));
        assert_eq!(store.load().await.unwrap(), refreshed);
    }

    #[tokio::test]
    async fn refresh_keeps_previous_refresh_token_when_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/access_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access_token": "access-2" })),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, Credential::new("access-1", Some("refresh-1".into()))).await;

        let refreshed = refresher_for(&server).refresh(&store).await.unwrap();
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn rejected_refresh_leaves_store_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/access_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let stored = Credential::new("access-1", Some("refresh-1".into()));
        let store = store_with(&dir, stored.clone()).await;

        let err = refresher_for(&server).refresh(&store).await.unwrap_err();
        assert!(matches!(err, RefreshError::Rejected { status: 400, .. }));
        assert_eq!(store.load().await.unwrap(), stored);
    }

    #[tokio::test]
    async fn access_only_record_cannot_be_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, Credential::new("access-1", None)).await;

        let err = refresher_for(&server).refresh(&store).await.unwrap_err();
        assert!(matches!(err, RefreshError::MissingRefreshToken));
    }
}
