//! REST token handshake (OAuth2 password grant against a PeerTube instance)

use super::SessionHandle;
use crate::error::{Error, Result};
use crate::fetch::{CrawlError, FetchConfig, Fetcher};
use serde::Deserialize;
use tracing::{info, instrument};
use url::Url;

const CLIENT_PATH: &str = "/api/v1/oauth-clients/local";
const TOKEN_PATH: &str = "/api/v1/users/token";

#[derive(Debug, Deserialize)]
struct LocalClient {
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges a user name and password for a bearer token
pub struct TokenLogin {
    base: Url,
    fetcher: Fetcher,
}

impl TokenLogin {
    /// Create a login for the instance at `base`
    pub fn new(base: Url, config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            base,
            fetcher: Fetcher::new(config)?,
        })
    }

    #[instrument(skip(self, password), fields(instance = %self.base))]
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionHandle> {
        let client = self.local_client().await.map_err(|e| self.failure(e))?;

        let token_url = self.base.join(TOKEN_PATH).map_err(CrawlError::from)?;
        let form = [
            ("client_id", client.client_id),
            ("client_secret", client.client_secret),
            ("grant_type", "password".to_string()),
            ("response_type", "code".to_string()),
            ("username", username.to_string()),
            ("password", password.to_string()),
        ];
        let token: TokenResponse = self
            .fetcher
            .post_form(&token_url, &form, &SessionHandle::Anonymous)
            .await
            .map_err(|e| self.failure(e))?;

        if let Some(kind) = &token.token_type {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(Error::Authentication(format!(
                    "unexpected token type '{}' from {}",
                    kind, self.base
                )));
            }
        }
        info!(expires_in = token.expires_in, "Obtained access token");
        Ok(SessionHandle::Bearer(token.access_token))
    }

    async fn local_client(&self) -> std::result::Result<LocalClient, CrawlError> {
        let url = self.base.join(CLIENT_PATH)?;
        self.fetcher.get_json(&url, &[], &SessionHandle::Anonymous).await
    }

    fn failure(&self, e: CrawlError) -> Error {
        Error::Authentication(format!("token login to {} failed: {}", self.base, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use mockito::{Matcher, Server};

    fn config() -> FetchConfig {
        FetchConfig::builder()
            .requests_per_second(0)
            .retry(RetryPolicy::once())
            .build()
    }

    #[tokio::test]
    async fn test_token_handshake() {
        let mut server = Server::new_async().await;
        let client = server
            .mock("GET", CLIENT_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"client_id": "cid", "client_secret": "csecret"}"#)
            .create_async()
            .await;
        let token = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "csecret".into()),
                Matcher::UrlEncoded("grant_type".into(), "password".into()),
                Matcher::UrlEncoded("username".into(), "me".into()),
                Matcher::UrlEncoded("password".into(), "pw".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok", "token_type": "Bearer", "expires_in": 86399, "refresh_token": "r"}"#)
            .create_async()
            .await;

        let login = TokenLogin::new(Url::parse(&server.url()).unwrap(), &config()).unwrap();
        let session = login.login("me", "pw").await.unwrap();

        assert_eq!(session, SessionHandle::Bearer("tok".to_string()));
        client.assert_async().await;
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", CLIENT_PATH)
            .with_status(200)
            .with_body(r#"{"client_id": "cid", "client_secret": "csecret"}"#)
            .create_async()
            .await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(400)
            .with_body(r#"{"code": "invalid_grant"}"#)
            .create_async()
            .await;

        let login = TokenLogin::new(Url::parse(&server.url()).unwrap(), &config()).unwrap();
        let err = login.login("me", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_malformed_client_payload() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", CLIENT_PATH)
            .with_status(200)
            .with_body(r#"{"id": 1}"#)
            .create_async()
            .await;

        let login = TokenLogin::new(Url::parse(&server.url()).unwrap(), &config()).unwrap();
        let err = login.login("me", "pw").await.unwrap_err();
        assert!(matches!(err, Error::Authentication(msg) if msg.contains("JSON")));
    }
}
