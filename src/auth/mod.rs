//! Session and authentication providers.
//!
//! A login turns the opaque per-channel [`AuthParams`] into a
//! [`SessionHandle`] that the fetcher attaches to every request of the run.
//! Two flows exist:
//!
//! - scripted browser form login, yielding a cookie string ([`BrowserLogin`])
//! - REST token handshake, yielding a bearer token ([`TokenLogin`])
//!
//! Nothing is retained between logins apart from the returned handle.

mod browser;
mod token;

#[cfg(feature = "browser")]
pub use browser::ChromiumDriver;
pub use browser::{BrowserLogin, LoginDriver, UnavailableDriver, cookie_string};
pub use token::TokenLogin;

use crate::error::{Error, Result};
use reqwest::RequestBuilder;
use reqwest::header::{AUTHORIZATION, COOKIE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials for a browser form login
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct FormLogin {
    /// Login page URL
    pub url: String,

    /// `(field selector, value)` for the user name
    pub username: (String, String),

    /// `(field selector, value)` for the password
    pub password: (String, String),

    /// Selector of the submit button
    pub submit: String,
}

impl fmt::Debug for FormLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormLogin")
            .field("url", &self.url)
            .field("username", &(&self.username.0, &self.username.1))
            .field("password", &(&self.password.0, "***"))
            .field("submit", &self.submit)
            .finish()
    }
}

impl FormLogin {
    /// Copy with `env[NAME]` placeholders in the field values replaced by
    /// `lookup(NAME)`.
    pub fn resolved_with(&self, lookup: &impl Fn(&str) -> Option<String>) -> Result<FormLogin> {
        Ok(FormLogin {
            url: self.url.clone(),
            username: (self.username.0.clone(), resolve(&self.username.1, lookup)?),
            password: (self.password.0.clone(), resolve(&self.password.1, lookup)?),
            submit: self.submit.clone(),
        })
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn resolve(value: &str, lookup: &impl Fn(&str) -> Option<String>) -> Result<String> {
    match value.strip_prefix("env[").and_then(|rest| rest.strip_suffix(']')) {
        Some(name) => lookup(name)
            .ok_or_else(|| Error::Config(format!("environment variable {} is not set", name))),
        None => Ok(value.to_string()),
    }
}

/// Per-channel authentication parameters, stored as JSON
#[derive(Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthParams {
    /// Public channel
    #[default]
    None,

    /// Scripted browser login
    Form(FormLogin),

    /// User name and password exchanged for a bearer token
    Password { username: String, password: String },
}

impl fmt::Debug for AuthParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthParams::None => f.write_str("None"),
            AuthParams::Form(form) => f.debug_tuple("Form").field(form).finish(),
            AuthParams::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

impl AuthParams {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid auth parameters: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Copy with every `env[NAME]` secret placeholder replaced by
    /// `lookup(NAME)`. A missing variable is a [`Error::Config`] error.
    pub fn resolved_with(&self, lookup: &impl Fn(&str) -> Option<String>) -> Result<AuthParams> {
        Ok(match self {
            AuthParams::None => AuthParams::None,
            AuthParams::Form(form) => AuthParams::Form(form.resolved_with(lookup)?),
            AuthParams::Password { username, password } => AuthParams::Password {
                username: resolve(username, lookup)?,
                password: resolve(password, lookup)?,
            },
        })
    }
}

/// Reusable credential for one crawl run
#[derive(Clone, PartialEq)]
pub enum SessionHandle {
    Anonymous,

    /// Flat `name=value; name2=value2` cookie string
    Cookie(String),

    /// Bearer token for the `Authorization` header
    Bearer(String),
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionHandle::Anonymous => f.write_str("Anonymous"),
            SessionHandle::Cookie(_) => f.write_str("Cookie(***)"),
            SessionHandle::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

impl SessionHandle {
    /// Attach the credential to a request
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            SessionHandle::Anonymous => request,
            SessionHandle::Cookie(cookies) => request.header(COOKIE, cookies.as_str()),
            SessionHandle::Bearer(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
        }
    }
}

/// Login flow selected for a platform
pub enum Authenticator {
    Browser(BrowserLogin),
    Token(TokenLogin),
}

impl Authenticator {
    /// Establish a session for the given parameters.
    ///
    /// `env[NAME]` placeholders are read from the process environment.
    /// Public channels (`AuthParams::None`) get an anonymous session without
    /// touching the network.
    pub async fn login(&self, params: &AuthParams) -> Result<SessionHandle> {
        self.login_with(params, &env_lookup).await
    }

    /// [`Authenticator::login`] with placeholders resolved through `lookup`
    pub async fn login_with(
        &self,
        params: &AuthParams,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<SessionHandle> {
        match (self, params.resolved_with(lookup)?) {
            (_, AuthParams::None) => Ok(SessionHandle::Anonymous),
            (Authenticator::Browser(browser), AuthParams::Form(form)) => browser.login(&form).await,
            (Authenticator::Token(token), AuthParams::Password { username, password }) => {
                token.login(&username, &password).await
            }
            (Authenticator::Browser(_), _) => Err(Error::Config(
                "platform requires form login parameters".to_string(),
            )),
            (Authenticator::Token(_), _) => Err(Error::Config(
                "platform requires username/password parameters".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchConfig;

    fn token_authenticator() -> Authenticator {
        let base = url::Url::parse("https://tube.example").unwrap();
        Authenticator::Token(TokenLogin::new(base, &FetchConfig::default()).unwrap())
    }

    #[test]
    fn test_auth_params_json() {
        let params = AuthParams::from_json(
            r##"{"method":"form","url":"https://site/login","username":["#user","me"],"password":["#pass","secret"],"submit":"#go"}"##,
        )
        .unwrap();
        let AuthParams::Form(form) = &params else {
            panic!("expected form login");
        };
        assert_eq!(form.username, ("#user".to_string(), "me".to_string()));
        assert_eq!(form.submit, "#go");

        assert_eq!(AuthParams::from_json(r#"{"method":"none"}"#).unwrap(), AuthParams::None);
        assert!(AuthParams::from_json(r#"{"method":"oauth"}"#).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let params = AuthParams::Password {
            username: "me".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", params);
        assert!(rendered.contains("me"));
        assert!(!rendered.contains("hunter2"));

        let session = SessionHandle::Cookie("sid=secret".to_string());
        assert!(!format!("{:?}", session).contains("secret"));
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    #[test]
    fn test_form_values_from_environment() {
        let form = FormLogin {
            url: "https://site/login/".into(),
            username: ("#user_login".into(), "literal".into()),
            password: ("#user_pass".into(), "env[LOGIN_PASSWORD]".into()),
            submit: "#wp-submit".into(),
        };
        assert!(matches!(form.resolved_with(&lookup(&[])), Err(Error::Config(_))));

        let resolved = form.resolved_with(&lookup(&[("LOGIN_PASSWORD", "s3cret")])).unwrap();
        assert_eq!(resolved.username.1, "literal");
        assert_eq!(resolved.password.1, "s3cret");
    }

    #[tokio::test]
    async fn test_token_login_reads_password_from_environment() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/oauth-clients/local")
            .with_status(200)
            .with_body(r#"{"client_id":"cid","client_secret":"csecret"}"#)
            .create_async()
            .await;
        let token = server
            .mock("POST", "/api/v1/users/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("username".into(), "me".into()),
                mockito::Matcher::UrlEncoded("password".into(), "realsecret".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"tok","token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let base = url::Url::parse(&server.url()).unwrap();
        let login = Authenticator::Token(TokenLogin::new(base, &FetchConfig::default()).unwrap());
        let params = AuthParams::Password {
            username: "me".to_string(),
            password: "env[TUBE_PASSWORD]".to_string(),
        };

        let missing = login.login_with(&params, &lookup(&[])).await;
        assert!(matches!(missing, Err(Error::Config(_))));

        let session = login
            .login_with(&params, &lookup(&[("TUBE_PASSWORD", "realsecret")]))
            .await
            .unwrap();
        assert_eq!(session, SessionHandle::Bearer("tok".to_string()));
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_public_channel_gets_anonymous_session() {
        let login = token_authenticator();
        let session = login.login(&AuthParams::None).await.unwrap();
        assert_eq!(session, SessionHandle::Anonymous);
    }

    #[tokio::test]
    async fn test_mismatched_params_are_config_errors() {
        let login = token_authenticator();
        let form = AuthParams::Form(FormLogin {
            url: "https://site/login".into(),
            username: ("#u".into(), "me".into()),
            password: ("#p".into(), "pw".into()),
            submit: "#go".into(),
        });
        assert!(matches!(login.login(&form).await, Err(Error::Config(_))));
    }
}
