//! Scripted browser form login.
//!
//! The retry and deadline logic lives in [`BrowserLogin`]; the actual browser
//! is hidden behind [`LoginDriver`] so it can be swapped out.

use super::{FormLogin, SessionHandle};
use crate::error::{Error, Result};
use crate::fetch::CrawlError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Something that can fill in and submit a login form once
#[async_trait]
pub trait LoginDriver: Send + Sync {
    /// Perform one login attempt and return the resulting cookie jar as
    /// `(name, value)` pairs. `timeout` is the deadline for this attempt.
    async fn attempt(
        &self,
        form: &FormLogin,
        timeout: Duration,
    ) -> std::result::Result<Vec<(String, String)>, CrawlError>;
}

/// Join cookies into a `Cookie` header value
pub fn cookie_string(cookies: &[(String, String)]) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Form login with retries and growing per-attempt deadlines
#[derive(Clone)]
pub struct BrowserLogin {
    driver: Arc<dyn LoginDriver>,
    policy: RetryPolicy,
}

impl BrowserLogin {
    pub fn new(driver: Arc<dyn LoginDriver>, policy: RetryPolicy) -> Self {
        Self { driver, policy }
    }

    /// Log in and return a cookie session.
    ///
    /// Field values are used as given; [`super::Authenticator::login`]
    /// resolves `env[NAME]` placeholders before calling this. Fails with
    /// [`Error::Authentication`] once the attempt budget is spent.
    #[instrument(skip(self, form), fields(url = %form.url))]
    pub async fn login(&self, form: &FormLogin) -> Result<SessionHandle> {
        let cookies = self
            .policy
            .run(
                "browser login",
                |attempt| {
                    let timeout = self.policy.timeout_for(attempt);
                    let driver = Arc::clone(&self.driver);
                    async move {
                        debug!(attempt, timeout_ms = timeout.as_millis() as u64, "Login attempt");
                        match tokio::time::timeout(timeout, driver.attempt(form, timeout)).await {
                            Ok(result) => result,
                            Err(_) => Err(CrawlError::Timeout(timeout)),
                        }
                    }
                },
                CrawlError::is_transient,
            )
            .await
            .map_err(|e| match e {
                CrawlError::Unsupported(msg) => Error::Config(msg),
                e => Error::Authentication(format!("login to {} failed: {}", form.url, e)),
            })?;

        if cookies.is_empty() {
            warn!("Login returned no cookies");
            return Err(Error::Authentication(format!(
                "login to {} produced no session cookies",
                form.url
            )));
        }

        info!(cookies = cookies.len(), "Logged in");
        Ok(SessionHandle::Cookie(cookie_string(&cookies)))
    }
}

/// Driver used when browser automation is not compiled in
pub struct UnavailableDriver;

#[async_trait]
impl LoginDriver for UnavailableDriver {
    async fn attempt(
        &self,
        _form: &FormLogin,
        _timeout: Duration,
    ) -> std::result::Result<Vec<(String, String)>, CrawlError> {
        Err(CrawlError::Unsupported(
            "browser login requires the `browser` feature".to_string(),
        ))
    }
}

#[cfg(feature = "browser")]
pub use chromium::ChromiumDriver;

#[cfg(feature = "browser")]
mod chromium {
    use super::*;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use std::path::PathBuf;

    fn browser_error(e: impl std::fmt::Display) -> CrawlError {
        CrawlError::Browser(e.to_string())
    }

    /// Headless Chromium driven over the DevTools protocol
    #[derive(Debug, Clone)]
    pub struct ChromiumDriver {
        headless: bool,
        executable: Option<PathBuf>,
    }

    impl Default for ChromiumDriver {
        fn default() -> Self {
            Self {
                headless: true,
                executable: None,
            }
        }
    }

    impl ChromiumDriver {
        pub fn new(headless: bool, executable: Option<PathBuf>) -> Self {
            Self {
                headless,
                executable,
            }
        }

        async fn submit_form(
            &self,
            browser: &Browser,
            form: &FormLogin,
        ) -> std::result::Result<Vec<(String, String)>, CrawlError> {
            debug!("Opening {}", form.url);
            let page: Page = browser.new_page(form.url.as_str()).await.map_err(browser_error)?;
            page.wait_for_navigation().await.map_err(browser_error)?;

            debug!("Typing credentials");
            let (user_field, user_value) = &form.username;
            page.find_element(user_field.as_str())
                .await
                .map_err(browser_error)?
                .click()
                .await
                .map_err(browser_error)?
                .type_str(user_value)
                .await
                .map_err(browser_error)?;
            let (pass_field, pass_value) = &form.password;
            page.find_element(pass_field.as_str())
                .await
                .map_err(browser_error)?
                .click()
                .await
                .map_err(browser_error)?
                .type_str(pass_value)
                .await
                .map_err(browser_error)?;

            debug!("Clicking submit");
            page.find_element(form.submit.as_str())
                .await
                .map_err(browser_error)?
                .click()
                .await
                .map_err(browser_error)?;
            page.wait_for_navigation().await.map_err(browser_error)?;

            let cookies = page.get_cookies().await.map_err(browser_error)?;
            if let Err(e) = page.close().await {
                debug!("Failed to close login page: {}", e);
            }
            Ok(cookies.into_iter().map(|c| (c.name, c.value)).collect())
        }
    }

    #[async_trait]
    impl LoginDriver for ChromiumDriver {
        async fn attempt(
            &self,
            form: &FormLogin,
            timeout: Duration,
        ) -> std::result::Result<Vec<(String, String)>, CrawlError> {
            let mut builder = BrowserConfig::builder()
                .no_sandbox()
                .arg("--disable-setuid-sandbox")
                .arg("--disable-dev-shm-usage")
                .window_size(1366, 768)
                .request_timeout(timeout);
            if !self.headless {
                builder = builder.with_head();
            }
            if let Some(path) = &self.executable {
                builder = builder.chrome_executable(path);
            }
            let config = builder.build().map_err(CrawlError::Browser)?;

            let (mut browser, mut handler) = Browser::launch(config).await.map_err(browser_error)?;
            let events = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            let result = self.submit_form(&browser, form).await;

            if let Err(e) = browser.close().await {
                debug!("Failed to close browser: {}", e);
            }
            let _ = browser.wait().await;
            events.abort();
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct ScriptedDriver {
        failures: u32,
        calls: AtomicU32,
        cookies: Vec<(String, String)>,
    }

    impl ScriptedDriver {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                cookies: vec![
                    ("sid".to_string(), "abc".to_string()),
                    ("wp_logged_in".to_string(), "1".to_string()),
                ],
            }
        }
    }

    #[async_trait]
    impl LoginDriver for ScriptedDriver {
        async fn attempt(
            &self,
            _form: &FormLogin,
            _timeout: Duration,
        ) -> std::result::Result<Vec<(String, String)>, CrawlError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(CrawlError::Browser(format!("navigation failed ({})", call)))
            } else {
                Ok(self.cookies.clone())
            }
        }
    }

    struct StuckDriver;

    #[async_trait]
    impl LoginDriver for StuckDriver {
        async fn attempt(
            &self,
            _form: &FormLogin,
            _timeout: Duration,
        ) -> std::result::Result<Vec<(String, String)>, CrawlError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn form() -> FormLogin {
        FormLogin {
            url: "https://site/login/".to_string(),
            username: ("#user_login".to_string(), "me".to_string()),
            password: ("#user_pass".to_string(), "secret".to_string()),
            submit: "#wp-submit".to_string(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            factor: 3,
            attempt_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_cookie_string() {
        let cookies = vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())];
        assert_eq!(cookie_string(&cookies), "a=1; b=2");
        assert_eq!(cookie_string(&[]), "");
    }

    #[tokio::test]
    async fn test_login_retries_with_backoff() {
        let driver = Arc::new(ScriptedDriver::new(2));
        let login = BrowserLogin::new(driver.clone(), policy());

        let started = Instant::now();
        let session = login.login(&form()).await.unwrap();

        assert_eq!(session, SessionHandle::Cookie("sid=abc; wp_logged_in=1".to_string()));
        assert_eq!(driver.calls.load(Ordering::SeqCst), 3);
        // 20ms after the first failure, 60ms after the second
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_login_fails_after_budget() {
        let driver = Arc::new(ScriptedDriver::new(5));
        let login = BrowserLogin::new(driver.clone(), policy());

        let err = login.login(&form()).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(driver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stuck_attempts_time_out() {
        let login = BrowserLogin::new(Arc::new(StuckDriver), policy());
        let err = login.login(&form()).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(msg) if msg.contains("Timed out")));
    }

    #[tokio::test]
    async fn test_unavailable_driver_is_config_error() {
        let login = BrowserLogin::new(Arc::new(UnavailableDriver), policy());
        let err = login.login(&form()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
