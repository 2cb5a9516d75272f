//! Client configuration.

use crate::error::{ApiError, ApiResult};
use crate::token::ScopeKey;
use ctp_common::{HttpConfig, PayloadCipher};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

/// Default authorization server.
pub const DEFAULT_AUTH_URL: &str = "https://auth.europe-west1.gcp.commercetools.com";
/// Default API host.
pub const DEFAULT_API_URL: &str = "https://api.europe-west1.gcp.commercetools.com";
/// Default scope when none is configured.
pub const DEFAULT_SCOPE: &str = "manage_project";
/// Default bound on concurrently dispatched batch requests.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 25;

/// How failures reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Requests that tolerate absence return `Ok(None)` on 404.
    #[default]
    Value,
    /// Every failure is an `Err`, 404 included.
    Raise,
}

impl std::str::FromStr for ErrorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "value" => Ok(Self::Value),
            "raise" => Ok(Self::Raise),
            other => Err(format!("unknown error mode '{other}' (expected value or raise)")),
        }
    }
}

/// Settings for one API client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project key; prefixes every API path
    pub project_key: String,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: SecretString,
    /// Scopes requested by default
    pub scopes: Vec<String>,
    /// Authorization server base URL
    pub auth_url: String,
    /// API base URL
    pub api_url: String,
    /// Transport settings (timeouts, TLS, user agent)
    pub http: HttpConfig,
    /// 404 reporting
    pub error_mode: ErrorMode,
    /// Maximum batch requests in flight (default: 25)
    pub batch_concurrency: usize,
    /// Refresh tokens this long before they expire (default: 60s)
    pub token_refresh_margin: Duration,
    /// Base64 32-byte key sealing tokens in the token store
    pub token_encryption_key: Option<SecretString>,
}

impl ClientConfig {
    /// Create a configuration with default endpoints and scope.
    #[must_use]
    pub fn new(
        project_key: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            project_key: project_key.into(),
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            scopes: vec![DEFAULT_SCOPE.to_string()],
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            http: HttpConfig::default(),
            error_mode: ErrorMode::default(),
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            token_refresh_margin: Duration::from_secs(60),
            token_encryption_key: None,
        }
    }

    /// Set the requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the authorization server URL.
    #[must_use]
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    /// Set the API URL.
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set transport settings.
    #[must_use]
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = self.http.with_timeout(timeout);
        self
    }

    /// Enable or disable certificate verification.
    #[must_use]
    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.http = self.http.with_verify_tls(verify);
        self
    }

    /// Set the error mode.
    #[must_use]
    pub const fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Set the batch concurrency bound.
    #[must_use]
    pub const fn with_batch_concurrency(mut self, limit: usize) -> Self {
        self.batch_concurrency = limit;
        self
    }

    /// Set the token refresh margin.
    #[must_use]
    pub const fn with_token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = margin;
        self
    }

    /// Seal cached tokens with a base64 32-byte key.
    #[must_use]
    pub fn with_token_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.token_encryption_key = Some(SecretString::from(key.into()));
        self
    }

    /// Load configuration from `CTP_*` environment variables, reading `.env`
    /// first when present.
    ///
    /// Required: `CTP_PROJECT_KEY`, `CTP_CLIENT_ID`, `CTP_CLIENT_SECRET`.
    /// Optional: `CTP_SCOPES` (space or comma separated), `CTP_AUTH_URL`,
    /// `CTP_API_URL`, `CTP_TIMEOUT_SECS`, `CTP_VERIFY_TLS`, `CTP_ERROR_MODE`,
    /// `CTP_BATCH_CONCURRENCY`, `CTP_TOKEN_REFRESH_MARGIN_SECS`,
    /// `CTP_TOKEN_ENCRYPTION_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] if a required variable is missing or
    /// a value does not parse.
    pub fn from_env() -> ApiResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` using the `CTP_*` names of
    /// [`ClientConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] if a required variable is missing or
    /// a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> ApiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ApiError::InvalidConfig(format!("{name} is required")))
        };

        let mut config = Self::new(
            required("CTP_PROJECT_KEY")?,
            required("CTP_CLIENT_ID")?,
            required("CTP_CLIENT_SECRET")?,
        );

        if let Some(scopes) = lookup("CTP_SCOPES") {
            config.scopes = scopes
                .split([' ', ','])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(url) = lookup("CTP_AUTH_URL") {
            config.auth_url = url;
        }
        if let Some(url) = lookup("CTP_API_URL") {
            config.api_url = url;
        }

        let timeout = parse_var(&lookup, "CTP_TIMEOUT_SECS", config.http.timeout.as_secs())?;
        let verify_tls = parse_var(&lookup, "CTP_VERIFY_TLS", config.http.verify_tls)?;
        config.http = config
            .http
            .with_timeout(Duration::from_secs(timeout))
            .with_verify_tls(verify_tls);

        config.error_mode = parse_var(&lookup, "CTP_ERROR_MODE", config.error_mode)?;
        config.batch_concurrency =
            parse_var(&lookup, "CTP_BATCH_CONCURRENCY", config.batch_concurrency)?;
        config.token_refresh_margin = Duration::from_secs(parse_var(
            &lookup,
            "CTP_TOKEN_REFRESH_MARGIN_SECS",
            config.token_refresh_margin.as_secs(),
        )?);
        config.token_encryption_key = lookup("CTP_TOKEN_ENCRYPTION_KEY").map(SecretString::from);

        Ok(config)
    }

    /// Check required fields and URL syntax.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> ApiResult<()> {
        for (name, value) in [
            ("project_key", self.project_key.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::InvalidConfig(format!("{name} must not be empty")));
            }
        }
        if self.project_key.contains('/') {
            return Err(ApiError::InvalidConfig(
                "project_key must not contain '/'".to_string(),
            ));
        }
        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(ApiError::InvalidConfig(
                "at least one scope is required".to_string(),
            ));
        }
        if self.batch_concurrency == 0 {
            return Err(ApiError::InvalidConfig(
                "batch_concurrency must be at least 1".to_string(),
            ));
        }
        parse_base_url("auth_url", &self.auth_url)?;
        parse_base_url("api_url", &self.api_url)?;
        self.token_cipher()?;
        Ok(())
    }

    /// Token endpoint URL.
    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.auth_url.trim_end_matches('/'))
    }

    /// Scope key for calls that do not declare their own scope.
    #[must_use]
    pub fn default_scope(&self) -> ScopeKey {
        ScopeKey::new(&self.client_id, &self.project_key, &self.scopes)
    }
}

/// Parse an `http(s)` base URL.
pub(crate) fn parse_base_url(name: &str, value: &str) -> ApiResult<Url> {
    let url = Url::parse(value)
        .map_err(|e| ApiError::InvalidConfig(format!("{name} '{value}' is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ApiError::InvalidConfig(format!(
            "{name} '{value}' must be an http(s) URL"
        )));
    }
    Ok(url)
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> ApiResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| ApiError::InvalidConfig(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}
