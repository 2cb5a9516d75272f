//! Harness for end-to-end tests: a mock platform serving both the token
//! endpoint and the project API.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use ctp_client::ClientConfig;
use ctp_test_utils::fixtures::token_response;
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Project key used by every scenario.
pub const PROJECT_KEY: &str = "e2e-project";

/// Mock auth and API server.
pub struct MockPlatform {
    server: MockServer,
}

impl MockPlatform {
    /// Start a server with nothing mounted.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Underlying server, for mounting API mocks.
    #[must_use]
    pub const fn server(&self) -> &MockServer {
        &self.server
    }

    /// Client configuration pointing both URLs at this server.
    #[must_use]
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(PROJECT_KEY, "e2e-client", "e2e-secret")
            .with_auth_url(self.server.uri())
            .with_api_url(self.server.uri())
    }

    /// API path for `relative` under the project.
    #[must_use]
    pub fn api_path(relative: &str) -> String {
        format!("/{PROJECT_KEY}/{relative}")
    }

    /// Issue `access_token` for the next `times` exchanges, or for every
    /// exchange when `times` is `None`.
    pub async fn issue_token(&self, access_token: &str, times: Option<u64>) {
        let scope = format!("manage_project:{PROJECT_KEY}");
        let mock = Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_response(access_token, 3600, &scope)),
            );
        match times {
            Some(n) => mock.up_to_n_times(n).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    /// Number of token exchanges received.
    pub async fn token_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/oauth/token")
            .count()
    }
}
