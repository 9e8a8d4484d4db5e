use std::time::Duration;

/// Client-side tunables. `Default` matches the values the hosted
/// deployment runs with; the builders exist for tests and the CLI.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the app server used for worker registration.
    pub app_server: String,
    /// Flat interval between worker (re-)registration attempts.
    pub retry_interval: Duration,
    /// Per-request timeout for HTTP calls.
    pub request_timeout: Duration,
    /// Run the chain/editor consistency check after every drained batch.
    pub consistency_checks: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_server: "http://127.0.0.1:8080".to_string(),
            retry_interval: Duration::from_millis(2500),
            request_timeout: Duration::from_secs(10),
            consistency_checks: false,
        }
    }
}

impl ClientConfig {
    pub fn with_app_server(mut self, url: impl Into<String>) -> Self {
        self.app_server = url.into();
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_consistency_checks(mut self, enabled: bool) -> Self {
        self.consistency_checks = enabled;
        self
    }
}
