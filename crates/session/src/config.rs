use std::time::Duration;

use shotline_client::backoff::BackoffConfig;
use shotline_core::progress::DEFAULT_SETTLE_DELAY;

/// Session configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// REST base URL, also used for image downloads.
    pub api_url: String,
    /// Progress socket endpoint.
    pub ws_url: String,
    pub project_id: String,
    /// Bearer token for REST, images and the socket subscription.
    pub api_token: Option<String>,
    /// Grace period before settled progress is evicted.
    pub settle_delay: Duration,
    /// Initial search filter for the projected view.
    pub search: String,
    /// Retry schedule of the progress socket.
    pub reconnect: BackoffConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has an invalid value: '{value}'")]
    Invalid { var: &'static str, value: String },
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                    | Default                     |
    /// |----------------------------|-----------------------------|
    /// | `SHOTLINE_API_URL`         | `http://localhost:8000/api` |
    /// | `SHOTLINE_WS_URL`          | `ws://localhost:8000/ws`    |
    /// | `SHOTLINE_PROJECT_ID`      | required                    |
    /// | `SHOTLINE_API_TOKEN`       | unset                       |
    /// | `SHOTLINE_SETTLE_DELAY_MS` | `2000`                      |
    /// | `SHOTLINE_SEARCH`          | empty                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable
    /// lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let api_url = non_empty("SHOTLINE_API_URL")
            .unwrap_or_else(|| "http://localhost:8000/api".into());
        let ws_url = non_empty("SHOTLINE_WS_URL").unwrap_or_else(|| "ws://localhost:8000/ws".into());

        let project_id = non_empty("SHOTLINE_PROJECT_ID")
            .ok_or(ConfigError::Missing("SHOTLINE_PROJECT_ID"))?;

        let api_token = non_empty("SHOTLINE_API_TOKEN");

        let settle_delay = match non_empty("SHOTLINE_SETTLE_DELAY_MS") {
            Some(value) => {
                let ms: u64 = value.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: "SHOTLINE_SETTLE_DELAY_MS",
                    value: value.clone(),
                })?;
                Duration::from_millis(ms)
            }
            None => DEFAULT_SETTLE_DELAY,
        };

        let search = lookup("SHOTLINE_SEARCH").unwrap_or_default();

        Ok(Self {
            api_url,
            ws_url,
            project_id,
            api_token,
            settle_delay,
            search,
            reconnect: BackoffConfig::default(),
        })
    }
}
