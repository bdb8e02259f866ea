//! Client builder for configuring reconnection and other options
//!
//! The `ClientBuilder` provides a fluent API for configuring client behavior
//! before connecting. It allows you to:
//! - Choose or disable the reconnection strategy
//! - Set request and connect timeouts and the heartbeat reply
//! - Configure automatic login
//! - Configure observability (OpenTelemetry) and client metrics
//!
//! # Examples
//!
//! ```rust,no_run
//! use noex_client::{ClientBuilder, ReconnectOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> noex_core::Result<()> {
//! // With bounded reconnection and a login token
//! let client = ClientBuilder::new("ws://localhost:8080")
//!     .with_reconnect(ReconnectOptions::default().with_max_retries(5))
//!     .request_timeout(Duration::from_secs(3))
//!     .with_token("secret")
//!     .connect()
//!     .await?;
//!
//! // With observability
//! let client2 = ClientBuilder::new("ws://localhost:8080")
//!     .with_default_observability()
//!     .service_name("my-client")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{AuthOptions, ClientOptions, Credentials, NonRetryableCode, ReconnectOptions};
use crate::metrics::ClientMetrics;
use crate::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use crate::NoexClient;
use noex_core::{Error, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and creating a [`NoexClient`]
pub struct ClientBuilder {
    url: String,
    options: ClientOptions,
    reconnect_strategy: Option<Arc<dyn ReconnectionStrategy>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    enable_metrics: bool,
}

impl ClientBuilder {
    /// Create a new client builder
    ///
    /// Reconnection with default exponential backoff is enabled.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: ClientOptions::default(),
            reconnect_strategy: None,
            observability_config: None,
            service_name: None,
            enable_metrics: false,
        }
    }

    /// Start from a complete set of options
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Reconnect with exponential backoff tuned by `options`
    pub fn with_reconnect(mut self, options: ReconnectOptions) -> Self {
        self.options.reconnect = Some(options);
        self.reconnect_strategy = None;
        self
    }

    /// Reconnect with a custom strategy
    pub fn with_reconnect_strategy(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.options.reconnect = Some(self.options.reconnect.unwrap_or_default());
        self.reconnect_strategy = Some(Arc::new(strategy));
        self
    }

    /// Disable automatic reconnection
    pub fn without_reconnect(mut self) -> Self {
        self.options.reconnect = None;
        self.reconnect_strategy = None;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    /// Bound on the socket handshake and, separately, on the wait for `welcome`
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Answer server pings (default `true`)
    pub fn heartbeat(mut self, enable: bool) -> Self {
        self.options.heartbeat = enable;
        self
    }

    /// Log in with a static token when the server requires authentication
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let auth = self.options.auth.get_or_insert_with(AuthOptions::default);
        auth.token = Some(token.into());
        self
    }

    /// Log in with username and password when the server requires
    /// authentication and no token is configured
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let auth = self.options.auth.get_or_insert_with(AuthOptions::default);
        auth.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Replace the set of close codes that never trigger a reconnect
    pub fn non_retryable_close_codes(mut self, codes: Vec<NonRetryableCode>) -> Self {
        self.options.non_retryable_close_codes = codes;
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    ///
    /// Implies [`with_metrics`](Self::with_metrics).
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self.enable_metrics = true;
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(self) -> Self {
        self.with_observability(ObservabilityConfig::default())
    }

    /// Record client metrics on the global meter provider
    ///
    /// Use this when the application installs its own provider.
    pub fn with_metrics(mut self) -> Self {
        self.enable_metrics = true;
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Build the client without connecting
    ///
    /// # Errors
    ///
    /// `Error::Internal` when observability is configured and cannot be
    /// initialized.
    pub fn build(self) -> Result<NoexClient> {
        let mut service_name = self
            .service_name
            .clone()
            .unwrap_or_else(|| ObservabilityConfig::default().service_name);

        if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }
            service_name = config.service_name.clone();

            noex_core::init_observability(config)
                .map_err(|e| Error::Internal(format!("Failed to initialize observability: {}", e)))?;
        }

        let metrics = self
            .enable_metrics
            .then(|| Arc::new(ClientMetrics::new(service_name)));

        let strategy = match (&self.options.reconnect, self.reconnect_strategy) {
            (None, _) => None,
            (Some(_), Some(custom)) => Some(custom),
            (Some(options), None) => {
                Some(Arc::new(ExponentialBackoff::from(options.clone())) as Arc<dyn ReconnectionStrategy>)
            }
        };

        if let Some(ref m) = metrics {
            m.update_connection_state(crate::ConnectionState::Disconnected);
        }

        Ok(NoexClient::from_parts(self.url, self.options, strategy, metrics))
    }

    /// Build and connect the client
    pub async fn connect(self) -> Result<NoexClient> {
        let client = self.build()?;
        client.connect().await?;
        Ok(client)
    }
}
