//! Client configuration
//!
//! Plain option structs with the defaults the server expects. Most callers
//! never build these by hand and go through [`ClientBuilder`](crate::ClientBuilder)
//! instead.

use std::time::Duration;

/// Default time to wait for a response to a single request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time to wait for the socket handshake, and separately for the
/// server's welcome frame
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A close code that must not trigger automatic reconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonRetryableCode {
    /// WebSocket close code
    pub code: u16,
    /// Label reported as the disconnect reason when the close frame has none
    pub label: String,
}

impl NonRetryableCode {
    pub fn new(code: u16, label: impl Into<String>) -> Self {
        Self {
            code,
            label: label.into(),
        }
    }
}

/// Close codes the server uses to say "do not come back"
///
/// - 1003: the client sent a binary frame
/// - 1008: policy violation (bad origin, banned client)
/// - 4002: the session was revoked by an administrator
/// - 4003: per-user connection limit reached
pub fn default_non_retryable_close_codes() -> Vec<NonRetryableCode> {
    vec![
        NonRetryableCode::new(1003, "binary_not_supported"),
        NonRetryableCode::new(1008, "policy_violation"),
        NonRetryableCode::new(4002, "session_revoked"),
        NonRetryableCode::new(4003, "too_many_connections"),
    ]
}

/// Exponential backoff parameters for automatic reconnection
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    /// Attempts before giving up; `None` retries forever
    pub max_retries: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound of the uniform random delay added to each attempt
    pub jitter: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(500),
        }
    }
}

impl ReconnectOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Username and password for `identity.login`
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the client authenticates when the server's welcome says
/// `requiresAuth`
///
/// A static token takes precedence over credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOptions {
    pub token: Option<String>,
    pub credentials: Option<Credentials>,
}

impl AuthOptions {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            credentials: None,
        }
    }

    pub fn credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            token: None,
            credentials: Some(Credentials::new(username, password)),
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub auth: Option<AuthOptions>,
    /// `None` disables automatic reconnection
    pub reconnect: Option<ReconnectOptions>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Answer server `ping` frames with `pong`
    pub heartbeat: bool,
    pub non_retryable_close_codes: Vec<NonRetryableCode>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auth: None,
            reconnect: Some(ReconnectOptions::default()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat: true,
            non_retryable_close_codes: default_non_retryable_close_codes(),
        }
    }
}

impl ClientOptions {
    /// Label of a non-retryable close code, `None` when the code is retryable
    pub fn non_retryable_label(&self, code: u16) -> Option<&str> {
        self.non_retryable_close_codes
            .iter()
            .find(|c| c.code == code)
            .map(|c| c.label.as_str())
    }
}
