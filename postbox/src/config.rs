use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

pub use config::ConfigError;

use crate::mail::{FailurePolicy, MailError};

/// Environment prefix read by [`MailerConfig::load`].
pub const DEFAULT_PREFIX: &str = "MAILER";

/// Queue capacity used when `SEND_BUFFER_LEN` is not set.
pub const DEFAULT_SEND_BUFFER_LEN: usize = 10;

pub trait EnvConfig: Sized {
    fn from_env() -> Result<Self, ConfigError>;
    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError>;
}

impl<D> EnvConfig for D
where
    D: DeserializeOwned,
{
    fn from_env() -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix))
            .build()?
            .try_deserialize()
    }
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain connection upgraded with `STARTTLS`.
    #[default]
    Starttls,
    /// TLS from the first byte (SMTPS).
    Tls,
    /// Unencrypted. Only for local relays and test servers.
    None,
}

impl TlsMode {
    fn default_port(self) -> u16 {
        match self {
            TlsMode::Starttls => 587,
            TlsMode::Tls => 465,
            TlsMode::None => 25,
        }
    }
}

/// Mail delivery settings.
///
/// Loaded from `MAILER_*` environment variables by [`MailerConfig::load`]:
///
/// | Variable | Required | Description |
/// |----------|----------|-------------|
/// | `MAILER_HOST` | Yes | `host`, `host:port` or `[v6]:port` of the SMTP server |
/// | `MAILER_USER` | No | Username for PLAIN authentication |
/// | `MAILER_PASSWD` | No | Password for PLAIN authentication |
/// | `MAILER_SEND_BUFFER_LEN` | No | Async queue capacity (default: 10) |
/// | `MAILER_TLS` | No | `starttls` (default), `tls`, or `none` |
/// | `MAILER_TIMEOUT` | No | SMTP timeout in seconds (default: 10) |
/// | `MAILER_ENQUEUE_TIMEOUT_MS` | No | Bound for a waiting enqueue |
/// | `MAILER_STOP_ON_FAILURE` | No | Stop the dispatcher on the first failed send |
#[derive(Debug, Clone, Deserialize)]
pub struct MailerConfig {
    pub host: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub passwd: Option<String>,

    #[serde(default = "default_send_buffer_len")]
    pub send_buffer_len: usize,

    #[serde(default)]
    pub tls: TlsMode,

    /// Seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Milliseconds.
    #[serde(default)]
    pub enqueue_timeout_ms: Option<u64>,

    #[serde(default)]
    pub stop_on_failure: bool,
}

fn default_send_buffer_len() -> usize {
    DEFAULT_SEND_BUFFER_LEN
}

fn default_timeout() -> u64 {
    10
}

impl MailerConfig {
    /// Minimal configuration for `host`, everything else defaulted.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            passwd: None,
            send_buffer_len: DEFAULT_SEND_BUFFER_LEN,
            tls: TlsMode::default(),
            timeout: default_timeout(),
            enqueue_timeout_ms: None,
            stop_on_failure: false,
        }
    }

    /// Load from `MAILER_*` variables, reading `.env` first if present.
    pub fn load() -> Result<Self, MailError> {
        Self::load_with_prefix(DEFAULT_PREFIX)
    }

    pub fn load_with_prefix(prefix: &str) -> Result<Self, MailError> {
        dotenvy::dotenv().ok();

        let config = Self::from_env_with_prefix(prefix)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MailError> {
        let host = self.host_name();
        if host.is_empty() {
            return Err(MailError::Config("host must not be empty".into()));
        }
        if host.contains(['[', ']']) {
            return Err(MailError::Config(format!("malformed host: {}", self.host)));
        }
        if self.send_buffer_len == 0 {
            return Err(MailError::Config("send_buffer_len must be positive".into()));
        }
        Ok(())
    }

    /// The host without its port, used for the TLS and auth context.
    ///
    /// IPv6 addresses come back without brackets.
    pub fn host_name(&self) -> &str {
        self.split_port().0
    }

    /// The explicit port from `host`, or the default for the TLS mode.
    pub fn port(&self) -> u16 {
        self.split_port()
            .1
            .unwrap_or_else(|| self.tls.default_port())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn enqueue_timeout(&self) -> Option<Duration> {
        self.enqueue_timeout_ms.map(Duration::from_millis)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.stop_on_failure {
            FailurePolicy::Stop
        } else {
            FailurePolicy::Continue
        }
    }

    /// Non-empty username, if authentication is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let user = self.user.as_deref().filter(|u| !u.is_empty())?;
        Some((user, self.passwd.as_deref().unwrap_or_default()))
    }

    /// Accepts `name`, `name:port`, `[v6]`, `[v6]:port` and a bare IPv6
    /// address, which never carries a port.
    fn split_port(&self) -> (&str, Option<u16>) {
        let host = self.host.trim();

        if let Some(rest) = host.strip_prefix('[') {
            return match rest.split_once(']') {
                Some((addr, "")) => (addr, None),
                Some((addr, port)) => match port.strip_prefix(':').map(str::parse) {
                    Some(Ok(port)) => (addr, Some(port)),
                    _ => (host, None),
                },
                None => (host, None),
            };
        }

        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => match port.parse() {
                Ok(port) => (name, Some(port)),
                Err(_) => (host, None),
            },
            _ => (host, None),
        }
    }
}
