//! Transport trait, SMTP implementation and an in-memory recorder.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tokio::sync::Mutex;

use super::MailError;
use crate::config::{MailerConfig, TlsMode};

/// Delivers already rendered messages.
///
/// Implement this trait to provide alternative backends (e.g., SES, Mailgun).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver `raw` to every recipient of `envelope` in a single transmission.
    async fn send_raw(&self, envelope: &Envelope, raw: &[u8]) -> Result<(), MailError>;
}

/// SMTP transport using lettre, authenticating with PLAIN when credentials are
/// configured.
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn from_config(config: &MailerConfig) -> Result<Self, MailError> {
        config.validate()?;
        let host = config.host_name();

        let mut builder = match config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| MailError::Smtp(e.to_string()))?,
            TlsMode::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| MailError::Smtp(e.to_string()))?,
        };

        builder = builder
            .port(config.port())
            .timeout(Some(config.timeout()));

        if let Some((user, password)) = config.credentials() {
            builder = builder
                .credentials(Credentials::new(user.to_string(), password.to_string()))
                .authentication(vec![Mechanism::Plain]);
        }

        tracing::debug!(host, port = config.port(), tls = ?config.tls, "smtp transport configured");

        Ok(Self {
            inner: builder.build(),
        })
    }

    /// Open a connection and check the server greets us.
    pub async fn test_connection(&self) -> Result<bool, MailError> {
        self.inner
            .test_connection()
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send_raw(&self, envelope: &Envelope, raw: &[u8]) -> Result<(), MailError> {
        self.inner
            .send_raw(envelope, raw)
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))?;
        Ok(())
    }
}

/// A transmission captured by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub from: Option<String>,
    pub to: Vec<String>,
    pub raw: String,
}

/// In-memory [`Transport`] for development and testing.
///
/// Accepted transmissions are recorded in order. Addresses registered with
/// [`MemoryTransport::reject`] make any transmission that includes them fail.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<SentMail>>>,
    attempted: Arc<Mutex<Vec<String>>>,
    rejected: Arc<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every transmission addressed to `address`.
    pub fn reject(mut self, address: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.rejected).push(address.into());
        self
    }

    /// Accepted transmissions, oldest first.
    pub async fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().await.clone()
    }

    /// Every envelope recipient the transport was asked to deliver to,
    /// including rejected ones.
    pub async fn attempted(&self) -> Vec<String> {
        self.attempted.lock().await.clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_raw(&self, envelope: &Envelope, raw: &[u8]) -> Result<(), MailError> {
        let to: Vec<String> = envelope.to().iter().map(ToString::to_string).collect();
        self.attempted.lock().await.extend(to.iter().cloned());

        if let Some(rejected) = to.iter().find(|addr| self.rejected.contains(*addr)) {
            return Err(MailError::Smtp(format!("recipient rejected: {rejected}")));
        }

        self.sent.lock().await.push(SentMail {
            from: envelope.from().map(ToString::to_string),
            to,
            raw: String::from_utf8_lossy(raw).into_owned(),
        });
        Ok(())
    }
}
