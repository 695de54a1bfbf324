//! Outbound email: formatting, transmission and a background delivery queue.
//!
//! This module is a thin layer over [lettre](https://lettre.rs). Messages are
//! rendered into a small raw header block and handed to a [`Transport`] either
//! once for all recipients or once per recipient ("massive" delivery).
//!
//! # Quick Start
//!
//! ```ignore
//! // 1. Build a mailer from MAILER_* environment variables
//! let config = MailerConfig::load()?;
//! let mailer = Mailer::from_config(&config)?;
//!
//! // 2. Send directly
//! let message = Message::text(["user@example.com"], "noreply@example.com", "Welcome!", "Thanks for signing up.");
//! let delivered = mailer.send(&message).await?;
//!
//! // 3. Or queue for background delivery
//! let queue = Dispatcher::new(mailer).capacity(config.send_buffer_len).start()?;
//! queue.try_enqueue(message)?;
//! // ...
//! queue.stop().await;
//! ```

mod content;
mod mailer;
mod message;
mod queue;
mod transport;

pub use content::{render, ContentKind};
pub use mailer::{DeliveryReport, Mailer, RecipientOutcome, SendError};
pub use message::{Message, MessageBuilder};
pub use queue::{DispatchState, Dispatcher, EnqueueError, FailurePolicy, MailQueue};
pub use transport::{MemoryTransport, SentMail, SmtpTransport, Transport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("empty receive emails")]
    NoRecipients,

    #[error("empty email body")]
    EmptyBody,

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("invalid config: {0}")]
    Config(String),
}

impl MailError {
    /// Whether the message itself was rejected before any network activity.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MailError::NoRecipients | MailError::EmptyBody | MailError::InvalidAddress(_)
        )
    }
}

impl From<crate::config::ConfigError> for MailError {
    fn from(err: crate::config::ConfigError) -> Self {
        MailError::Config(err.to_string())
    }
}
