//! Message transmission over a [`Transport`].

use std::sync::Arc;

use lettre::address::{Address, Envelope};
use thiserror::Error;

use super::message::{with_to_header, Message};
use super::transport::{SmtpTransport, Transport};
use super::MailError;
use crate::config::MailerConfig;

/// Failure of [`Mailer::send`], with the number of transmissions that
/// succeeded before it.
#[derive(Debug, Error)]
#[error("{error} ({delivered} delivered)")]
pub struct SendError {
    pub delivered: usize,
    #[source]
    pub error: MailError,
}

impl SendError {
    fn before_any(error: MailError) -> Self {
        Self {
            delivered: 0,
            error,
        }
    }
}

/// Outcome of a single transmission inside a [`DeliveryReport`].
#[derive(Debug)]
pub struct RecipientOutcome {
    /// Envelope recipients of the transmission: one address in massive mode,
    /// all of them otherwise.
    pub recipients: Vec<String>,
    pub result: Result<(), MailError>,
}

/// Per-transmission results from [`Mailer::send_each`], in delivery order.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub outcomes: Vec<RecipientOutcome>,
}

impl DeliveryReport {
    /// Number of successful transmissions.
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecipientOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Validates messages and sends them through a [`Transport`].
///
/// Non-massive messages go out as one transmission whose `To` header lists
/// every recipient separated by `;`. Massive messages go out once per
/// recipient, each with its own `To` header.
pub struct Mailer<T: Transport = SmtpTransport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for Mailer<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

impl Mailer<SmtpTransport> {
    /// Create an SMTP mailer from explicit configuration.
    pub fn from_config(config: &MailerConfig) -> Result<Self, MailError> {
        Ok(Self::new(SmtpTransport::from_config(config)?))
    }

    /// Create an SMTP mailer from `MAILER_*` environment variables.
    pub fn from_env() -> Result<Self, MailError> {
        Self::from_config(&MailerConfig::load()?)
    }
}

impl<T: Transport> Mailer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `message`, returning how many transmissions succeeded.
    ///
    /// Empty recipients or body fail before anything touches the network. In
    /// massive mode the first failing recipient stops the loop: its error is
    /// returned with the count delivered so far and later recipients are not
    /// attempted.
    pub async fn send(&self, message: &Message) -> Result<usize, SendError> {
        tracing::trace!(recipients = %message.recipients(), "sending mail");

        validate(message).map_err(SendError::before_any)?;
        let from = parse_address(&message.from).map_err(SendError::before_any)?;
        let content = message.content();

        if !message.massive {
            self.transmit(&from, &message.to, &message.to.join(";"), &content)
                .await
                .map_err(SendError::before_any)?;
            return Ok(1);
        }

        let mut delivered = 0;
        for to in &message.to {
            self.transmit(&from, std::slice::from_ref(to), to, &content)
                .await
                .map_err(|error| SendError { delivered, error })?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Send `message` and report every transmission separately.
    ///
    /// Unlike [`Mailer::send`], a massive message is attempted for every
    /// recipient even after a failure. Only validation errors are returned as
    /// `Err`.
    pub async fn send_each(&self, message: &Message) -> Result<DeliveryReport, MailError> {
        tracing::trace!(recipients = %message.recipients(), "sending mail");

        validate(message)?;
        let from = parse_address(&message.from)?;
        let content = message.content();

        let mut report = DeliveryReport::default();
        if message.massive {
            for to in &message.to {
                let result = self
                    .transmit(&from, std::slice::from_ref(to), to, &content)
                    .await;
                if let Err(e) = &result {
                    tracing::warn!(recipient = %to, error = %e, "delivery failed");
                }
                report.outcomes.push(RecipientOutcome {
                    recipients: vec![to.clone()],
                    result,
                });
            }
        } else {
            let result = self
                .transmit(&from, &message.to, &message.to.join(";"), &content)
                .await;
            report.outcomes.push(RecipientOutcome {
                recipients: message.to.clone(),
                result,
            });
        }

        Ok(report)
    }

    async fn transmit(
        &self,
        from: &Address,
        to: &[String],
        to_header: &str,
        content: &str,
    ) -> Result<(), MailError> {
        let recipients = to
            .iter()
            .map(|addr| parse_address(addr))
            .collect::<Result<Vec<_>, _>>()?;
        let envelope =
            Envelope::new(Some(from.clone()), recipients).map_err(|_| MailError::NoRecipients)?;

        let raw = with_to_header(to_header, content);
        self.transport.send_raw(&envelope, &raw).await
    }
}

fn validate(message: &Message) -> Result<(), MailError> {
    if message.to.is_empty() {
        return Err(MailError::NoRecipients);
    }
    if message.body.is_empty() {
        return Err(MailError::EmptyBody);
    }
    Ok(())
}

fn parse_address(address: &str) -> Result<Address, MailError> {
    address
        .parse()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}
