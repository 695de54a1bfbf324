//! Application-facing mail service.

use crate::config::MailerConfig;
use crate::mail::{
    DeliveryReport, Dispatcher, EnqueueError, MailError, MailQueue, Mailer, Message, SendError,
    SmtpTransport, Transport,
};

/// Sync and queued delivery behind one handle.
///
/// Own one per application (typically in shared state) and call
/// [`Postbox::stop`] during shutdown so queued mail is flushed.
///
/// ```ignore
/// let postbox = Postbox::from_env()?;
///
/// // Wait for delivery
/// postbox.send(&Message::text(["user@example.com"], "noreply@example.com", "Code", "123456")).await?;
///
/// // Fire and forget
/// postbox.send_async(Message::html(["user@example.com"], "noreply@example.com", "Digest", html))?;
/// ```
pub struct Postbox<T: Transport = SmtpTransport> {
    mailer: Mailer<T>,
    queue: MailQueue,
}

impl<T: Transport> Clone for Postbox<T> {
    fn clone(&self) -> Self {
        Self {
            mailer: self.mailer.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl Postbox<SmtpTransport> {
    /// SMTP delivery configured from `config`. Starts the dispatcher, so it
    /// must be called from within a tokio runtime.
    pub fn from_config(config: &MailerConfig) -> Result<Self, MailError> {
        let mailer = Mailer::from_config(config)?;
        Self::start(Dispatcher::new(mailer).with_config(config))
    }

    /// SMTP delivery configured from `MAILER_*` environment variables.
    pub fn from_env() -> Result<Self, MailError> {
        Self::from_config(&MailerConfig::load()?)
    }
}

impl<T: Transport> Postbox<T> {
    pub fn start(dispatcher: Dispatcher<T>) -> Result<Self, MailError> {
        let mailer = dispatcher.mailer().clone();
        let queue = dispatcher.start()?;
        Ok(Self { mailer, queue })
    }

    /// Send now and wait for the outcome.
    pub async fn send(&self, message: &Message) -> Result<usize, SendError> {
        self.mailer.send(message).await
    }

    /// Send now and report each transmission.
    pub async fn send_each(&self, message: &Message) -> Result<DeliveryReport, MailError> {
        self.mailer.send_each(message).await
    }

    /// Queue for background delivery without waiting. The outcome only shows
    /// up in the logs.
    pub fn send_async(&self, message: Message) -> Result<(), EnqueueError> {
        self.queue.try_enqueue(message)
    }

    /// Queue for background delivery, waiting for room if the queue is full.
    pub async fn enqueue(&self, message: Message) -> Result<(), EnqueueError> {
        self.queue.enqueue(message).await
    }

    pub fn mailer(&self) -> &Mailer<T> {
        &self.mailer
    }

    pub fn queue(&self) -> &MailQueue {
        &self.queue
    }

    /// Flush queued mail and stop the dispatcher.
    pub async fn stop(&self) {
        self.queue.stop().await;
    }
}
