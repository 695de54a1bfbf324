//! Message type and builder.

use super::content::{self, ContentKind};

/// An outbound message.
///
/// Recipients and body are only checked when the message is sent, so an
/// invalid message fails its own delivery and never the queue it sits in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Recipients, in delivery order.
    pub to: Vec<String>,
    /// Sender address.
    pub from: String,
    pub subject: String,
    pub body: String,
    /// Label shown before the address on the `From` line.
    pub sender_name: String,
    pub kind: ContentKind,
    /// Send one transmission per recipient instead of one for all.
    pub massive: bool,
    /// Free text included in delivery logs. Never transmitted.
    pub info: Option<String>,
}

impl Message {
    /// Plain text message to `to`.
    pub fn text(
        to: impl IntoIterator<Item = impl Into<String>>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::with_kind(to, from, subject, body, ContentKind::Plain)
    }

    /// HTML message to `to`.
    pub fn html(
        to: impl IntoIterator<Item = impl Into<String>>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::with_kind(to, from, subject, body, ContentKind::Html)
    }

    fn with_kind(
        to: impl IntoIterator<Item = impl Into<String>>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        kind: ContentKind,
    ) -> Self {
        Self {
            to: to.into_iter().map(Into::into).collect(),
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            kind,
            ..Default::default()
        }
    }

    /// Create a new message builder.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn massive(mut self, massive: bool) -> Self {
        self.massive = massive;
        self
    }

    /// Headers and body without the `To` line.
    pub fn content(&self) -> String {
        content::render(
            &self.sender_name,
            &self.from,
            &self.subject,
            &self.body,
            self.kind,
        )
    }

    /// Recipients joined for log lines.
    pub fn recipients(&self) -> String {
        self.to.join("; ")
    }
}

/// Prefix rendered content with a `To` header.
pub(crate) fn with_to_header(to: &str, content: &str) -> Vec<u8> {
    format!("To: {to}\r\n{content}").into_bytes()
}

/// Builder for constructing [`Message`] instances.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Add a recipient.
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.message.to.push(address.into());
        self
    }

    /// Add multiple recipients.
    pub fn to_many(mut self, addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.message
            .to
            .extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Set the sender address.
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.message.from = address.into();
        self
    }

    pub fn sender_name(mut self, name: impl Into<String>) -> Self {
        self.message.sender_name = name.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = subject.into();
        self
    }

    /// Set a plain text body.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.message.body = text.into();
        self.message.kind = ContentKind::Plain;
        self
    }

    /// Set an HTML body.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.message.body = html.into();
        self.message.kind = ContentKind::Html;
        self
    }

    pub fn massive(mut self, massive: bool) -> Self {
        self.message.massive = massive;
        self
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.message.info = Some(info.into());
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}
