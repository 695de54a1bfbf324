//! Raw header block rendering.

/// Kind of body carried by a message; selects the `Content-Type` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentKind {
    #[default]
    Plain,
    Html,
}

impl ContentKind {
    pub fn content_type(self) -> &'static str {
        match self {
            ContentKind::Plain => "text/plain; charset=UTF-8",
            ContentKind::Html => "text/html; charset=UTF-8",
        }
    }
}

/// Render the `From`, `Subject` and `Content-Type` headers followed by a blank
/// line and the body, CRLF separated.
///
/// Nothing is escaped. Callers must keep line breaks out of `sender_name`,
/// `from` and `subject`.
pub fn render(
    sender_name: &str,
    from: &str,
    subject: &str,
    body: &str,
    kind: ContentKind,
) -> String {
    format!(
        "From: {sender_name}<{from}>\r\nSubject: {subject}\r\nContent-Type: {}\r\n\r\n{body}",
        kind.content_type()
    )
}
