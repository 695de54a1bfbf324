pub mod config;
pub mod mail;
mod service;

pub use config::{EnvConfig, MailerConfig, TlsMode};
pub use mail::{
    ContentKind, DeliveryReport, DispatchState, Dispatcher, EnqueueError, FailurePolicy, MailError,
    MailQueue, Mailer, MemoryTransport, Message, SendError, SmtpTransport, Transport,
};
pub use service::Postbox;
