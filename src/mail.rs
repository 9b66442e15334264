//! Outbound mail
//!
//! Only the password reset email is sent. Delivery goes through a
//! [`MailSender`]. [`SmtpMailer`] relays over SMTP when `MAIL_SERVER` is set,
//! [`LogMailer`] records that a message went out and [`Outbox`] keeps them in
//! memory.
//!
//! | variable | default |
//! |---|---|
//! | `MAIL_SERVER` | unset (log only) |
//! | `MAIL_PORT` | `587` |
//! | `MAIL_USE_TLS` | `true` |
//! | `MAIL_USERNAME` | unset |
//! | `MAIL_PASSWORD` | unset |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::config::{env_flag, env_parse, ConfigError};
use crate::models::Account;

pub const RESET_SUBJECT: &str = "Password Reset Request";
pub const DEFAULT_SENDER: &str = "noreply@blog.com";

/// Mail transport failures.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("invalid mail address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("could not build message: {0}")]
    Message(String),
}

/// A composed plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub body: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

/// Absolute link to the reset page for `token`.
pub fn reset_link(public_base_url: &str, token: &str) -> String {
    format!("{}/reset-password/{}", public_base_url.trim_end_matches('/'), token)
}

/// Compose the reset email for `account`.
pub fn reset_message(account: &Account, sender: &str, link: &str) -> MailMessage {
    MailMessage {
        subject: RESET_SUBJECT.to_string(),
        sender: sender.to_string(),
        recipients: vec![account.email.clone()],
        body: format!(
            "To reset the password visit the following link:\n{link}\n\n\
             If you did not make this request then simply ignore this email.\n"
        ),
    }
}

// ============================================================================
// SMTP
// ============================================================================

pub const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP relay settings.
#[derive(Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    /// Upgrade the connection with STARTTLS
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SmtpConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_SMTP_PORT,
            use_tls: true,
            username: None,
            password: None,
        }
    }

    /// `None` when `MAIL_SERVER` is unset.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let server = match std::env::var("MAIL_SERVER") {
            Ok(server) if !server.trim().is_empty() => server.trim().to_string(),
            _ => return Ok(None),
        };
        Ok(Some(Self {
            port: env_parse("MAIL_PORT", DEFAULT_SMTP_PORT)?,
            use_tls: env_flag("MAIL_USE_TLS", true),
            username: std::env::var("MAIL_USERNAME").ok(),
            password: std::env::var("MAIL_PASSWORD").ok(),
            server,
        }))
    }
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Turn a [`MailMessage`] into a plain-text RFC 5322 message.
pub fn build_email(message: &MailMessage) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(mailbox(&message.sender)?)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_PLAIN);
    for recipient in &message.recipients {
        builder = builder.to(mailbox(recipient)?);
    }
    builder
        .body(message.body.clone())
        .map_err(|e| MailError::Message(e.to_string()))
}

/// Delivers through an SMTP relay.
#[derive(Clone)]
pub struct SmtpMailer {
    server: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer").field("server", &self.server).finish()
    }
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
                .map_err(|e| MailError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.server.as_str())
        };
        builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            server: config.server.clone(),
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        let email = build_email(&message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        info!(
            server = %self.server,
            subject = %message.subject,
            recipients = ?message.recipients,
            "Mail relayed"
        );
        Ok(())
    }
}

// ============================================================================
// Local senders
// ============================================================================

/// Records that a message went out without delivering it. The body carries a
/// live reset token and is never logged.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        info!(
            subject = %message.subject,
            sender = %message.sender,
            recipients = ?message.recipients,
            "Outbound mail not delivered, no MAIL_SERVER configured"
        );
        Ok(())
    }
}

/// Keeps sent messages in memory.
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    sent: Arc<Mutex<Vec<MailMessage>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first.
    pub fn messages(&self) -> Vec<MailMessage> {
        self.sent.lock().clone()
    }

    pub fn last(&self) -> Option<MailMessage> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl MailSender for Outbox {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        self.sent.lock().push(message);
        Ok(())
    }
}
