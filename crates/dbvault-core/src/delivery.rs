//! Email delivery of encrypted artifacts.
//!
//! Delivery is attempted once. SMTP credentials travel inside
//! `SmtpSettings` and are never written to the process environment.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{info, instrument};

use crate::errors::{Result, VaultError};

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: PathBuf,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Implicit TLS; STARTTLS is used otherwise.
    pub secure: bool,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field("password", &"****")
            .field("from", &self.from)
            .finish()
    }
}

/// `Mailer` over SMTP with `lettre`.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    settings: SmtpSettings,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let builder = if self.settings.secure {
            SmtpTransport::relay(&self.settings.host)
        } else {
            SmtpTransport::starttls_relay(&self.settings.host)
        }
        .map_err(|e| {
            VaultError::DeliveryFailed(format!("SMTP relay {}: {}", self.settings.host, e))
        })?;

        Ok(builder
            .port(self.settings.port)
            .credentials(Credentials::new(
                self.settings.username.clone(),
                self.settings.password.clone(),
            ))
            .build())
    }

    fn build_message(&self, message: &EmailMessage, attachment: Vec<u8>) -> Result<Message> {
        let from: Mailbox = self
            .settings
            .from
            .parse()
            .map_err(|e| VaultError::DeliveryFailed(format!("invalid sender address: {}", e)))?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| VaultError::DeliveryFailed(format!("invalid recipient address: {}", e)))?;

        let file_name = message
            .attachment
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "backup.encrypted".to_string());
        let content_type = ContentType::parse("application/octet-stream")
            .map_err(|e| VaultError::DeliveryFailed(e.to_string()))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(message.body.clone()))
                    .singlepart(Attachment::new(file_name).body(attachment, content_type)),
            )
            .map_err(|e| VaultError::DeliveryFailed(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let attachment = tokio::fs::read(&message.attachment).await.map_err(|e| {
            VaultError::DeliveryFailed(format!(
                "cannot read attachment {}: {}",
                message.attachment.display(),
                e
            ))
        })?;
        let email = self.build_message(message, attachment)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| VaultError::DeliveryFailed(format!("mail task aborted: {}", e)))?
            .map_err(|e| VaultError::DeliveryFailed(e.to_string()))?;

        info!("Sent backup email to {}", message.to);
        Ok(())
    }
}
