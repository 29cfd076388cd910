//! SMTP email service implementation

use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{ArgAction, Parser};
use lettre::{
    address::AddressError,
    message::{header::ContentType, Attachment as AttachmentPart, Mailbox, MultiPart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
        Error as SmtpError,
    },
    Address, AsyncSmtpTransport, AsyncTransport, Message as Email, Tokio1Executor,
};
use tracing::debug;

use crate::domain::communication::mailer::{Attachment, Mailer, MailerError, Message};

/// SMTP reply codes meaning the credentials were refused
const AUTHENTICATION_CODES: [u16; 3] = [530, 534, 535];

/// SMTP configuration
#[derive(Clone, Parser)]
pub struct SMTPConfig {
    /// The SMTP host
    #[clap(long = "smtp-host", env = "SMTP_HOST", default_value = "smtp.mailersend.net")]
    pub host: String,

    /// The SMTP port
    #[clap(long = "smtp-port", env = "SMTP_PORT", default_value = "587")]
    pub port: u16,

    /// The SMTP username, defaults to the sender address
    #[clap(long = "smtp-user", env = "SMTP_USER")]
    pub username: Option<String>,

    /// The SMTP password
    #[clap(long = "smtp-password", env = "SMTP_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// The sender email address
    #[clap(long = "smtp-sender", env = "SMTP_SENDER")]
    pub sender: String,

    /// Verify the TLS certificate
    #[clap(
        long = "smtp-verify-tls",
        env = "SMTP_VERIFY_TLS",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub verify_tls: bool,

    /// Upgrade the connection with STARTTLS instead of connecting over TLS
    #[clap(
        long = "smtp-starttls",
        env = "SMTP_STARTTLS",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub starttls: bool,
}

impl SMTPConfig {
    fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.sender)
    }
}

impl fmt::Debug for SMTPConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SMTPConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username())
            .field("password", &"********")
            .field("sender", &self.sender)
            .field("verify_tls", &self.verify_tls)
            .field("starttls", &self.starttls)
            .finish()
    }
}

/// SMTP mailer
#[derive(Clone)]
pub struct SMTPMailer {
    sender: Address,
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SMTPMailer {
    /// Create a new SMTP mailer. No connection is made until the first send.
    pub fn new(config: &SMTPConfig) -> Result<Self> {
        let sender = config
            .sender
            .parse::<Address>()
            .with_context(|| format!("invalid sender address \"{}\"", config.sender))?;

        let creds = Credentials::new(config.username().to_string(), config.password.clone());

        let tls_parameters = TlsParameters::builder(config.host.to_string())
            .dangerous_accept_invalid_certs(!config.verify_tls)
            .build()?;

        let (relay, tls) = if config.starttls {
            (
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?,
                Tls::Required(tls_parameters),
            )
        } else {
            (
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?,
                Tls::Wrapper(tls_parameters),
            )
        };

        debug!("SMTP relay {}:{} ({:?})", config.host, config.port, config);

        let transport = relay.credentials(creds).port(config.port).tls(tls).build();

        Ok(Self {
            sender,
            transport: Arc::new(transport),
        })
    }
}

impl fmt::Debug for SMTPMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SMTPMailer")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Mailer for SMTPMailer {
    async fn send_email(
        &self,
        message: &Message,
        attachments: &[Attachment],
    ) -> Result<(), MailerError> {
        let email = build_email(&self.sender, message, attachments)?;

        match self.transport.send(email).await {
            Ok(_) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Assembles a `multipart/alternative` message, wrapped in `multipart/mixed`
/// when there are attachments.
fn build_email(
    sender: &Address,
    message: &Message,
    attachments: &[Attachment],
) -> Result<Email, MailerError> {
    let from = Mailbox::new(message.sender_name.clone(), sender.clone());
    let to = Mailbox::new(None, message.to.as_str().parse::<Address>()?);

    let alternative = MultiPart::alternative_plain_html(
        message.plain_body.clone(),
        message.html_body.clone(),
    );

    let body = if attachments.is_empty() {
        alternative
    } else {
        let mut mixed = MultiPart::mixed().multipart(alternative);

        for attachment in attachments {
            let content_type = ContentType::parse(attachment.content_type())
                .map_err(|e| MailerError::Build(e.to_string()))?;

            mixed = mixed.singlepart(
                AttachmentPart::new(attachment.filename().to_string())
                    .body(attachment.content().to_vec(), content_type),
            );
        }

        mixed
    };

    Ok(Email::builder()
        .from(from)
        .to(to)
        .subject(message.subject.clone())
        .multipart(body)?)
}

impl From<AddressError> for MailerError {
    fn from(err: AddressError) -> Self {
        debug!("AddressError -> MailerError");

        MailerError::InvalidAddress(err.to_string())
    }
}

impl From<lettre::error::Error> for MailerError {
    fn from(err: lettre::error::Error) -> Self {
        debug!("lettre::error::Error -> MailerError");

        MailerError::Build(err.to_string())
    }
}

impl From<SmtpError> for MailerError {
    fn from(err: SmtpError) -> Self {
        debug!("SmtpError -> MailerError: {:?}", err);

        let reason = err.to_string();

        match err.status().map(u16::from) {
            Some(code) if AUTHENTICATION_CODES.contains(&code) => {
                MailerError::Authentication(reason)
            }
            _ if err.is_permanent() => MailerError::Rejected(reason),
            _ if err.is_transient() => MailerError::Transient(reason),
            _ => MailerError::Connection(reason),
        }
    }
}
