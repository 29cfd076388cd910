//! Mailer errors

use thiserror::Error;

/// Delivery failures, classified so a batch log can tell them apart.
///
/// The [`Display`](std::fmt::Display) output is used verbatim as the failure
/// reason recorded for the recipient.
#[derive(Debug, Error)]
pub enum MailerError {
    /// The sender or recipient address was rejected before sending
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The message could not be assembled
    #[error("could not build message: {0}")]
    Build(String),

    /// The server refused the configured credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server permanently rejected the message
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The server reported a temporary failure
    #[error("temporary failure: {0}")]
    Transient(String),

    /// The connection could not be established or was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// Unknown error
    #[error(transparent)]
    UnknownError(anyhow::Error),
}

impl MailerError {
    /// Whether this failure is caused by the transport credentials, in which
    /// case every other recipient of the batch will fail the same way.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

impl From<anyhow::Error> for MailerError {
    fn from(err: anyhow::Error) -> Self {
        MailerError::UnknownError(err)
    }
}
