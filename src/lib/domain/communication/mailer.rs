//! Mailer port: the narrow interface the dispatcher delivers through

use async_trait::async_trait;

#[cfg(test)]
use mockall::mock;

mod errors;
mod message;

pub use errors::MailerError;
pub use message::{Attachment, Message};

/// Something that can deliver a prepared [`Message`]
#[async_trait]
pub trait Mailer: Clone + Send + Sync + 'static {
    /// Send an email
    ///
    /// # Arguments
    /// * `message` - The personalized [`Message`] for a single recipient.
    /// * `attachments` - Files attached to every message of the batch. They are
    ///   shared between recipients and must not be modified.
    ///
    /// # Returns
    /// A [`Result`] which is [`Ok`] once the message was accepted for delivery,
    /// or an [`Err`] containing a classified [`MailerError`].
    async fn send_email(
        &self,
        message: &Message,
        attachments: &[Attachment],
    ) -> Result<(), MailerError>;
}

#[cfg(test)]
mock! {
    pub Mailer {}

    impl Clone for Mailer {
        fn clone(&self) -> Self;
    }

    #[async_trait]
    impl Mailer for Mailer {
        async fn send_email(
            &self,
            message: &Message,
            attachments: &[Attachment],
        ) -> Result<(), MailerError>;
    }
}
