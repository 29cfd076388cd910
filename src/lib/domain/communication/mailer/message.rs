//! Email message

use std::{fmt, sync::Arc};

use crate::domain::communication::email_addresses::EmailAddress;

/// A personalized email for one recipient
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// The recipient of the email
    pub to: EmailAddress,

    /// The display name shown next to the sender address
    pub sender_name: Option<String>,

    /// The subject of the email
    pub subject: String,

    /// The HTML body of the email
    pub html_body: String,

    /// The plain text body of the email
    pub plain_body: String,
}

/// A file attached to every message of a batch.
///
/// The content is reference counted so all recipients read the same bytes from
/// the start; nothing in the pipeline mutates it.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    filename: String,
    content_type: String,
    content: Arc<[u8]>,
}

impl Attachment {
    /// Creates an attachment, guessing its MIME type from the filename
    pub fn new(filename: impl Into<String>, content: impl Into<Arc<[u8]>>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Self {
            filename,
            content_type,
            content: content.into(),
        }
    }

    /// The filename presented to the recipient
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The MIME type, e.g. `application/pdf`
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The attachment bytes
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.content.len())
            .finish()
    }
}
