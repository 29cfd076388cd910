//! Templates and mail merge requests

use tracing::debug;

use crate::domain::communication::mailer::Attachment;

use super::SourceFormat;

/// The text every recipient's message is merged from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    content: String,
    format: SourceFormat,
}

impl Template {
    /// Creates a template, detecting the format from the content when no hint
    /// is given
    pub fn new(content: impl Into<String>, format: Option<SourceFormat>) -> Self {
        let content = content.into();
        let format = format.unwrap_or_else(|| SourceFormat::detect(&content));

        debug!("template format: {}", format);

        Self { content, format }
    }

    /// The raw template text
    pub fn content(&self) -> &str {
        &self.content
    }

    /// The template's format
    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Whether the template has no visible content
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Everything shared by the messages of one batch
#[derive(Clone, Debug)]
pub struct MailMerge {
    /// The body template
    pub template: Template,

    /// A subject template overriding extraction from the body
    pub subject: Option<String>,

    /// Sender display name overriding the configured default
    pub display_name: Option<String>,

    /// Files attached to every message
    pub attachments: Vec<Attachment>,
}

impl MailMerge {
    /// Creates a request with no subject override, display name or attachments
    pub fn new(template: Template) -> Self {
        Self {
            template,
            subject: None,
            display_name: None,
            attachments: Vec::new(),
        }
    }

    /// Sets the subject template; blank subjects are ignored
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        self.subject = (!subject.trim().is_empty()).then_some(subject);
        self
    }

    /// Sets the sender display name; blank names are ignored
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into().trim().to_string();
        self.display_name = (!display_name.is_empty()).then_some(display_name);
        self
    }

    /// Adds an attachment; attachments without a filename are ignored
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        if attachment.filename().trim().is_empty() {
            debug!("ignoring attachment without a filename");
        } else {
            self.attachments.push(attachment);
        }

        self
    }
}
