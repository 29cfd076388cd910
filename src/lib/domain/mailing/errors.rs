//! Errors that fail a whole batch before any recipient is contacted

use thiserror::Error;
use tracing::debug;

/// Errors that can occur when loading a recipient table
#[derive(Debug, Error)]
pub enum LoadRecipientsError {
    /// The bytes are neither UTF-8 nor Windows-1252
    #[error("the recipient file is not valid UTF-8 or Windows-1252 text")]
    Encoding,

    /// The table has no header row
    #[error("the recipient file has no header row")]
    NoHeader,

    /// No column looks like it holds email addresses
    #[error("the recipient file must contain an email column (found: {})", .columns.join(", "))]
    NoAddressColumn {
        /// The columns that were found
        columns: Vec<String>,
    },

    /// The table could not be parsed
    #[error("could not parse the recipient file at line {line}: {message}")]
    Parse {
        /// The 1-based line number, 0 when unknown
        line: u64,

        /// The parser's description of the problem
        message: String,
    },
}

impl From<csv::Error> for LoadRecipientsError {
    fn from(err: csv::Error) -> Self {
        debug!("csv::Error -> LoadRecipientsError: {:?}", err);

        if let csv::ErrorKind::Utf8 { .. } = err.kind() {
            return LoadRecipientsError::Encoding;
        }

        LoadRecipientsError::Parse {
            line: err.position().map(|p| p.line()).unwrap_or_default(),
            message: err.to_string(),
        }
    }
}

/// Errors that reject a mail merge request
#[derive(Debug, Error)]
pub enum MailMergeError {
    /// The template has no content
    #[error("the email template is empty")]
    EmptyTemplate,

    /// A single send was requested without an address
    #[error("please provide an email address")]
    MissingAddress,

    /// The recipient table could not be used
    #[error(transparent)]
    Recipients(#[from] LoadRecipientsError),
}
