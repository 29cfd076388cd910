//! Per-recipient outcomes and the batch summary built from them

use std::fmt;

use serde::Serialize;

/// Why a row was not sent to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Every field of the row is empty
    EmptyRow,

    /// The address is missing or malformed
    InvalidAddress,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRow => write!(f, "empty row"),
            Self::InvalidAddress => write!(f, "invalid address"),
        }
    }
}

/// What happened to one recipient
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The mailer accepted the message
    Sent,

    /// Preparing or sending the message failed
    Failed(String),

    /// The row was never sent to
    Skipped(SkipReason),
}

/// The outcome for one row of the recipient table
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecipientOutcome {
    /// 1-based row number, not counting the header
    pub row: usize,

    /// The address as it appeared in the table
    pub recipient: String,

    /// What happened
    pub outcome: DispatchOutcome,
}

impl fmt::Display for RecipientOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            DispatchOutcome::Sent => write!(f, "Email sent to {}", self.recipient),
            DispatchOutcome::Failed(reason) => {
                write!(f, "Failed to send email to {}: {}", self.recipient, reason)
            }
            DispatchOutcome::Skipped(SkipReason::EmptyRow) => {
                write!(f, "Row {}: empty row, skipping.", self.row)
            }
            DispatchOutcome::Skipped(SkipReason::InvalidAddress)
                if self.recipient.trim().is_empty() =>
            {
                write!(f, "Row {}: missing email address, skipping.", self.row)
            }
            DispatchOutcome::Skipped(SkipReason::InvalidAddress) => write!(
                f,
                "Row {}: invalid address \"{}\", skipping.",
                self.row, self.recipient
            ),
        }
    }
}

/// Overall result of a batch, for display
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every recipient was sent to
    Success,

    /// Some recipients were sent to, others failed or were skipped
    Partial,

    /// Nothing was sent and at least one send failed
    Failure,

    /// Nothing was attempted: the batch was empty or every row was skipped
    Informational,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failure => write!(f, "failure"),
            Self::Informational => write!(f, "informational"),
        }
    }
}

/// Counts and the ordered outcome log of one batch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Messages accepted by the mailer
    pub sent: usize,

    /// Messages that could not be prepared or sent
    pub failed: usize,

    /// Rows that were skipped
    pub skipped: usize,

    /// One outcome per row, in table order
    pub outcomes: Vec<RecipientOutcome>,
}

impl BatchSummary {
    /// Tallies `outcomes`, keeping their order
    pub fn summarize(outcomes: Vec<RecipientOutcome>) -> Self {
        let mut summary = Self::default();

        for outcome in &outcomes {
            match outcome.outcome {
                DispatchOutcome::Sent => summary.sent += 1,
                DispatchOutcome::Failed(_) => summary.failed += 1,
                DispatchOutcome::Skipped(_) => summary.skipped += 1,
            }
        }

        summary.outcomes = outcomes;
        summary
    }

    /// Number of rows considered
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// The overall status
    pub fn status(&self) -> BatchStatus {
        match (self.sent, self.failed, self.skipped) {
            (0, 0, _) => BatchStatus::Informational,
            (0, _, _) => BatchStatus::Failure,
            (_, 0, 0) => BatchStatus::Success,
            _ => BatchStatus::Partial,
        }
    }

    /// A one-line summary of the counts
    pub fn headline(&self) -> String {
        format!(
            "Emails sent: {}. Failed: {}. Skipped: {}",
            self.sent, self.failed, self.skipped
        )
    }

    /// One line per outcome, in table order
    pub fn log(&self) -> Vec<String> {
        self.outcomes.iter().map(ToString::to_string).collect()
    }
}
