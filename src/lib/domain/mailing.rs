//! Mail merge: personalizes one template for every recipient of a batch

mod content;
mod extract;
mod merge;
mod recipients;
mod service;
mod summary;
mod template;

pub mod errors;

pub use content::{normalize, Rendition, SourceFormat};
pub use extract::{extract, extract_or, ExtractedMessage, DEFAULT_SUBJECT};
pub use merge::merge;
pub use recipients::{RecipientRow, RecipientTable, ADDRESS_COLUMNS};
pub use service::{
    DispatchConfig, MailMergeService, MailMergeServiceImpl, DEFAULT_CONCURRENCY,
    DEFAULT_DISPLAY_NAME,
};
pub use summary::{BatchStatus, BatchSummary, DispatchOutcome, RecipientOutcome, SkipReason};
pub use template::{MailMerge, Template};
