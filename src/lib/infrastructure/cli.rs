//! Command-line interface

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{
    communication::mailer::Attachment,
    mailing::{
        BatchStatus, BatchSummary, DispatchConfig, MailMerge, MailMergeService, SourceFormat,
        Template, DEFAULT_CONCURRENCY, DEFAULT_DISPLAY_NAME,
    },
};

/// Dispatch settings shared by every batch
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
pub struct DispatchArgs {
    /// Sender display name used when a batch does not set one
    #[arg(long, env = "MAIL_DISPLAY_NAME", default_value = DEFAULT_DISPLAY_NAME)]
    pub default_display_name: String,

    /// Maximum number of messages prepared and sent at the same time
    #[arg(
        long,
        env = "MAIL_CONCURRENCY",
        default_value_t = DEFAULT_CONCURRENCY,
        value_parser = parse_concurrency
    )]
    pub concurrency: usize,
}

impl From<DispatchArgs> for DispatchConfig {
    fn from(args: DispatchArgs) -> Self {
        Self {
            default_display_name: args.default_display_name,
            concurrency: args.concurrency,
        }
    }
}

fn parse_concurrency(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// One mail merge batch
#[derive(Debug, Clone, Parser)]
pub struct MergeArgs {
    /// The template file: HTML (.html), Markdown (.md) or plain text (.txt)
    #[arg(short, long)]
    pub template: PathBuf,

    /// The template format, overriding the file extension
    #[arg(long)]
    pub format: Option<SourceFormat>,

    /// A CSV file with one recipient per row
    #[arg(short, long, conflicts_with = "to", required_unless_present = "to")]
    pub csv: Option<PathBuf>,

    /// A single recipient address
    #[arg(long)]
    pub to: Option<String>,

    /// The subject, overriding the one found in the template
    #[arg(short, long)]
    pub subject: Option<String>,

    /// The sender display name for this batch
    #[arg(long)]
    pub display_name: Option<String>,

    /// A file attached to every message
    #[arg(short, long = "attach")]
    pub attachments: Vec<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Who a batch is sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// The raw bytes of a recipient table
    Table(Vec<u8>),

    /// One address
    Single(String),
}

/// A batch read from disk, ready to dispatch
#[derive(Debug, Clone)]
pub struct Job {
    /// The template, overrides and attachments
    pub request: MailMerge,

    /// Who to send to
    pub recipients: Recipients,
}

impl MergeArgs {
    /// Reads the template, attachments and recipient table from disk.
    pub async fn load(&self) -> Result<Job> {
        let content = tokio::fs::read_to_string(&self.template)
            .await
            .with_context(|| format!("failed to read template {}", self.template.display()))?;

        let format = self
            .format
            .or_else(|| SourceFormat::from_path(&self.template));

        let mut request = MailMerge::new(Template::new(content, format));

        if let Some(subject) = &self.subject {
            request = request.with_subject(subject.as_str());
        }

        if let Some(display_name) = &self.display_name {
            request = request.with_display_name(display_name.as_str());
        }

        for path in &self.attachments {
            request = request.with_attachment(read_attachment(path).await?);
        }

        let recipients = match (&self.csv, &self.to) {
            (Some(path), _) => Recipients::Table(
                tokio::fs::read(path)
                    .await
                    .with_context(|| format!("failed to read recipients {}", path.display()))?,
            ),
            (None, Some(address)) => Recipients::Single(address.clone()),
            (None, None) => bail!("either --csv or --to is required"),
        };

        Ok(Job {
            request,
            recipients,
        })
    }
}

async fn read_attachment(path: &Path) -> Result<Attachment> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read attachment {}", path.display()))?;

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    debug!("attaching {} ({} bytes)", filename, content.len());

    Ok(Attachment::new(filename, content))
}

/// Sends a loaded batch through `service`.
pub async fn run<S: MailMergeService>(service: &S, job: &Job) -> Result<BatchSummary> {
    let summary = match &job.recipients {
        Recipients::Table(table) => service.send_bulk(&job.request, table).await?,
        Recipients::Single(address) => service.send_single(&job.request, address).await?,
    };

    info!("{} ({})", summary.headline(), summary.status());

    Ok(summary)
}

/// The summary as printed with `--json`
#[derive(Debug, Serialize)]
struct Report<'a> {
    status: BatchStatus,
    message: String,
    #[serde(flatten)]
    summary: &'a BatchSummary,
    log: Vec<String>,
}

/// Renders a batch summary for the terminal, as text or JSON.
pub fn render(summary: &BatchSummary, json: bool) -> Result<String> {
    if json {
        let report = Report {
            status: summary.status(),
            message: summary.headline(),
            summary,
            log: summary.log(),
        };

        return Ok(serde_json::to_string_pretty(&report)?);
    }

    let mut lines = summary.log();
    lines.push(summary.headline());

    Ok(lines.join("\n"))
}
