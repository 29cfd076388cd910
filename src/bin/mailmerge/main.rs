#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    missing_docs,
    rustdoc::broken_intra_doc_links,
    rustdoc::missing_crate_level_docs
)]

//! Sends a personalized email to every recipient of a CSV file

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use mail_merge::{
    domain::mailing::{BatchStatus, MailMergeServiceImpl},
    infrastructure::{
        cli::{self, DispatchArgs, MergeArgs},
        email::smtp::{SMTPConfig, SMTPMailer},
    },
};
use tracing_subscriber::EnvFilter;

/// Command-line arguments / environment variables
#[derive(Debug, Parser)]
#[command(version, about = "Sends a personalized email to every recipient of a CSV file")]
pub struct Args {
    /// The batch to send
    #[clap(flatten)]
    pub merge: MergeArgs,

    /// Dispatch settings
    #[clap(flatten)]
    pub dispatch: DispatchArgs,

    /// The SMTP relay
    #[clap(flatten)]
    pub smtp: SMTPConfig,
}

#[mutants::skip]
#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load environment: {}", e);

            return Err(e.into());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let job = args.merge.load().await?;

    let mailer = Arc::new(SMTPMailer::new(&args.smtp)?);
    let service = MailMergeServiceImpl::new(mailer, args.dispatch.into());

    let summary = cli::run(&service, &job).await?;

    println!("{}", cli::render(&summary, args.merge.json)?);

    if summary.status() == BatchStatus::Failure {
        bail!("no email could be sent");
    }

    Ok(())
}
