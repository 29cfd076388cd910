//! Mail merge service

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::mock;

use crate::domain::communication::{
    email_addresses::EmailAddress,
    mailer::{Mailer, Message},
};

use super::{
    errors::MailMergeError, extract_or, merge, normalize, BatchSummary, DispatchOutcome,
    MailMerge, RecipientOutcome, RecipientRow, RecipientTable, SkipReason,
};

/// Display name used when neither the request nor the configuration sets one
pub const DEFAULT_DISPLAY_NAME: &str = "Mail Merge";

/// Number of messages prepared and sent at the same time by default
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Process-wide dispatch settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Sender display name used when a request does not set one
    pub default_display_name: String,

    /// Maximum number of recipients in flight at once
    pub concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_display_name: DEFAULT_DISPLAY_NAME.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Mail merge service
#[async_trait]
pub trait MailMergeService: Clone + Send + Sync + 'static {
    /// Sends the merged template to every row of a delimited recipient table.
    ///
    /// # Arguments
    /// * `request` - The template, overrides and attachments shared by the batch.
    /// * `recipients` - The raw bytes of the recipient table.
    ///
    /// # Returns
    /// A [`Result`] which is [`Ok`] containing the [`BatchSummary`] once every
    /// row was handled, or an [`Err`] containing a [`MailMergeError`] if the
    /// request was rejected before anything was sent.
    async fn send_bulk(
        &self,
        request: &MailMerge,
        recipients: &[u8],
    ) -> Result<BatchSummary, MailMergeError>;

    /// Sends the merged template to a single address.
    ///
    /// The address is the only field available to placeholders, as `$email`.
    async fn send_single(
        &self,
        request: &MailMerge,
        address: &str,
    ) -> Result<BatchSummary, MailMergeError>;
}

#[cfg(test)]
mock! {
    pub MailMergeService {}

    impl Clone for MailMergeService {
        fn clone(&self) -> Self;
    }

    #[async_trait]
    impl MailMergeService for MailMergeService {
        async fn send_bulk(
            &self,
            request: &MailMerge,
            recipients: &[u8],
        ) -> Result<BatchSummary, MailMergeError>;
        async fn send_single(
            &self,
            request: &MailMerge,
            address: &str,
        ) -> Result<BatchSummary, MailMergeError>;
    }
}

/// Mail merge service implementation
#[derive(Debug, Clone)]
pub struct MailMergeServiceImpl<M>
where
    M: Mailer,
{
    mailer: Arc<M>,
    config: DispatchConfig,
}

/// Builds the message for one row of a batch
type Compose = fn(&Batch<'_>, &RecipientRow, EmailAddress) -> Message;

/// Values shared by every row of one batch
struct Batch<'a> {
    request: &'a MailMerge,
    address_column: &'a str,
    display_name: &'a str,
    default_subject: String,
    compose: Compose,
}

impl<M> MailMergeServiceImpl<M>
where
    M: Mailer,
{
    /// Creates a new mail merge service.
    pub fn new(mailer: Arc<M>, config: DispatchConfig) -> Self {
        Self { mailer, config }
    }

    /// Sends to every row of `table`, reading addresses from `address_column`.
    ///
    /// Rows are handled concurrently up to the configured limit, but the
    /// outcomes keep the table's order. A failing row never stops the batch.
    pub async fn dispatch(
        &self,
        request: &MailMerge,
        table: &RecipientTable,
        address_column: &str,
    ) -> BatchSummary {
        self.dispatch_with(request, table, address_column, compose_message)
            .await
    }

    async fn dispatch_with(
        &self,
        request: &MailMerge,
        table: &RecipientTable,
        address_column: &str,
        compose: Compose,
    ) -> BatchSummary {
        let display_name = request
            .display_name
            .as_deref()
            .unwrap_or(&self.config.default_display_name);

        let batch = Batch {
            request,
            address_column,
            display_name,
            default_subject: format!("{display_name} Information"),
            compose,
        };

        let batch = &batch;
        let rows = table.rows();

        let outcomes = stream::iter(0..rows.len())
            .map(move |i| self.dispatch_row(batch, i + 1, &rows[i]))
            .buffered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let summary = BatchSummary::summarize(outcomes);

        info!("{} ({})", summary.headline(), summary.status());

        summary
    }

    async fn dispatch_row(
        &self,
        batch: &Batch<'_>,
        row_number: usize,
        row: &RecipientRow,
    ) -> RecipientOutcome {
        let recipient = row.get(batch.address_column).unwrap_or_default().trim();

        RecipientOutcome {
            row: row_number,
            recipient: recipient.to_string(),
            outcome: self.deliver(batch, row_number, row, recipient).await,
        }
    }

    async fn deliver(
        &self,
        batch: &Batch<'_>,
        row_number: usize,
        row: &RecipientRow,
        recipient: &str,
    ) -> DispatchOutcome {
        if row.is_blank() {
            debug!("row {row_number} is empty, skipping");
            return DispatchOutcome::Skipped(SkipReason::EmptyRow);
        }

        let to = match EmailAddress::new(recipient) {
            Ok(to) => to,
            Err(e) => {
                debug!("row {row_number} has an unusable address {recipient:?}: {e}");
                return DispatchOutcome::Skipped(SkipReason::InvalidAddress);
            }
        };

        let message = match prepare_message(batch, row, to) {
            Ok(message) => message,
            Err(details) => {
                warn!("could not prepare the message for {recipient}: {details}");
                return DispatchOutcome::Failed(format!("content preparation error: {details}"));
            }
        };

        match self
            .mailer
            .send_email(&message, &batch.request.attachments)
            .await
        {
            Ok(()) => {
                debug!("sent \"{}\" to {}", message.subject, message.to);
                DispatchOutcome::Sent
            }
            Err(e) => {
                if e.is_authentication() {
                    error!(
                        "could not send to {recipient}, the mail server rejected the credentials: {e}"
                    );
                } else {
                    warn!("could not send to {recipient}: {e}");
                }

                DispatchOutcome::Failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl<M> MailMergeService for MailMergeServiceImpl<M>
where
    M: Mailer,
{
    async fn send_bulk(
        &self,
        request: &MailMerge,
        recipients: &[u8],
    ) -> Result<BatchSummary, MailMergeError> {
        if request.template.is_blank() {
            return Err(MailMergeError::EmptyTemplate);
        }

        let table = RecipientTable::load(recipients)?;
        let address_column = table.address_column()?;

        if table.is_empty() {
            info!("the recipient file has no rows, nothing to send");
        }

        info!(
            "sending to {} rows, addresses from column {:?}",
            table.len(),
            address_column
        );

        Ok(self.dispatch(request, &table, address_column).await)
    }

    async fn send_single(
        &self,
        request: &MailMerge,
        address: &str,
    ) -> Result<BatchSummary, MailMergeError> {
        if request.template.is_blank() {
            return Err(MailMergeError::EmptyTemplate);
        }

        if address.trim().is_empty() {
            return Err(MailMergeError::MissingAddress);
        }

        let table = RecipientTable::single(address);
        let address_column = table.address_column()?;

        Ok(self.dispatch(request, &table, address_column).await)
    }
}

/// Builds the message for one row. Panics raised on the way are reported as
/// an error for this row only.
fn prepare_message(
    batch: &Batch<'_>,
    row: &RecipientRow,
    to: EmailAddress,
) -> Result<Message, String> {
    panic::catch_unwind(AssertUnwindSafe(|| (batch.compose)(batch, row, to)))
        .map_err(panic_details)
}

/// Merges, extracts and converts the message for one row
fn compose_message(batch: &Batch<'_>, row: &RecipientRow, to: EmailAddress) -> Message {
    let template = &batch.request.template;
    let merged = merge(template.content(), row);

    let (subject, body) = match &batch.request.subject {
        Some(subject) => (single_line(&merge(subject, row)), merged),
        None => {
            let extracted = extract_or(&merged, &batch.default_subject);
            (extracted.subject, extracted.body)
        }
    };

    let subject = if subject.is_empty() {
        batch.default_subject.clone()
    } else {
        subject
    };

    let rendition = normalize(&body, template.format());

    Message {
        to,
        sender_name: Some(batch.display_name.to_string()),
        subject,
        html_body: rendition.html,
        plain_body: rendition.plain,
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn panic_details(err: Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use testresult::TestResult;

    use crate::domain::{
        communication::mailer::{tests::MockMailer, Attachment, MailerError},
        mailing::{
            errors::LoadRecipientsError, BatchStatus, SourceFormat, Template, DEFAULT_SUBJECT,
        },
    };

    use super::*;

    /// A mailer that records what it was asked to send, failing for one
    /// address and answering earlier rows more slowly than later ones.
    #[derive(Clone, Default)]
    struct RecordingMailer {
        sent: Arc<Mutex<Vec<Message>>>,
        fail_for: Option<String>,
        slow: bool,
    }

    impl RecordingMailer {
        fn messages(&self) -> Vec<Message> {
            self.sent.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_email(
            &self,
            message: &Message,
            _attachments: &[Attachment],
        ) -> Result<(), MailerError> {
            if self.slow {
                let position = message.to.as_str().as_bytes()[0];
                let delay = u64::from(b'z'.saturating_sub(position));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            self.sent.lock().expect("lock poisoned").push(message.clone());

            match &self.fail_for {
                Some(address) if address == message.to.as_str() => {
                    Err(MailerError::Connection("connection reset".to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    fn request(template: &str) -> MailMerge {
        MailMerge::new(Template::new(template, None))
    }

    fn service<M: Mailer>(mailer: M) -> MailMergeServiceImpl<M> {
        MailMergeServiceImpl::new(Arc::new(mailer), DispatchConfig::default())
    }

    fn statuses(summary: &BatchSummary) -> Vec<DispatchOutcome> {
        summary.outcomes.iter().map(|o| o.outcome.clone()).collect()
    }

    #[tokio::test]
    async fn test_send_bulk_success() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer
            .expect_send_email()
            .times(2)
            .withf(|message, attachments| {
                message.subject == format!("Hello {}", &message.to.as_str()[..3])
                    && message.plain_body.starts_with("Welcome")
                    && message.sender_name.as_deref() == Some(DEFAULT_DISPLAY_NAME)
                    && attachments.is_empty()
            })
            .returning(|_, _| Ok(()));

        let summary = service(mailer)
            .send_bulk(
                &request("Hello $Name\n\nWelcome aboard, ${name}!"),
                b"Email,Name\nann@example.com,ann\nben@example.com,ben\n",
            )
            .await?;

        assert_eq!((summary.sent, summary.failed, summary.skipped), (2, 0, 0));
        assert_eq!(summary.status(), BatchStatus::Success);
        assert_eq!(
            summary.log(),
            ["Email sent to ann@example.com", "Email sent to ben@example.com"]
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_rows_never_reach_the_mailer() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer.expect_send_email().times(0);

        let summary = service(mailer)
            .send_bulk(&request("Hi $name"), b"email,name\n,\n  ,  \n")
            .await?;

        assert_eq!(summary.skipped, 2);
        assert_eq!(
            statuses(&summary),
            [
                DispatchOutcome::Skipped(SkipReason::EmptyRow),
                DispatchOutcome::Skipped(SkipReason::EmptyRow),
            ]
        );
        assert_eq!(summary.status(), BatchStatus::Informational);

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_addresses_are_skipped() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer.expect_send_email().times(0);

        let summary = service(mailer)
            .send_bulk(&request("Hi $name"), b"email,name\nnot-an-email,Ann\n,Ben\n")
            .await?;

        assert_eq!(
            statuses(&summary),
            [
                DispatchOutcome::Skipped(SkipReason::InvalidAddress),
                DispatchOutcome::Skipped(SkipReason::InvalidAddress),
            ]
        );
        assert_eq!(summary.outcomes[0].recipient, "not-an-email");

        Ok(())
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_batch() -> TestResult {
        let mailer = RecordingMailer {
            fail_for: Some("b@example.com".to_string()),
            ..Default::default()
        };

        let summary = service(mailer.clone())
            .send_bulk(
                &request("Hi $name\n\nBody"),
                b"email,name\na@example.com,A\nb@example.com,B\n,\nc@example.com,C\nnope,D\n",
            )
            .await?;

        assert_eq!(
            statuses(&summary),
            [
                DispatchOutcome::Sent,
                DispatchOutcome::Failed("connection error: connection reset".to_string()),
                DispatchOutcome::Skipped(SkipReason::EmptyRow),
                DispatchOutcome::Sent,
                DispatchOutcome::Skipped(SkipReason::InvalidAddress),
            ]
        );
        assert_eq!((summary.sent, summary.failed, summary.skipped), (2, 1, 2));
        assert_eq!(summary.sent + summary.failed + summary.skipped, summary.total());
        assert_eq!(summary.status(), BatchStatus::Partial);
        assert_eq!(mailer.messages().len(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_authentication_failures_are_recorded_for_every_recipient() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer
            .expect_send_email()
            .times(3)
            .returning(|_, _| {
                Err(MailerError::Authentication(
                    "535 5.7.8 bad credentials".to_string(),
                ))
            });

        let summary = service(mailer)
            .send_bulk(
                &request("Hi"),
                b"email\na@example.com\nb@example.com\nc@example.com\n",
            )
            .await?;

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.status(), BatchStatus::Failure);
        assert!(summary
            .log()
            .iter()
            .all(|line| line.ends_with("authentication failed: 535 5.7.8 bad credentials")));

        Ok(())
    }

    #[tokio::test]
    async fn test_outcomes_keep_table_order_under_concurrency() -> TestResult {
        let mailer = RecordingMailer {
            slow: true,
            ..Default::default()
        };

        let service = MailMergeServiceImpl::new(
            Arc::new(mailer.clone()),
            DispatchConfig {
                concurrency: 8,
                ..Default::default()
            },
        );

        let summary = service
            .send_bulk(
                &request("Hi"),
                b"email\na@example.com\nm@example.com\nt@example.com\ny@example.com\n",
            )
            .await?;

        let recipients: Vec<_> = summary.outcomes.iter().map(|o| o.recipient.as_str()).collect();

        assert_eq!(
            recipients,
            ["a@example.com", "m@example.com", "t@example.com", "y@example.com"]
        );
        assert_eq!(
            summary.outcomes.iter().map(|o| o.row).collect::<Vec<_>>(),
            [1, 2, 3, 4]
        );
        assert_eq!(summary.sent, 4);
        assert_eq!(mailer.messages()[0].to.as_str(), "y@example.com");

        Ok(())
    }

    #[tokio::test]
    async fn test_subject_override_is_merged() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer
            .expect_send_email()
            .times(1)
            .withf(|message, _| {
                message.subject == "Offer for Bob"
                    && message.plain_body == "First line stays in the body\nBye"
            })
            .returning(|_, _| Ok(()));

        let request = MailMerge::new(Template::new(
            "First line stays in the body\nBye",
            Some(SourceFormat::Plain),
        ))
        .with_subject("Offer for\n$NAME");

        let summary = service(mailer)
            .send_bulk(&request, b"email,name\nbob@example.com,Bob\n")
            .await?;

        assert_eq!(summary.sent, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_title_becomes_subject() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer
            .expect_send_email()
            .times(1)
            .withf(|message, _| {
                message.subject == "Hi Bob"
                    && message.html_body == "<p>Body for Bob</p>"
                    && message.plain_body == "Body for Bob"
            })
            .returning(|_, _| Ok(()));

        let summary = service(mailer)
            .send_bulk(
                &request("<title>Hi $name</title>\n<p>Body for $name</p>"),
                b"email,name\nbob@example.com,Bob\n",
            )
            .await?;

        assert_eq!(summary.sent, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_markup_without_subject_uses_display_name() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer
            .expect_send_email()
            .times(1)
            .withf(|message, _| {
                message.subject == "Acme Information"
                    && message.sender_name.as_deref() == Some("Acme")
                    && message.html_body == "<p>Hi Bob</p>"
            })
            .returning(|_, _| Ok(()));

        let request = request("<p>Hi $name</p>").with_display_name("Acme");

        service(mailer)
            .send_bulk(&request, b"email,name\nbob@example.com,Bob\n")
            .await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_default_display_name_comes_from_config() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer
            .expect_send_email()
            .times(1)
            .withf(|message, _| {
                message.subject == "Newsletter Team Information"
                    && message.subject != DEFAULT_SUBJECT
            })
            .returning(|_, _| Ok(()));

        let service = MailMergeServiceImpl::new(
            Arc::new(mailer),
            DispatchConfig {
                default_display_name: "Newsletter Team".to_string(),
                ..Default::default()
            },
        );

        service
            .send_single(&request("<div>Hello</div>"), "bob@example.com")
            .await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_attachments_are_shared_by_every_recipient() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer
            .expect_send_email()
            .times(2)
            .withf(|_, attachments| {
                attachments.len() == 1
                    && attachments[0].filename() == "terms.pdf"
                    && attachments[0].content() == b"%PDF"
            })
            .returning(|_, _| Ok(()));

        let request = request("Hi").with_attachment(Attachment::new("terms.pdf", b"%PDF".to_vec()));

        let summary = service(mailer)
            .send_bulk(&request, b"email\na@example.com\nb@example.com\n")
            .await?;

        assert_eq!(summary.sent, 2);
        assert_eq!(request.attachments[0].content(), b"%PDF");

        Ok(())
    }

    #[tokio::test]
    async fn test_markdown_conversion_is_independent_per_recipient() -> TestResult {
        let table = b"email,content\na@example.com,\"* one\n* two\"\nb@example.com,Just **bold**\n";
        let reversed = b"email,content\nb@example.com,Just **bold**\na@example.com,\"* one\n* two\"\n";

        let forward = RecordingMailer::default();
        let backward = RecordingMailer::default();

        let request = request("Update\n\n$content");

        service(forward.clone()).send_bulk(&request, table).await?;
        service(backward.clone()).send_bulk(&request, reversed).await?;

        let by_address = |mailer: &RecordingMailer| {
            let mut messages = mailer.messages();
            messages.sort_by(|a, b| a.to.as_str().cmp(b.to.as_str()));
            messages
        };

        let forward = by_address(&forward);
        let backward = by_address(&backward);

        assert_eq!(forward, backward);
        assert!(forward[0].html_body.contains("<li>one</li>"));
        assert!(!forward[1].html_body.contains("<li>"));
        assert!(forward[1].html_body.contains("<strong>bold</strong>"));

        Ok(())
    }

    #[tokio::test]
    async fn test_send_single() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer
            .expect_send_email()
            .times(1)
            .withf(|message, _| {
                message.to.as_str() == "bob@example.com"
                    && message.subject == "Hello"
                    && message.plain_body == "Sent to bob@example.com, $name stays"
            })
            .returning(|_, _| Ok(()));

        let summary = service(mailer)
            .send_single(
                &request("Hello\nSent to $email, $name stays"),
                " bob@example.com ",
            )
            .await?;

        assert_eq!(summary.log(), ["Email sent to bob@example.com"]);

        Ok(())
    }

    #[tokio::test]
    async fn test_send_single_invalid_address() -> TestResult {
        let mut mailer = MockMailer::new();

        mailer.expect_send_email().times(0);

        let summary = service(mailer)
            .send_single(&request("Hello"), "not-an-email")
            .await?;

        assert_eq!(
            statuses(&summary),
            [DispatchOutcome::Skipped(SkipReason::InvalidAddress)]
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_send_single_without_address_is_rejected() {
        let mut mailer = MockMailer::new();

        mailer.expect_send_email().times(0);

        let result = service(mailer).send_single(&request("Hello"), "  ").await;

        assert!(matches!(result, Err(MailMergeError::MissingAddress)));
    }

    #[tokio::test]
    async fn test_preparation_failure_is_isolated() -> TestResult {
        fn compose(batch: &Batch<'_>, row: &RecipientRow, to: EmailAddress) -> Message {
            if row.get("name") == Some("Broken") {
                panic!("template exploded");
            }

            compose_message(batch, row, to)
        }

        let mut mailer = MockMailer::new();

        mailer
            .expect_send_email()
            .withf(|message, _| message.to.as_str() == "broken@example.com")
            .times(0);
        mailer
            .expect_send_email()
            .withf(|message, _| message.to.as_str() != "broken@example.com")
            .times(2)
            .returning(|_, _| Ok(()));

        let table = RecipientTable::load(
            b"name,email\nAnn,ann@example.com\nBroken,broken@example.com\nCid,cid@example.com\n",
        )?;

        let summary = service(mailer)
            .dispatch_with(&request("Hi $name"), &table, "email", compose)
            .await;

        assert_eq!(
            statuses(&summary),
            [
                DispatchOutcome::Sent,
                DispatchOutcome::Failed("content preparation error: template exploded".to_string()),
                DispatchOutcome::Sent,
            ]
        );
        assert_eq!((summary.sent, summary.failed, summary.skipped), (2, 1, 0));

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_template_is_rejected() {
        let mut mailer = MockMailer::new();

        mailer.expect_send_email().times(0);

        let result = service(mailer)
            .send_bulk(&request("  \n"), b"email\na@example.com\n")
            .await;

        assert!(matches!(result, Err(MailMergeError::EmptyTemplate)));
    }

    #[tokio::test]
    async fn test_missing_address_column_is_rejected() {
        let mut mailer = MockMailer::new();

        mailer.expect_send_email().times(0);

        let result = service(mailer)
            .send_bulk(&request("Hi"), b"name,phone\nAnn,123\n")
            .await;

        assert!(matches!(
            result,
            Err(MailMergeError::Recipients(LoadRecipientsError::NoAddressColumn { .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_table_is_informational() -> TestResult {
        let summary = service(MockMailer::new())
            .send_bulk(&request("Hi"), b"email,name\n")
            .await?;

        assert_eq!(summary.total(), 0);
        assert_eq!(summary.status(), BatchStatus::Informational);

        Ok(())
    }

    #[test]
    fn test_panic_details() {
        let err = panic::catch_unwind(|| panic!("Something went wrong"))
            .expect_err("closure should panic");

        assert_eq!(panic_details(err), "Something went wrong");
    }
}
