//! One application campaign: templates and CV loaded from disk, one message
//! per recipient, sent in the chosen mode.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::dispatch::{Dispatcher, ProgressObserver, SendMode, SendReport};
use crate::extract::ValidatedAddress;
use crate::message::{Attachment, MessageBuilder, OutboundMessage, DEFAULT_COVER_LETTER, DEFAULT_SUBJECT};
use crate::transport::{ConnectionError, Connector, SmtpConnector, StubConnector};

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown send mode: {0}")]
    UnknownMode(String),

    #[error("no recipients to send to")]
    NoRecipients,

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// What a finished campaign run produced.
#[derive(Debug)]
pub struct CampaignOutcome {
    pub mode: SendMode,
    pub report: SendReport,
    pub elapsed: Duration,
}

/// Everything needed to send the same application to many recipients.
pub struct Campaign {
    config: Arc<Config>,
    builder: MessageBuilder,
    cover_letter: String,
    attachment: Option<Attachment>,
}

impl Campaign {
    /// Load the cover letter and default CV named by `config`.
    ///
    /// Dry runs only need a sender address; real sends need full credentials.
    pub async fn load(config: Arc<Config>) -> Result<Self, CampaignError> {
        if config.dry_run {
            if config.sender_email.is_empty() {
                return Err(ConfigError::MissingSenderEmail.into());
            }
        } else {
            config.validate()?;
        }

        let sender = config.sender_identity().map_err(ConfigError::from)?;
        let builder = MessageBuilder::new(sender, config.template_values());
        let cover_letter = load_cover_letter(&config.cover_letter_path).await;
        let attachment = load_attachment(&config.cv_path).await;

        Ok(Self {
            config,
            builder,
            cover_letter,
            attachment,
        })
    }

    /// Replace the default CV, e.g. with an uploaded file.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn subject(&self) -> String {
        self.builder.render(DEFAULT_SUBJECT)
    }

    /// Cover letter with placeholders filled in.
    pub fn cover_letter(&self) -> String {
        self.builder.render(&self.cover_letter)
    }

    pub fn messages(&self, recipients: &[ValidatedAddress]) -> Vec<OutboundMessage> {
        self.builder.build_all(
            recipients,
            DEFAULT_SUBJECT,
            &self.cover_letter,
            self.attachment.as_ref(),
        )
    }

    /// Resolve a mode name, falling back to the configured default when empty.
    pub fn mode(&self, name: &str) -> Result<SendMode, CampaignError> {
        let name = if name.trim().is_empty() {
            self.config.default_mode.as_str()
        } else {
            name
        };

        self.config
            .send_mode(name)
            .ok_or_else(|| CampaignError::UnknownMode(name.to_string()))
    }

    /// Send to every recipient and wait for the report.
    pub async fn run(
        &self,
        recipients: &[ValidatedAddress],
        mode: SendMode,
        observer: Option<Arc<dyn ProgressObserver>>,
        cancel: CancellationToken,
    ) -> Result<CampaignOutcome, CampaignError> {
        if recipients.is_empty() {
            return Err(CampaignError::NoRecipients);
        }

        info!(
            recipients = recipients.len(),
            mode = mode.name(),
            has_attachment = self.attachment.is_some(),
            dry_run = self.config.dry_run,
            "campaign_starting"
        );

        let messages = self.messages(recipients);
        let started = Instant::now();

        let report = if self.config.dry_run {
            self.execute(StubConnector::new(), messages, mode, observer, cancel)
                .await?
        } else {
            let connector = SmtpConnector::new(self.config.transport());
            self.execute(connector, messages, mode, observer, cancel)
                .await?
        };

        let elapsed = started.elapsed();
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "campaign_complete"
        );

        Ok(CampaignOutcome {
            mode,
            report,
            elapsed,
        })
    }

    async fn execute<C: Connector>(
        &self,
        connector: C,
        messages: Vec<OutboundMessage>,
        mode: SendMode,
        observer: Option<Arc<dyn ProgressObserver>>,
        cancel: CancellationToken,
    ) -> Result<SendReport, ConnectionError> {
        let mut dispatcher =
            Dispatcher::new(connector, self.config.dispatch_policy()).with_cancellation(cancel);
        if let Some(observer) = observer {
            dispatcher = dispatcher.with_shared_progress(observer);
        }

        dispatcher.dispatch(messages, mode).await
    }
}

/// Read the cover letter template, or the built-in one if unavailable.
pub async fn load_cover_letter(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!(path = %path.display(), "cover_letter_empty");
            DEFAULT_COVER_LETTER.to_string()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cover_letter_unavailable");
            DEFAULT_COVER_LETTER.to_string()
        }
    }
}

/// Read the CV to attach; a missing file just means no attachment.
pub async fn load_attachment(path: &Path) -> Option<Attachment> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "cv.pdf".to_string());
            info!(path = %path.display(), bytes = bytes.len(), "attachment_loaded");
            Some(Attachment::new(filename, bytes))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "attachment_unavailable");
            None
        }
    }
}

/// Whether the configured default CV exists.
pub fn has_default_cv(config: &Config) -> bool {
    config.cv_path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{FailureReason, SendResult};
    use crate::transport::Encryption;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(name: &str) -> Config {
        let dir = std::env::temp_dir().join(format!("bulkmail-campaign-{}-{}", name, std::process::id()));
        Config {
            smtp_host: "127.0.0.1".to_string(),
            smtp_port: 2525,
            smtp_encryption: Encryption::None,
            sender_email: "jane@example.com".to_string(),
            sender_password: String::new(),
            sender_name: "Jane Doe".to_string(),
            job_title: "Platform Engineer".to_string(),
            company_preference: "your company".to_string(),
            safe_delay_secs: (0, 0),
            parallel_workers: 3,
            send_timeout_ms: 5_000,
            connect_timeout_ms: 1_000,
            max_consecutive_timeouts: 3,
            reconnect_attempts: 1,
            cv_path: dir.join("cv.pdf"),
            cover_letter_path: dir.join("cover_letter.txt"),
            default_mode: "fast".to_string(),
            dry_run: true,
            port: 0,
        }
    }

    fn recipients(addresses: &[&str]) -> Vec<ValidatedAddress> {
        addresses
            .iter()
            .map(|a| ValidatedAddress::parse(a).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_missing_files_fall_back() {
        let campaign = Campaign::load(Arc::new(config("missing"))).await.unwrap();

        assert!(campaign.attachment().is_none());
        assert_eq!(campaign.subject(), "Application for Platform Engineer Position");
        assert!(campaign.cover_letter().contains("Platform Engineer position at your company"));
        assert!(campaign.cover_letter().ends_with("Jane Doe"));
    }

    #[tokio::test]
    async fn test_files_are_loaded() {
        let config = config("files");
        let dir: PathBuf = config.cv_path.parent().unwrap().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&config.cv_path, b"%PDF-1.4 fake").unwrap();
        std::fs::write(&config.cover_letter_path, "Hi, I'm {sender_name}.").unwrap();

        let campaign = Campaign::load(Arc::new(config)).await.unwrap();
        let attachment = campaign.attachment().unwrap();

        assert_eq!(attachment.filename, "cv.pdf");
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(campaign.cover_letter(), "Hi, I'm Jane Doe.");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_uploaded_attachment_replaces_default() {
        let campaign = Campaign::load(Arc::new(config("upload")))
            .await
            .unwrap()
            .with_attachment(Attachment::new("resume.docx", b"PK fake".to_vec()));

        let messages = campaign.messages(&recipients(&["a@example.com", "b@example.com"]));

        assert_eq!(messages.len(), 2);
        for message in &messages {
            let attachment = message.attachment.as_ref().unwrap();
            assert_eq!(attachment.filename, "resume.docx");
            assert_eq!(&attachment.bytes[..], b"PK fake");
        }
    }

    #[tokio::test]
    async fn test_real_sends_need_credentials() {
        let mut config = config("creds");
        config.dry_run = false;

        let result = Campaign::load(Arc::new(config)).await;
        assert!(matches!(
            result,
            Err(CampaignError::Config(ConfigError::MissingSenderPassword))
        ));
    }

    #[tokio::test]
    async fn test_mode_resolution() {
        let campaign = Campaign::load(Arc::new(config("modes"))).await.unwrap();

        assert_eq!(campaign.mode("").unwrap(), SendMode::Fast);
        assert_eq!(
            campaign.mode("instant").unwrap(),
            SendMode::Instant { max_concurrency: 3 }
        );
        assert!(matches!(campaign.mode("warp"), Err(CampaignError::UnknownMode(_))));
    }

    #[tokio::test]
    async fn test_dry_run_sends_every_recipient() {
        let campaign = Campaign::load(Arc::new(config("dry"))).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let observer: Arc<dyn ProgressObserver> =
            Arc::new(move |_: usize, _: usize, _: &SendResult| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let outcome = campaign
            .run(
                &recipients(&["a@example.com", "b@example.com", "c@example.com"]),
                SendMode::Instant { max_concurrency: 2 },
                Some(observer),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.report.succeeded, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let campaign = Campaign::load(Arc::new(config("cancel"))).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = campaign
            .run(
                &recipients(&["a@example.com", "b@example.com"]),
                SendMode::Fast,
                None,
                cancel,
            )
            .await
            .unwrap();

        assert_eq!(outcome.report.failed, 2);
        assert!(outcome
            .report
            .results
            .iter()
            .all(|r| r.error == Some(FailureReason::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_recipients_rejected() {
        let campaign = Campaign::load(Arc::new(config("empty"))).await.unwrap();
        let result = campaign
            .run(&[], SendMode::Fast, None, CancellationToken::new())
            .await;

        assert!(matches!(result, Err(CampaignError::NoRecipients)));
    }
}
