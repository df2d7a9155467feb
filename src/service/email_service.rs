//! Email Service
//!
//! Background email dispatch. Request handlers render a message and hand it
//! to [`EmailDispatcher::enqueue`], which never waits on delivery. A single
//! worker task drains the queue, retries failed sends with linear backoff,
//! and writes jobs that still fail to the `email_dead_letter` log target.

use async_trait::async_trait;
use chrono::Datelike;
use lettre::{
    message::{header, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tera::{Context, Tera};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{EmailConfig, SmtpConfig};
use crate::models::OtpPurpose;
use crate::utils::error::{AppError, AppResult};

/// Log target for jobs that exhausted their retries
pub const DEAD_LETTER_TARGET: &str = "email_dead_letter";

const OTP_HTML_TEMPLATE: &str = "otp_email.html";
const OTP_TEXT_TEMPLATE: &str = "otp_email.txt";

/// Mail transport errors
#[derive(Error, Debug)]
pub enum MailerError {
    #[error("Invalid message: {0}")]
    Message(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Mailer configuration error: {0}")]
    Configuration(String),
}

/// A rendered message waiting for delivery
#[derive(Clone)]
pub struct EmailJob {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl fmt::Debug for EmailJob {
    // Bodies carry one-time codes
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailJob")
            .field("to", &self.to)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// Something that can deliver an [`EmailJob`]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, job: &EmailJob) -> Result<(), MailerError>;
}

/// SMTP delivery through lettre's async transport
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailerError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| {
                MailerError::Configuration(format!("Failed to configure SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .map_err(|e| MailerError::Configuration(format!("Invalid from address: {}", e)))?;

        Ok(Self { transport, from })
    }

    fn build_message(&self, job: &EmailJob) -> Result<Message, MailerError> {
        let to = job
            .to
            .parse::<Mailbox>()
            .map_err(|e| MailerError::Message(format!("Invalid recipient email: {}", e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(job.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(job.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(job.html.clone()),
                    ),
            )
            .map_err(|e| MailerError::Message(format!("Failed to build email message: {}", e)))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, job: &EmailJob) -> Result<(), MailerError> {
        let message = self.build_message(job)?;
        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| MailerError::Transport(e.to_string()))
    }
}

/// Stand-in used when SMTP is not configured; records that mail would
/// have gone out without writing the body anywhere
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, job: &EmailJob) -> Result<(), MailerError> {
        info!(
            "SMTP not configured; not delivering \"{}\" to {}",
            job.subject, job.to
        );
        Ok(())
    }
}

/// Renders one-time code emails from the embedded templates
pub struct OtpEmailRenderer {
    templates: Tera,
    app_name: String,
}

impl OtpEmailRenderer {
    pub fn new(app_name: impl Into<String>) -> AppResult<Self> {
        let mut templates = Tera::default();

        let html = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{{ heading }}</title>
</head>
<body style="font-family: Arial, sans-serif; color: #111; max-width: 600px; margin: 0 auto;">
    <h2>{{ heading }}</h2>
    <p>Use the following code to continue:</p>
    <h1 style="letter-spacing: 4px;">{{ code }}</h1>
    <p>This code will expire in {{ ttl_minutes }} minutes.</p>
    <p>If you didn't request this, ignore this email.</p>
    <hr />
    <small>{{ app_name }} &middot; {{ current_year }}</small>
</body>
</html>
"#;

        let text = r#"{{ heading }}

Use the following code to continue: {{ code }}

This code will expire in {{ ttl_minutes }} minutes.

If you didn't request this, ignore this email.

--
{{ app_name }} - {{ current_year }}
"#;

        templates
            .add_raw_template(OTP_HTML_TEMPLATE, html)
            .map_err(|e| AppError::Configuration(format!("Failed to add HTML template: {}", e)))?;
        templates
            .add_raw_template(OTP_TEXT_TEMPLATE, text)
            .map_err(|e| AppError::Configuration(format!("Failed to add text template: {}", e)))?;

        Ok(Self {
            templates,
            app_name: app_name.into(),
        })
    }

    pub fn subject_for(purpose: OtpPurpose) -> &'static str {
        match purpose {
            OtpPurpose::Signup => "Your Signup OTP",
            OtpPurpose::Login => "Your Verification Code",
        }
    }

    pub fn render(
        &self,
        to: &str,
        code: &str,
        purpose: OtpPurpose,
        ttl_minutes: i64,
    ) -> AppResult<EmailJob> {
        let mut context = Context::new();
        context.insert("heading", &format!("Your {} code", purpose));
        context.insert("code", code);
        context.insert("ttl_minutes", &ttl_minutes);
        context.insert("app_name", &self.app_name);
        context.insert("current_year", &chrono::Utc::now().year());

        let html = self
            .templates
            .render(OTP_HTML_TEMPLATE, &context)
            .map_err(|e| AppError::Internal(format!("Failed to render HTML template: {}", e)))?;
        let text = self
            .templates
            .render(OTP_TEXT_TEMPLATE, &context)
            .map_err(|e| AppError::Internal(format!("Failed to render text template: {}", e)))?;

        Ok(EmailJob {
            to: to.to_string(),
            subject: Self::subject_for(purpose).to_string(),
            html,
            text,
        })
    }
}

/// Delivery counters, shared between the handle and the worker
#[derive(Debug, Default)]
pub struct DispatchStats {
    sent: AtomicU64,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
}

impl DispatchStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

/// Handle to the background email queue
#[derive(Clone)]
pub struct EmailDispatcher {
    sender: mpsc::Sender<EmailJob>,
    stats: Arc<DispatchStats>,
}

impl EmailDispatcher {
    /// Start the worker task and return a handle to its queue
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(mailer: Arc<dyn Mailer>, config: &EmailConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(DispatchStats::default());
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        };

        let handle = tokio::spawn(run_worker(receiver, mailer, policy, stats.clone()));

        (Self { sender, stats }, handle)
    }

    /// Queue a job without waiting; a full or closed queue drops it
    pub fn enqueue(&self, job: EmailJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!("Email queue full; dropping \"{}\" to {}", job.subject, job.to);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!("Email worker stopped; dropping \"{}\" to {}", job.subject, job.to);
                false
            }
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<EmailJob>,
    mailer: Arc<dyn Mailer>,
    policy: RetryPolicy,
    stats: Arc<DispatchStats>,
) {
    info!("Email dispatcher started");

    while let Some(job) = receiver.recv().await {
        deliver(&job, mailer.as_ref(), policy, &stats).await;
    }

    info!("Email dispatcher stopped");
}

async fn deliver(job: &EmailJob, mailer: &dyn Mailer, policy: RetryPolicy, stats: &DispatchStats) {
    let attempts = policy.max_retries + 1;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match mailer.send(job).await {
            Ok(()) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                debug!("Delivered \"{}\" to {} on attempt {}", job.subject, job.to, attempt);
                return;
            }
            Err(e) => {
                warn!(
                    "Delivery of \"{}\" to {} failed (attempt {}/{}): {}",
                    job.subject, job.to, attempt, attempts, e
                );
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff * attempt).await;
                }
            }
        }
    }

    stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
    error!(
        target: DEAD_LETTER_TARGET,
        "to={} subject={:?} attempts={} error={}",
        job.to,
        job.subject,
        attempts,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    );
}
