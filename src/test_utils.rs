//! Shared fixtures for in-crate tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::service::email_service::{EmailJob, Mailer, MailerError};

/// Mailer that keeps every job it is handed
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<EmailJob>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, job: &EmailJob) -> Result<(), MailerError> {
        self.sent.lock().unwrap().push(job.clone());
        Ok(())
    }
}

impl RecordingMailer {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Code from the newest message sent to `email`, if any
    pub fn latest_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|job| job.to == email)
            .and_then(|job| extract_code(&job.text))
    }
}

fn extract_code(text: &str) -> Option<String> {
    let marker = "Use the following code to continue: ";
    let start = text.find(marker)? + marker.len();
    let code: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (!code.is_empty()).then_some(code)
}

/// Poll until `condition` holds, failing the test after five seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait for the background dispatcher to deliver a code to `email`
pub async fn wait_for_code(mailer: &Arc<RecordingMailer>, email: &str, after: usize) -> String {
    wait_until(|| mailer.count() > after).await;
    mailer
        .latest_code_for(email)
        .expect("no code delivered to recipient")
}
