//! Outbound one-time passcode delivery.
//!
//! `LogNotifier` is the development default and only logs that a passcode was
//! issued. `WebhookNotifier` posts a JSON document to an operator-provided
//! endpoint (a mail or SMS relay) and treats any non-2xx answer as a failure.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::APP_USER_AGENT;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `otp` to `email`; `valid_for` is how long the passcode lives.
    async fn send_one_time_passcode(&self, email: &str, otp: &str, valid_for: Duration)
        -> Result<()>;
}

/// Local dev notifier. The passcode itself is logged at debug level only.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_one_time_passcode(
        &self,
        email: &str,
        otp: &str,
        valid_for: Duration,
    ) -> Result<()> {
        info!(
            to_email = %email,
            valid_for_seconds = valid_for.as_secs(),
            "one-time passcode issued"
        );
        debug!(to_email = %email, otp = %otp, "one-time passcode");
        Ok(())
    }
}

#[derive(Serialize)]
struct PasscodeMessage<'a> {
    email: &'a str,
    otp: &'a str,
    valid_for_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl WebhookNotifier {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("invalid webhook URL")?;
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, endpoint })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_one_time_passcode(
        &self,
        email: &str,
        otp: &str,
        valid_for: Duration,
    ) -> Result<()> {
        let message = PasscodeMessage {
            email,
            otp,
            valid_for_seconds: valid_for.as_secs(),
        };
        self.client
            .post(self.endpoint.clone())
            .json(&message)
            .send()
            .await
            .context("webhook request failed")?
            .error_for_status()
            .context("webhook rejected passcode")?;
        info!(to_email = %email, endpoint = %self.endpoint, "one-time passcode delivered");
        Ok(())
    }
}
