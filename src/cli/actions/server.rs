use crate::{
    auth::{AuthConfig, Credentials, TokenService},
    clock::SystemClock,
    ledger::{Ledger, MemoryLedger, PgLedger},
    metering::MeterConfig,
    notify::{LogNotifier, Notifier, WebhookNotifier},
    wifimeter::{self, Services},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub temporary_token_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub otp_ttl_seconds: i64,
    pub otp_length: usize,
    pub otp_webhook_url: Option<String>,
    pub notify_timeout_seconds: u64,
    pub meter_interval_seconds: u64,
    pub meter_step_max: f64,
}

/// Open the ledger named by `dsn`, or an in-memory one when absent.
///
/// # Errors
/// Returns an error if the database cannot be reached or the schema cannot be applied.
pub async fn open_ledger(dsn: Option<&str>) -> Result<Arc<dyn Ledger>> {
    let Some(dsn) = dsn else {
        warn!("No DSN configured, using the in-memory ledger; data is lost on exit");
        return Ok(Arc::new(MemoryLedger::new()));
    };

    let url = Url::parse(dsn).context("Invalid database connection string")?;
    debug!(host = url.host_str().unwrap_or("none"), "connecting to database");

    let ledger = PgLedger::connect(dsn)
        .await
        .context("Failed to connect to database")?;
    ledger
        .apply_schema()
        .await
        .context("Failed to apply database schema")?;
    Ok(Arc::new(ledger))
}

/// Execute the server action.
/// # Errors
/// Returns an error if the ledger is unreachable, the configuration is invalid,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let ledger = open_ledger(args.dsn.as_deref()).await?;
    ledger.ping().await.context("Ledger is unreachable")?;

    let notify_timeout = Duration::from_secs(args.notify_timeout_seconds);
    let notifier: Arc<dyn Notifier> = match args.otp_webhook_url.as_deref() {
        Some(url) => {
            let notifier = WebhookNotifier::new(url, notify_timeout)?;
            info!(endpoint = %notifier.endpoint(), "passcodes delivered through webhook");
            Arc::new(notifier)
        }
        None => {
            warn!("No passcode webhook configured, passcodes are only logged");
            Arc::new(LogNotifier)
        }
    };

    let auth_config = AuthConfig::new()
        .with_issuer(args.token_issuer)
        .with_temporary_token_ttl_seconds(args.temporary_token_ttl_seconds)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_otp_ttl_seconds(args.otp_ttl_seconds)
        .with_otp_length(args.otp_length)
        .with_notify_timeout_seconds(args.notify_timeout_seconds)
        .normalize();

    let tokens = TokenService::new(args.token_secret, auth_config.issuer())
        .context("Invalid token secret")?;

    let meter_config = MeterConfig::new()
        .with_interval_seconds(args.meter_interval_seconds)
        .with_step_max(args.meter_step_max);

    let services = Services::new(
        ledger,
        tokens,
        auth_config,
        notifier,
        Arc::new(SystemClock),
        Credentials::new(),
    );

    wifimeter::new(args.port, services, meter_config).await
}
