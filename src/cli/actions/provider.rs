use crate::{
    auth::Credentials, clock::SystemClock, cli::actions::server::open_ledger,
    registration::Registrations,
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub username: String,
    pub email: String,
    pub password: SecretString,
}

/// Create an approved provider directly in the ledger.
/// # Errors
/// Returns an error if the ledger is unreachable or the provider cannot be created.
pub async fn execute(args: Args) -> Result<()> {
    let ledger = open_ledger(Some(&args.dsn)).await?;
    let registrations =
        Registrations::new(ledger, Arc::new(SystemClock)).with_credentials(Credentials::new());

    let identity = registrations
        .create_provider(&args.username, &args.email, args.password.expose_secret())
        .await
        .context("Failed to create provider")?;

    info!(identity_id = %identity.id, username = %identity.username, "provider created");
    println!("{}", identity.id);

    Ok(())
}
