//! Map parsed arguments to the action the binary runs.

use crate::cli::actions::{provider, server, Action};
use crate::cli::commands::{self, auth, metering};
use anyhow::{Context, Result};

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = matches.get_one::<String>(commands::ARG_DSN).cloned();

    if let Some(sub) = matches.subcommand_matches(commands::provider::CMD_CREATE_PROVIDER) {
        let opts = commands::provider::Options::parse(sub)?;
        return Ok(Action::CreateProvider(provider::Args {
            dsn: dsn.context("missing required argument: --dsn")?,
            username: opts.username,
            email: opts.email,
            password: opts.password,
        }));
    }

    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let auth_opts = auth::Options::parse(matches)?;
    let meter_opts = metering::Options::parse(matches);

    Ok(Action::Server(server::Args {
        port,
        dsn,
        token_secret: auth_opts.token_secret,
        token_issuer: auth_opts.token_issuer,
        temporary_token_ttl_seconds: auth_opts.temporary_token_ttl_seconds,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        otp_ttl_seconds: auth_opts.otp_ttl_seconds,
        otp_length: auth_opts.otp_length,
        otp_webhook_url: auth_opts.otp_webhook_url,
        notify_timeout_seconds: auth_opts.notify_timeout_seconds,
        meter_interval_seconds: meter_opts.interval_seconds,
        meter_step_max: meter_opts.step_max,
    }))
}
