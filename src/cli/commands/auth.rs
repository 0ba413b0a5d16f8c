use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_TEMPORARY_TOKEN_TTL: &str = "temporary-token-ttl-seconds";
pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";
pub const ARG_OTP_TTL: &str = "otp-ttl-seconds";
pub const ARG_OTP_LENGTH: &str = "otp-length";
pub const ARG_OTP_WEBHOOK_URL: &str = "otp-webhook-url";
pub const ARG_NOTIFY_TIMEOUT: &str = "notify-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub temporary_token_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub otp_ttl_seconds: i64,
    pub otp_length: usize,
    pub otp_webhook_url: Option<String>,
    pub notify_timeout_seconds: u64,
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the token secret is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_TOKEN_SECRET}"))?;

        Ok(Self {
            token_secret,
            token_issuer: matches
                .get_one::<String>(ARG_TOKEN_ISSUER)
                .cloned()
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            temporary_token_ttl_seconds: matches
                .get_one::<i64>(ARG_TEMPORARY_TOKEN_TTL)
                .copied()
                .unwrap_or(600),
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL)
                .copied()
                .unwrap_or(43_200),
            otp_ttl_seconds: matches.get_one::<i64>(ARG_OTP_TTL).copied().unwrap_or(300),
            otp_length: matches.get_one::<usize>(ARG_OTP_LENGTH).copied().unwrap_or(6),
            otp_webhook_url: matches
                .get_one::<String>(ARG_OTP_WEBHOOK_URL)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            notify_timeout_seconds: matches
                .get_one::<u64>(ARG_NOTIFY_TIMEOUT)
                .copied()
                .unwrap_or(10),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_otp_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret used to sign tokens (at least 32 bytes)")
                .env("WIFIMETER_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer written into and required from tokens")
                .env("WIFIMETER_TOKEN_ISSUER")
                .default_value(env!("CARGO_PKG_NAME")),
        )
        .arg(
            Arg::new(ARG_TEMPORARY_TOKEN_TTL)
                .long(ARG_TEMPORARY_TOKEN_TTL)
                .help("Lifetime of the temporary token issued by login")
                .env("WIFIMETER_TEMPORARY_TOKEN_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Lifetime of the full token issued after passcode verification")
                .env("WIFIMETER_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_otp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_TTL)
                .long(ARG_OTP_TTL)
                .help("One-time passcode lifetime in seconds")
                .env("WIFIMETER_OTP_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OTP_LENGTH)
                .long(ARG_OTP_LENGTH)
                .help("Number of digits in a one-time passcode")
                .env("WIFIMETER_OTP_LENGTH")
                .default_value("6")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_OTP_WEBHOOK_URL)
                .long(ARG_OTP_WEBHOOK_URL)
                .help("Relay receiving passcode deliveries as JSON; passcodes are only logged when unset")
                .env("WIFIMETER_OTP_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_NOTIFY_TIMEOUT)
                .long(ARG_NOTIFY_TIMEOUT)
                .help("Timeout for passcode delivery in seconds")
                .env("WIFIMETER_NOTIFY_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}
