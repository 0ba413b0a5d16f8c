use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const CMD_CREATE_PROVIDER: &str = "create-provider";

#[derive(Debug, Clone)]
pub struct Options {
    pub username: String,
    pub email: String,
    pub password: SecretString,
}

impl Options {
    /// Parse `create-provider` arguments.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            username: read_required("username")?,
            email: read_required("email")?,
            password: SecretString::from(read_required("password")?),
        })
    }
}

#[must_use]
pub fn subcommand() -> Command {
    Command::new(CMD_CREATE_PROVIDER)
        .about("Create an approved WiFi provider account")
        .arg(
            Arg::new("username")
                .long("username")
                .help("Provider username")
                .required(true),
        )
        .arg(
            Arg::new("email")
                .long("email")
                .help("Provider email address")
                .required(true),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .help("Provider password")
                .env("WIFIMETER_PROVIDER_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
}
