use clap::{Arg, ArgMatches, Command};

pub const ARG_METER_INTERVAL: &str = "meter-interval-seconds";
pub const ARG_METER_STEP_MAX: &str = "meter-step-max";

#[derive(Debug, Clone)]
pub struct Options {
    pub interval_seconds: u64,
    pub step_max: f64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            interval_seconds: matches
                .get_one::<u64>(ARG_METER_INTERVAL)
                .copied()
                .unwrap_or(30),
            step_max: matches
                .get_one::<f64>(ARG_METER_STEP_MAX)
                .copied()
                .unwrap_or(100.0),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_METER_INTERVAL)
                .long(ARG_METER_INTERVAL)
                .help("Seconds between background metering cycles")
                .env("WIFIMETER_METER_INTERVAL_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_METER_STEP_MAX)
                .long(ARG_METER_STEP_MAX)
                .help("Upper bound of the usage drawn per identity per cycle")
                .env("WIFIMETER_METER_STEP_MAX")
                .default_value("100")
                .value_parser(clap::value_parser!(f64)),
        )
}
