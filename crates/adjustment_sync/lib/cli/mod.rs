use crate::build_info;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Pushes pending stock adjustments to Sage",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[arg(long, default_value_t = false)]
    /// Run a single processing cycle and exit
    pub once: bool,

    #[arg(long = "no-server", default_value_t = false)]
    /// Do not start the health and metrics endpoint
    pub no_server: bool,

    #[arg(long = "log-level", default_value = "info")]
    /// Default filter when RUST_LOG is unset
    pub log_level: String,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
