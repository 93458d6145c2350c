use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

/// Native messaging host recording how long each site is in front. Meant to be started by the
/// browser, which talks to it over stdin and stdout.
#[derive(Parser)]
#[command(version)]
pub struct DaemonArgs {
    /// Application directory holding the store and logs.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Seconds between periodic flushes of the statistics.
    #[arg(long = "flush-interval", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub flush_interval: u64,
    /// This option is for debugging purposes only. Logs go to stderr, never to stdout.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    /// Whatever the browser passes when launching the host (extension origin, parent window).
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub caller: Vec<String>,
}
