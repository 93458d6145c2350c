pub mod output;
pub mod stats;
pub mod transfer;

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use stats::{StatsCommand, process_stats_command};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{STORE_DIR, processing::DEFAULT_FLUSH_INTERVAL, start_daemon, storage::kv::FileStore},
    utils::{
        dir::create_application_default_path,
        logging::{CLI_PREFIX, enable_logging},
    },
};

const STORE_EDIT_NOTE: &str =
    "Meant to be used while the browser is closed, a running host overwrites the store on its next flush";

#[derive(Parser, Debug)]
#[command(name = "Chronos", version, long_about = None)]
#[command(about = "Per-site browsing time statistics", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default uses $XDG_STATE_HOME/chronos or $HOME/.local/state/chronos"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Display time spent per site")]
    Stats {
        #[command(flatten)]
        command: StatsCommand,
    },
    #[command(about = "Write statistics to a file", long_about = "Write statistics to a file in the format accepted by import")]
    Export { file: PathBuf },
    #[command(
        about = "Merge statistics from a file into the store",
        long_about = format!("Merge statistics from a file into the store. Counters are added up, so importing the same file twice counts it twice. {STORE_EDIT_NOTE}")
    )]
    Import { file: PathBuf },
    #[command(
        about = "Remove all statistics, keeping settings",
        long_about = format!("Remove all statistics, keeping settings. {STORE_EDIT_NOTE}")
    )]
    Clear,
    #[command(about = "Print the application directory")]
    Path,
    #[command(
        about = "Run the native messaging host in the current console. Used for debugging, the browser normally starts chronos-daemon"
    )]
    Serve {
        #[arg(long = "flush-interval", default_value_t = DEFAULT_FLUSH_INTERVAL.as_secs(), value_parser = clap::value_parser!(u64).range(1..))]
        flush_interval: u64,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();
    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir.join("logs"), logging_level, args.log)?;

    let storage = FileStore::new(app_dir.join(STORE_DIR))?;

    match args.commands {
        Commands::Stats { command } => process_stats_command(command, &storage).await,
        Commands::Export { file } => {
            let domains = transfer::export(&storage, &file).await?;
            println!("Exported {domains} domains to {}", file.display());
            Ok(())
        }
        Commands::Import { file } => {
            let domains = transfer::import(&storage, &file).await?;
            println!("Merged {domains} domains from {}", file.display());
            Ok(())
        }
        Commands::Clear => {
            transfer::clear(&storage).await?;
            println!("Statistics cleared");
            Ok(())
        }
        Commands::Path => {
            println!("{}", app_dir.display());
            Ok(())
        }
        Commands::Serve { flush_interval } => {
            start_daemon(app_dir, Duration::from_secs(flush_interval)).await
        }
    }
}
