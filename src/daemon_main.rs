// Avoids a console window popping up on Windows when the browser launches the host. Standard
// handles are inherited from the browser either way.
#![windows_subsystem = "windows"]

use std::time::Duration;

use anyhow::Result;
use chronos::{
    daemon::{args::DaemonArgs, start_daemon},
    utils::{
        dir::create_application_default_path,
        logging::{DAEMON_PREFIX, enable_logging},
        runtime::single_thread_runtime,
    },
};
use clap::Parser;
use tracing::{error, info};

fn main() -> Result<()> {
    let args = DaemonArgs::parse();
    let app_dir = args.dir.clone().map_or_else(create_application_default_path, Ok)?;
    enable_logging(DAEMON_PREFIX, &app_dir.join("logs"), args.log, args.log_console)?;
    info!("Host launched with {:?}", args.caller);

    let runtime = single_thread_runtime()?;
    let result = runtime.block_on(start_daemon(
        app_dir,
        Duration::from_secs(args.flush_interval),
    ));
    runtime.shutdown_timeout(Duration::from_secs(1));

    result.inspect_err(|e| error!("Daemon stopped with an error {e:?}"))
}
