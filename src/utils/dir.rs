use std::{env, io, path::PathBuf};

use anyhow::{Result, anyhow};

const APPLICATION_DIR: &str = "chronos";

/// Directory holding the persisted store and logs. `$XDG_STATE_HOME/chronos` (or
/// `$HOME/.local/state/chronos`) on Linux, `%APPDATA%\chronos` on Windows and
/// `~/Library/Application Support/chronos` on macOS.
pub fn create_application_default_path() -> Result<PathBuf> {
    let mut path = platform_state_dir()?;
    path.push(APPLICATION_DIR);

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

#[cfg(windows)]
fn platform_state_dir() -> Result<PathBuf> {
    env::var("APPDATA")
        .map(PathBuf::from)
        .map_err(|_| anyhow!("APPDATA should be present on Windows"))
}

#[cfg(target_os = "macos")]
fn platform_state_dir() -> Result<PathBuf> {
    let home = env::var("HOME").map_err(|_| anyhow!("Couldn't find HOME"))?;
    Ok(PathBuf::from(home).join("Library/Application Support"))
}

#[cfg(all(unix, not(target_os = "macos")))]
fn platform_state_dir() -> Result<PathBuf> {
    env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .map_err(|_| anyhow!("Couldn't find neither XDG_STATE_HOME nor HOME"))
}
