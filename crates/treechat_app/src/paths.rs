use std::path::PathBuf;

use anyhow::{Context, Result};

/// Returns the base directory: `~/.treechat`
pub fn base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".treechat"))
}

/// Returns the logs directory: `~/.treechat/logs`
pub fn logs_dir() -> Result<PathBuf> {
    Ok(base_dir()?.join("logs"))
}

/// Returns the default peer config path: `~/.treechat/peer.json`
pub fn peer_config_path() -> Result<PathBuf> {
    Ok(base_dir()?.join("peer.json"))
}

/// Returns the default directory config path: `~/.treechat/directory.json`
pub fn directory_config_path() -> Result<PathBuf> {
    Ok(base_dir()?.join("directory.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_under_base_dir() {
        let Ok(base) = base_dir() else {
            // No home directory in this environment.
            return;
        };
        assert!(base.ends_with(".treechat"));
        assert_eq!(logs_dir().unwrap(), base.join("logs"));
        assert_eq!(peer_config_path().unwrap(), base.join("peer.json"));
        assert_eq!(directory_config_path().unwrap(), base.join("directory.json"));
    }
}
