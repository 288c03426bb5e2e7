//! Command-line arguments for both binaries.
//!
//! Arguments override values from the JSON config file, which in turn
//! overrides built-in defaults.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use treechat_net::{DirectoryConfig, OverlayConfig};

use crate::paths;

/// Join a treechat session.
#[derive(Debug, Parser)]
#[command(name = "treechat", about = "Tree-overlay group chat peer")]
pub struct PeerArgs {
    /// Host name or address of the directory service
    pub directory_host: String,

    /// Port of the directory service
    pub directory_port: u16,

    /// Display name attached to your messages
    pub name: Option<String>,

    /// Peer config file (defaults to ~/.treechat/peer.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for log files (defaults to ~/.treechat/logs)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl PeerArgs {
    /// Build the overlay config: file values first, then arguments.
    pub fn overlay_config(&self) -> OverlayConfig {
        let mut config = match config_file(self.config.as_deref(), paths::peer_config_path) {
            Some(path) => OverlayConfig::load_or_default(&path),
            None => OverlayConfig::default(),
        };
        config.directory_addr = directory_addr(&self.directory_host, self.directory_port);
        if let Some(name) = &self.name {
            config.display_name = name.clone();
        }
        config
    }

    pub fn logs_dir(&self) -> Result<PathBuf> {
        match &self.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::logs_dir(),
        }
    }
}

/// Run the treechat directory service.
#[derive(Debug, Parser)]
#[command(name = "treechat-dir", about = "Treechat directory service")]
pub struct DirectoryArgs {
    /// Port to listen on (0 or omitted picks a free port)
    pub port: Option<u16>,

    /// Directory config file (defaults to ~/.treechat/directory.json)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl DirectoryArgs {
    pub fn directory_config(&self) -> DirectoryConfig {
        let mut config = match config_file(self.config.as_deref(), paths::directory_config_path) {
            Some(path) => DirectoryConfig::load_or_default(&path),
            None => DirectoryConfig::default(),
        };
        if let Some(port) = self.port {
            config.listen_addr.set_port(port);
        }
        config
    }
}

/// The explicit config path, else the default one if the home directory is known.
fn config_file(explicit: Option<&Path>, default: fn() -> Result<PathBuf>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default().ok(),
    }
}

/// Join host and port, bracketing bare IPv6 literals.
fn directory_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
