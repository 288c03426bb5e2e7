//! Treechat application layer: command line, logging, terminal UI and the
//! chat session loop shared by the `treechat` and `treechat-dir` binaries.

pub mod cli;
pub mod logging;
pub mod paths;
pub mod session;
pub mod ui;
