use anyhow::Context;
use clap::Parser;
use tracing::info;

use treechat_app::cli::DirectoryArgs;
use treechat_app::logging;
use treechat_net::DirectoryService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DirectoryArgs::parse();
    logging::init_directory_logging()?;

    let config = args.directory_config();
    let handle = DirectoryService::start(&config)
        .await
        .with_context(|| format!("Could not listen on {}", config.listen_addr))?;
    println!("Listening on port {}", handle.local_addr().port());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    let registry = handle.shutdown().await?;
    info!("Directory stopped with {} registered peer(s)", registry.len());
    Ok(())
}
