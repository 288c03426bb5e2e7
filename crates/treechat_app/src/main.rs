use anyhow::Context;
use clap::Parser;
use tracing::info;

use treechat_app::cli::PeerArgs;
use treechat_app::logging;
use treechat_app::session;
use treechat_app::ui::TerminalUi;
use treechat_net::OverlayNode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = PeerArgs::parse();

    let logs_dir = args.logs_dir()?;
    let _guard = logging::init_peer_logging(&logs_dir)?;

    let config = args.overlay_config();
    info!(
        "Starting treechat peer '{}' against directory {}",
        config.display_name, config.directory_addr
    );

    let (node, inbound) = OverlayNode::start(config)
        .await
        .context("Could not join the chat session")?;

    let mut ui = TerminalUi::new();
    session::run_chat(node, inbound, &mut ui).await
}
