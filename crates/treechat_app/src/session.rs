//! The interactive chat loop tying an [`OverlayNode`] to a [`ChatUi`].

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use treechat_net::protocol::trim_line_end;
use treechat_net::{ChatMessage, InputAction, OverlayNode};

use crate::ui::{BANNER, ChatUi};

/// Run one session until the user quits, input closes or Ctrl-C arrives,
/// then leave the overlay.
pub async fn run_chat<U: ChatUi>(
    node: OverlayNode,
    mut inbound: UnboundedReceiver<ChatMessage>,
    ui: &mut U,
) -> Result<()> {
    ui.display(None, BANNER);
    info!("Session started as {} ({})", node.name(), node.self_id());

    loop {
        tokio::select! {
            line = ui.read_line() => {
                let Some(line) = line else {
                    debug!("Input closed");
                    break;
                };
                match node.handle_input(&line).await {
                    InputAction::Quit => break,
                    InputAction::Ignored => {}
                    InputAction::Sent { links } => {
                        debug!("Local line sent on {links} link(s)");
                        ui.display(Some(node.name()), trim_line_end(&line));
                    }
                }
            }
            Some(message) = inbound.recv() => {
                ui.display(Some(&message.author), &message.body);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    node.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use treechat_net::{DirectoryConfig, DirectoryService, OverlayConfig};

    /// Feeds scripted input and records everything displayed.
    struct ScriptedUi {
        input: VecDeque<String>,
        shown: Vec<(Option<String>, String)>,
    }

    impl ScriptedUi {
        fn new(lines: &[&str]) -> Self {
            Self {
                input: lines.iter().map(|l| l.to_string()).collect(),
                shown: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ChatUi for ScriptedUi {
        fn display(&mut self, author: Option<&str>, text: &str) {
            self.shown.push((author.map(str::to_string), text.to_string()));
        }

        async fn read_line(&mut self) -> Option<String> {
            self.input.pop_front()
        }
    }

    async fn start_node(dir_addr: std::net::SocketAddr, name: &str) -> (OverlayNode, UnboundedReceiver<ChatMessage>) {
        let mut config = OverlayConfig::for_directory(dir_addr.to_string());
        config.display_name = name.to_string();
        config.listen_addr = "127.0.0.1:0".parse().unwrap();
        OverlayNode::start(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_session_echoes_and_quits() {
        let config = DirectoryConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let dir = DirectoryService::start(&config).await.unwrap();
        let (node, inbound) = start_node(dir.local_addr(), "ada").await;

        let mut ui = ScriptedUi::new(&["hello", "", "\\quit", "never sent"]);
        run_chat(node, inbound, &mut ui).await.unwrap();

        assert_eq!(ui.shown[0], (None, BANNER.to_string()));
        assert_eq!(ui.shown[1], (Some("ada".to_string()), "hello".to_string()));
        assert_eq!(ui.shown.len(), 2);
        assert_eq!(ui.input.len(), 1);

        // Quitting sent EXIT.
        assert!(dir.shutdown().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_displays_inbound_lines() {
        let config = DirectoryConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let dir = DirectoryService::start(&config).await.unwrap();
        let (root, _root_rx) = start_node(dir.local_addr(), "root").await;
        let (node, inbound) = start_node(dir.local_addr(), "leaf").await;

        // Wait for the root to register its child before sending.
        tokio::time::timeout(Duration::from_secs(5), async {
            while root.child_count().await == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        root.send_local("welcome").await;

        // Input closes only after the inbound line has been shown.
        struct WaitingUi {
            inner: ScriptedUi,
        }

        #[async_trait]
        impl ChatUi for WaitingUi {
            fn display(&mut self, author: Option<&str>, text: &str) {
                self.inner.display(author, text);
            }

            async fn read_line(&mut self) -> Option<String> {
                if self.inner.shown.len() < 2 {
                    std::future::pending::<()>().await;
                }
                None
            }
        }

        let mut ui = WaitingUi {
            inner: ScriptedUi::new(&[]),
        };
        tokio::time::timeout(Duration::from_secs(5), run_chat(node, inbound, &mut ui))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            ui.inner.shown[1],
            (Some("root".to_string()), "welcome".to_string())
        );

        root.shutdown().await;
        dir.shutdown().await.unwrap();
    }
}
