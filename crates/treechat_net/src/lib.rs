//! Treechat Network: tree-overlay group chat with a rendezvous directory.
//!
//! Peers register with a directory that hands out strictly increasing ids.
//! Each peer connects to at most one parent with a smaller id and accepts any
//! number of children, so the overlay is always a forest. Chat lines flood
//! along tree edges: every node forwards a line to all neighbors except the
//! one it arrived on, which delivers it to each node exactly once.
//!
//! # Architecture
//!
//! - **Directory**: a sequential TCP service ([`DirectoryService`]) holding
//!   the [`Registry`] of live peers.
//! - **Client**: [`DirectoryClient`] runs JOIN, REQUEST_NEW and EXIT, one
//!   connection per request.
//! - **Links**: newline-framed TCP connections with serialized writers.
//! - **Node**: [`OverlayNode`] owns the parent and children, floods lines and
//!   re-parents when its parent disappears.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use treechat_net::{OverlayConfig, OverlayNode};
//!
//! # async fn example() {
//! let mut config = OverlayConfig::for_directory("127.0.0.1:9480");
//! config.display_name = "ada".into();
//!
//! let (node, mut inbound) = OverlayNode::start(config).await.unwrap();
//! node.send_local("hello, tree").await;
//! if let Some(message) = inbound.recv().await {
//!     println!("{}: {}", message.author, message.body);
//! }
//! node.shutdown().await;
//! # }
//! ```

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod link;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod topology;
pub mod wire;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use client::{DirectoryClient, JoinOutcome};
pub use config::{DirectoryConfig, OverlayConfig};
pub use directory::{DirectoryHandle, DirectoryService};
pub use error::NetworkError;
pub use identity::{LinkId, PeerId};
pub use link::{LinkInfo, LinkRole};
pub use node::{InputAction, OverlayNode};
pub use protocol::{ChatMessage, DirectoryRecord};
pub use registry::Registry;
pub use topology::TopologyState;
