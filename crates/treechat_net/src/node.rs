//! OverlayNode: one peer's place in the chat tree.
//!
//! [`OverlayNode`] is the primary public API for treechat_net. It manages:
//! - Joining through the directory and picking a parent among smaller ids
//! - Accepting child connections
//! - One receive loop per link, flooding every inbound line onward
//! - Flooding locally authored lines to every neighbor
//! - Supervising the parent link and re-parenting when it fails
//!
//! Because every peer connects only to a peer with a smaller id and keeps at
//! most one parent, the links form a tree. Forwarding a line to every
//! neighbor except the one it came from therefore reaches each node exactly
//! once without sequence numbers or duplicate tracking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock as StateLock;
use tokio::net::TcpListener;
use tokio::sync::{Notify, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::DirectoryClient;
use crate::config::{DEFAULT_DISPLAY_NAME, OverlayConfig};
use crate::error::NetworkError;
use crate::identity::{LinkId, PeerId};
use crate::link::{Link, LinkHealth, LinkInfo, LinkReader, LinkRole};
use crate::protocol::{ChatMessage, DirectoryRecord, QUIT_TOKEN, sanitize_field, trim_line_end};
use crate::topology::{CandidatePool, TopologyState};
use crate::wire::read_raw_line;

/// What the node did with one line of local input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    /// The quit token was entered; the caller should shut the node down.
    Quit,
    /// Empty input, nothing sent.
    Ignored,
    /// The line was authored and written to `links` neighbors.
    Sent { links: usize },
}

/// The current parent and the directory id it was registered under.
#[derive(Clone)]
struct ParentLink {
    id: PeerId,
    link: Arc<Link>,
}

/// State shared between the node handle and its background tasks.
struct NodeShared {
    self_id: PeerId,
    name: String,
    config: OverlayConfig,
    directory: DirectoryClient,
    state: StateLock<TopologyState>,
    parent: RwLock<Option<ParentLink>>,
    children: RwLock<HashMap<LinkId, Arc<Link>>>,
    /// Parsed inbound lines for display.
    messages_tx: mpsc::UnboundedSender<ChatMessage>,
    /// Wakes the supervisor as soon as the parent link is known to be gone.
    parent_lost: Notify,
    shutdown_tx: broadcast::Sender<()>,
}

/// A running overlay peer.
///
/// Created by [`start()`](OverlayNode::start); leave the session with
/// [`shutdown()`](OverlayNode::shutdown).
pub struct OverlayNode {
    shared: Arc<NodeShared>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl OverlayNode {
    /// Bind the child listener, join through the directory, find a parent
    /// and start the background tasks.
    ///
    /// Failing to bind or to reach the directory is fatal: without an id the
    /// peer cannot take part. The returned receiver yields every inbound chat
    /// line for display.
    pub async fn start(
        config: OverlayConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChatMessage>), NetworkError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening for children on {local_addr}");

        let mut name = sanitize_field(&config.display_name);
        if name.is_empty() {
            name = DEFAULT_DISPLAY_NAME.to_string();
        }
        let directory = DirectoryClient::new(config.directory_addr.clone(), config.directory_timeout);
        let joined = directory
            .join(&name, config.advertise_addr, local_addr.port())
            .await?;
        info!(
            "Joined as {} ('{name}', advertised {}), {} candidate(s)",
            joined.id,
            joined.address,
            joined.candidates.len()
        );

        let (shutdown_tx, _) = broadcast::channel(8);
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(NodeShared {
            self_id: joined.id,
            name,
            config,
            directory,
            state: StateLock::new(TopologyState::Joining),
            parent: RwLock::new(None),
            children: RwLock::new(HashMap::new()),
            messages_tx,
            parent_lost: Notify::new(),
            shutdown_tx,
        });

        let accept_shared = Arc::clone(&shared);
        let accept_shutdown = shared.shutdown_tx.subscribe();
        let accept_task = tokio::spawn(async move {
            accept_shared.accept_loop(listener, accept_shutdown).await;
        });

        shared.seek_parent(joined.candidates).await;

        let supervisor_shared = Arc::clone(&shared);
        let supervisor_shutdown = shared.shutdown_tx.subscribe();
        let supervisor_task = tokio::spawn(async move {
            supervisor_shared.supervise(supervisor_shutdown).await;
        });

        let node = Self {
            shared,
            local_addr,
            tasks: vec![accept_task, supervisor_task],
        };
        Ok((node, messages_rx))
    }

    /// The id the directory assigned to this node.
    pub fn self_id(&self) -> PeerId {
        self.shared.self_id
    }

    /// The display name attached to local lines.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Address of the child listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current position in the tree.
    pub fn state(&self) -> TopologyState {
        self.shared.state.read().clone()
    }

    /// Directory id of the current parent, if any.
    pub async fn parent_id(&self) -> Option<PeerId> {
        self.shared.parent.read().await.as_ref().map(|p| p.id)
    }

    pub async fn child_count(&self) -> usize {
        self.shared.children.read().await.len()
    }

    /// Snapshot of every live link, parent first.
    pub async fn links(&self) -> Vec<LinkInfo> {
        let mut out = Vec::new();
        if let Some(parent) = self.shared.parent.read().await.as_ref() {
            out.push(parent.link.info());
        }
        out.extend(self.shared.children.read().await.values().map(|l| l.info()));
        out
    }

    /// Apply one line of local input: quit, ignore, or author and flood.
    pub async fn handle_input(&self, line: &str) -> InputAction {
        let line = trim_line_end(line);
        if line == QUIT_TOKEN {
            return InputAction::Quit;
        }
        if line.is_empty() {
            return InputAction::Ignored;
        }
        InputAction::Sent {
            links: self.send_local(line).await,
        }
    }

    /// Author `body` under our name and send it to every neighbor.
    /// Returns the number of links written.
    pub async fn send_local(&self, body: &str) -> usize {
        let body = body.replace(['\r', '\n'], " ");
        let message = ChatMessage::new(self.shared.name.clone(), body);
        self.shared.flood(&message.to_line(), None).await
    }

    /// Leave the session: tell the directory, then close everything.
    pub async fn shutdown(self) {
        info!("Leaving session as {}", self.shared.self_id);
        if let Err(e) = self.shared.directory.leave(self.shared.self_id).await {
            warn!("Could not announce departure: {e}");
        }
        self.close().await;
    }

    /// Stop without announcing departure. Neighbors see the links drop and
    /// the directory keeps our record until someone fails to reach us.
    pub async fn close(mut self) {
        *self.shared.state.write() = TopologyState::Exiting;
        let _ = self.shared.shutdown_tx.send(());

        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        let parent = self.shared.parent.write().await.take();
        if let Some(parent) = parent {
            parent.link.close();
        }
        let children: Vec<Arc<Link>> = self
            .shared
            .children
            .write()
            .await
            .drain()
            .map(|(_, link)| link)
            .collect();
        for child in children {
            child.close();
        }
        debug!("Node {} closed", self.shared.self_id);
    }
}

impl Drop for OverlayNode {
    fn drop(&mut self) {
        let _ = self.shared.shutdown_tx.send(());
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl NodeShared {
    fn set_state(&self, state: TopologyState) {
        let mut current = self.state.write();
        if *current == TopologyState::Exiting {
            return;
        }
        debug!("Node {}: {} -> {}", self.self_id, *current, state);
        *current = state;
    }

    // -----------------------------------------------------------------------
    // Parent selection
    // -----------------------------------------------------------------------

    /// Try candidates in random order until one accepts, else become root.
    async fn seek_parent(self: &Arc<Self>, candidates: Vec<DirectoryRecord>) {
        self.set_state(TopologyState::SeekingParent);
        let mut pool = CandidatePool::new(
            candidates
                .into_iter()
                .filter(|c| c.id < self.self_id)
                .collect(),
        );

        loop {
            let choice = {
                let mut rng = rand::rng();
                pool.pick(&mut rng).cloned()
            };
            let Some(candidate) = choice else {
                info!("No reachable parent, acting as root");
                self.set_state(TopologyState::Root);
                return;
            };

            match Link::connect(
                &candidate.address,
                candidate.port,
                &candidate.name,
                self.config.connect_timeout,
            )
            .await
            {
                Ok((link, reader)) => {
                    info!(
                        "Connected to parent '{}' ({}) at {}",
                        candidate.name,
                        candidate.id,
                        link.remote_addr()
                    );
                    *self.parent.write().await = Some(ParentLink {
                        id: candidate.id,
                        link: Arc::clone(&link),
                    });
                    self.set_state(TopologyState::HasParent {
                        parent: candidate.id,
                    });
                    self.spawn_receive_loop(link, reader);
                    return;
                }
                Err(e) => {
                    let removed = pool.discard_target(&candidate);
                    warn!(
                        "Candidate '{}' ({}) at {}:{} unreachable ({e}), dropped {removed} entr{}",
                        candidate.name,
                        candidate.id,
                        candidate.address,
                        candidate.port,
                        if removed == 1 { "y" } else { "ies" }
                    );
                }
            }
        }
    }

    /// Fetch a fresh candidate set and seek a new parent.
    ///
    /// An unreachable directory counts as an empty candidate set.
    async fn reparent(self: &Arc<Self>) {
        self.set_state(TopologyState::SeekingParent);
        match self.directory.request_new(self.self_id).await {
            Ok(candidates) => self.seek_parent(candidates).await,
            Err(e) => {
                warn!("Directory unreachable while re-parenting ({e}), acting as root");
                self.set_state(TopologyState::Root);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    /// Probe the parent on every tick, or at once when its loss is reported.
    async fn supervise(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.health_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.parent_lost.notified() => {}
                _ = shutdown.recv() => {
                    debug!("Supervisor shutting down");
                    break;
                }
            }
            self.check_parent().await;
        }
    }

    /// Re-parent if the current parent link fails its health probe.
    /// A root has no parent to probe and is never re-queried.
    async fn check_parent(self: &Arc<Self>) {
        let Some(parent) = self.parent.read().await.clone() else {
            return;
        };
        if parent.link.probe(self.config.health_check_retries).await == LinkHealth::Healthy {
            return;
        }

        warn!("Lost parent {} at {}", parent.id, parent.link.remote_addr());
        {
            let mut current = self.parent.write().await;
            if current
                .as_ref()
                .is_some_and(|p| p.link.id() == parent.link.id())
            {
                current.take();
            }
        }
        parent.link.abort();
        self.reparent().await;
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            match Link::from_stream(stream, LinkRole::Child, peer_addr.to_string()) {
                                Ok((link, reader)) => {
                                    info!("Child connected from {peer_addr}");
                                    self.children
                                        .write()
                                        .await
                                        .insert(link.id(), Arc::clone(&link));
                                    self.spawn_receive_loop(link, reader);
                                }
                                Err(e) => warn!("Could not set up child link from {peer_addr}: {e}"),
                            }
                        }
                        Err(e) => {
                            error!("Child accept failed: {e}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Accept loop shutting down");
                    break;
                }
            }
        }
    }

    fn spawn_receive_loop(self: &Arc<Self>, link: Arc<Link>, reader: LinkReader) {
        let shared = Arc::clone(self);
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            shared.receive_loop(link, reader, shutdown).await;
        });
    }

    /// Deliver and forward lines from one link until it ends or is torn
    /// down locally.
    async fn receive_loop(
        self: Arc<Self>,
        link: Arc<Link>,
        mut reader: LinkReader,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let result = tokio::select! {
                result = read_raw_line(&mut reader) => result,
                _ = link.closed() => {
                    debug!("Link {} to {} torn down", link.id(), link.remote_addr());
                    break;
                }
                _ = shutdown.recv() => return,
            };
            match result {
                Ok(Some(line)) => self.handle_inbound(&link, line).await,
                Ok(None) => {
                    debug!("Link {} to {} reached EOF", link.id(), link.remote_addr());
                    break;
                }
                Err(e) => {
                    debug!("Read error on link to {}: {e}", link.remote_addr());
                    break;
                }
            }
        }

        self.link_ended(&link).await;
    }

    // -----------------------------------------------------------------------
    // Flooding
    // -----------------------------------------------------------------------

    /// Display a well-formed line and forward it exactly as received.
    async fn handle_inbound(&self, from: &Arc<Link>, line: String) {
        if from.is_closed() {
            return;
        }
        let text = line.strip_suffix('\r').unwrap_or(&line);
        let Some(message) = ChatMessage::parse(text) else {
            debug!("Dropping malformed line from {}: {line:?}", from.remote_addr());
            return;
        };
        let _ = self.messages_tx.send(message);
        self.flood(&line, Some(from.id())).await;
    }

    /// Queue `line` on every link except `except`. Returns how many accepted it.
    ///
    /// The link set is snapshotted under its lock. Queueing never waits on a
    /// socket, so a neighbor that stops reading delays nobody; once its queue
    /// fills it is treated as failed.
    async fn flood(&self, line: &str, except: Option<LinkId>) -> usize {
        let mut targets: Vec<Arc<Link>> = Vec::new();
        if let Some(parent) = self.parent.read().await.as_ref() {
            if Some(parent.link.id()) != except {
                targets.push(Arc::clone(&parent.link));
            }
        }
        targets.extend(
            self.children
                .read()
                .await
                .values()
                .filter(|l| Some(l.id()) != except)
                .cloned(),
        );

        let mut sent = 0;
        for link in &targets {
            match link.send_line(line) {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!("Send to {} failed: {e}", link.remote_addr());
                    self.link_ended(link).await;
                }
            }
        }
        sent
    }

    /// Forget a dead link: children are dropped, a parent wakes the supervisor.
    async fn link_ended(&self, link: &Arc<Link>) {
        link.abort();
        match link.role() {
            LinkRole::Child => {
                if self.children.write().await.remove(&link.id()).is_some() {
                    info!("Child at {} disconnected", link.remote_addr());
                }
            }
            LinkRole::Parent => {
                self.parent_lost.notify_one();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryConfig;
    use crate::directory::{DirectoryHandle, DirectoryService};
    use std::time::Duration;

    async fn start_directory() -> DirectoryHandle {
        let config = DirectoryConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
        };
        DirectoryService::start(&config).await.unwrap()
    }

    fn peer_config(dir: &DirectoryHandle, name: &str) -> OverlayConfig {
        let mut config = OverlayConfig::for_directory(dir.local_addr().to_string());
        config.display_name = name.to_string();
        config.listen_addr = "127.0.0.1:0".parse().unwrap();
        config.health_check_interval = Duration::from_millis(100);
        config
    }

    #[tokio::test]
    async fn test_first_node_is_root() {
        let dir = start_directory().await;
        let (node, _rx) = OverlayNode::start(peer_config(&dir, "solo")).await.unwrap();

        assert_eq!(node.self_id(), PeerId(0));
        assert_eq!(node.state(), TopologyState::Root);
        assert_eq!(node.parent_id().await, None);
        assert_eq!(node.name(), "solo");
        assert_ne!(node.local_addr().port(), 0);

        node.shutdown().await;
        let registry = dir.shutdown().await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_handle_input_actions() {
        let dir = start_directory().await;
        let (node, _rx) = OverlayNode::start(peer_config(&dir, "typist")).await.unwrap();

        assert_eq!(node.handle_input("\\quit").await, InputAction::Quit);
        assert_eq!(node.handle_input("\\quit\n").await, InputAction::Quit);
        assert_eq!(node.handle_input("").await, InputAction::Ignored);
        // No neighbors yet: authored but sent nowhere.
        assert_eq!(
            node.handle_input("hello").await,
            InputAction::Sent { links: 0 }
        );

        node.close().await;
        dir.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_without_directory() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = OverlayConfig::for_directory(addr.to_string());
        config.listen_addr = "127.0.0.1:0".parse().unwrap();
        config.directory_timeout = Duration::from_millis(500);
        assert!(OverlayNode::start(config).await.is_err());
    }

    #[tokio::test]
    async fn test_second_node_attaches_to_first() {
        let dir = start_directory().await;
        let (a, _rx_a) = OverlayNode::start(peer_config(&dir, "alpha")).await.unwrap();
        let (b, _rx_b) = OverlayNode::start(peer_config(&dir, "beta")).await.unwrap();

        assert_eq!(b.self_id(), PeerId(1));
        assert_eq!(b.state(), TopologyState::HasParent { parent: PeerId(0) });

        let links = b.links().await;
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].role, LinkRole::Parent);
        assert_eq!(links[0].remote_name, "alpha");

        b.close().await;
        a.close().await;
        dir.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_name_with_separator_is_sanitized() {
        let dir = start_directory().await;
        let (node, _rx) = OverlayNode::start(peer_config(&dir, "bad#!name")).await.unwrap();
        assert_eq!(node.name(), "badname");
        node.close().await;

        // Registration parsed cleanly, so the record exists.
        let registry = dir.shutdown().await.unwrap();
        assert_eq!(registry.get(PeerId(0)).unwrap().name, "badname");
    }
}
