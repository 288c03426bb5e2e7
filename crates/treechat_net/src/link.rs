//! Links: one live line-oriented TCP connection to a neighbor.
//!
//! Outbound lines go through a bounded queue drained by a writer task that
//! owns the write half, so a whole line is always written before the next
//! one and no caller ever waits on the socket. A neighbor that stops reading
//! fills its queue, and the next send reports the link as stalled. The read
//! half is handed back separately to whichever task runs the receive loop.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, lookup_host};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::debug;

use crate::error::NetworkError;
use crate::identity::LinkId;
use crate::wire::write_line;

/// Pause between health probe attempts when the socket status is unreadable.
const PROBE_BACKOFF: Duration = Duration::from_millis(10);

/// Lines that may wait for the writer before the link counts as stalled.
pub const OUTBOUND_QUEUE_LEN: usize = 1024;

/// Buffered read half of a link, consumed by its receive loop.
pub type LinkReader = BufReader<OwnedReadHalf>;

/// Which side of the tree the remote end sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// We connected out to the remote; it is our parent.
    Parent,
    /// The remote connected to us; it is our child.
    Child,
}

/// Outcome of a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    Healthy,
    Failed,
}

/// Snapshot of a link for inspection.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub id: LinkId,
    pub role: LinkRole,
    pub remote_name: String,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

enum Outbound {
    Line(String),
    /// Write everything queued so far, then shut the write side down.
    Finish,
}

/// A bidirectional connection to one neighbor.
pub struct Link {
    id: LinkId,
    role: LinkRole,
    remote_name: String,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Outbound>,
    /// Held by the writer task only while a line is being written.
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// No further sends are accepted.
    closing: AtomicBool,
    /// The connection is torn down; receive loops watching it stop.
    closed: Arc<watch::Sender<bool>>,
}

impl Link {
    /// Wrap an established stream, returning the link and its read half.
    ///
    /// Spawns the writer task, so this must run inside a tokio runtime.
    pub fn from_stream(
        stream: TcpStream,
        role: LinkRole,
        remote_name: impl Into<String>,
    ) -> Result<(Arc<Link>, LinkReader), NetworkError> {
        let remote_addr = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on link to {remote_addr}: {e}");
        }
        let (read_half, write_half) = stream.into_split();

        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_LEN);
        let writer = Arc::new(Mutex::new(write_half));
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        tokio::spawn(write_loop(
            Arc::clone(&writer),
            queue,
            Arc::clone(&closed),
            remote_addr,
        ));

        let link = Arc::new(Link {
            id: LinkId::generate(),
            role,
            remote_name: remote_name.into(),
            remote_addr,
            connected_at: Utc::now(),
            outbound,
            writer,
            closing: AtomicBool::new(false),
            closed,
        });
        Ok((link, BufReader::new(read_half)))
    }

    /// Connect out to a prospective parent.
    pub async fn connect(
        host: &str,
        port: u16,
        remote_name: &str,
        timeout: Duration,
    ) -> Result<(Arc<Link>, LinkReader), NetworkError> {
        let target = resolve_target(host, port).await?;
        let stream = tokio::time::timeout(timeout, TcpStream::connect(target))
            .await
            .map_err(|_| NetworkError::Timeout(timeout))??;
        Self::from_stream(stream, LinkRole::Parent, remote_name)
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn info(&self) -> LinkInfo {
        LinkInfo {
            id: self.id,
            role: self.role,
            remote_name: self.remote_name.clone(),
            remote_addr: self.remote_addr,
            connected_at: self.connected_at,
        }
    }

    /// Queue one full line for the writer task. Never waits.
    ///
    /// Fails with `LinkStalled` when the remote has left
    /// [`OUTBOUND_QUEUE_LEN`] lines unread; the link is aborted in that case.
    pub fn send_line(&self, line: &str) -> Result<(), NetworkError> {
        if self.closing.load(Ordering::SeqCst) || self.is_closed() {
            return Err(NetworkError::LinkClosed(self.remote_addr.to_string()));
        }
        match self.outbound.try_send(Outbound::Line(line.to_string())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.abort();
                Err(NetworkError::LinkStalled(self.remote_addr.to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                self.mark_closed();
                Err(NetworkError::LinkClosed(self.remote_addr.to_string()))
            }
        }
    }

    /// Check liveness without blocking on the socket.
    ///
    /// A writer in the middle of a line means the connection is in use and
    /// counts as healthy; a stalled remote is caught by the outbound queue
    /// instead. Otherwise the socket's pending error is read. Only failures
    /// to read that status use up the `retries` budget.
    pub async fn probe(&self, retries: u32) -> LinkHealth {
        for attempt in 0..retries.max(1) {
            if self.is_closed() {
                return LinkHealth::Failed;
            }
            let Ok(writer) = self.writer.try_lock() else {
                return LinkHealth::Healthy;
            };
            let stream: &TcpStream = (*writer).as_ref();
            match stream.take_error() {
                Ok(None) => return LinkHealth::Healthy,
                Ok(Some(e)) => {
                    debug!("Link to {} reports socket error: {e}", self.remote_addr);
                    drop(writer);
                    self.abort();
                    return LinkHealth::Failed;
                }
                Err(e) => {
                    debug!("Probe attempt {attempt} on {} failed: {e}", self.remote_addr);
                }
            }
            drop(writer);
            tokio::time::sleep(PROBE_BACKOFF).await;
        }
        LinkHealth::Failed
    }

    /// Record that the connection is gone. Later sends fail immediately and
    /// anything waiting in [`closed()`](Link::closed) wakes up.
    pub fn mark_closed(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the link has been torn down.
    pub async fn closed(&self) {
        wait_closed(&mut self.closed.subscribe()).await;
    }

    /// Flush queued lines, then shut the write side down; the remote's
    /// receive loop then sees EOF. Falls back to [`abort()`](Link::abort)
    /// when the queue is full.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.outbound.try_send(Outbound::Finish).is_err() {
            self.abort();
        }
    }

    /// Tear the link down now, dropping anything still queued.
    pub fn abort(&self) {
        self.mark_closed();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("remote_name", &self.remote_name)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Drain the outbound queue onto the socket until finished or torn down.
async fn write_loop(
    writer: Arc<Mutex<OwnedWriteHalf>>,
    mut queue: mpsc::Receiver<Outbound>,
    closed: Arc<watch::Sender<bool>>,
    remote_addr: SocketAddr,
) {
    let mut closed_rx = closed.subscribe();
    loop {
        let line = tokio::select! {
            next = queue.recv() => match next {
                Some(Outbound::Line(line)) => line,
                Some(Outbound::Finish) | None => break,
            },
            _ = wait_closed(&mut closed_rx) => break,
        };

        let mut guard = writer.lock().await;
        let result = tokio::select! {
            result = write_line(&mut *guard, &line) => result,
            _ = wait_closed(&mut closed_rx) => break,
        };
        drop(guard);

        if let Err(e) = result {
            debug!("Write to {remote_addr} failed: {e}");
            break;
        }
    }

    closed.send_replace(true);
    let _ = writer.lock().await.shutdown().await;
    debug!("Writer for {remote_addr} stopped");
}

/// Resolve a candidate's advertised address.
///
/// An unspecified address (`0.0.0.0` or `::`) means "this host" and becomes
/// loopback. Anything that is not a literal IP goes through DNS.
async fn resolve_target(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        let ip = match ip {
            IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            other => other,
        };
        return Ok(SocketAddr::new(ip, port));
    }

    lookup_host((host, port)).await?.next().ok_or_else(|| {
        NetworkError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address for {host}"),
        ))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
