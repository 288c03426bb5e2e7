//! Directory service: the rendezvous point that assigns ids.
//!
//! One request per connection: the first line is a [`Command`], the rest of
//! the exchange depends on it, and the directory closes the connection when
//! the reply is complete. Requests are handled one at a time in arrival
//! order, so the registry never sees concurrent mutation and ids stay
//! strictly increasing without any locking.

use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DirectoryConfig;
use crate::error::NetworkError;
use crate::identity::PeerId;
use crate::protocol::{Command, Registration};
use crate::registry::Registry;
use crate::wire::{read_line, write_line};

/// The directory process state: a listener and the registry it guards.
pub struct DirectoryService {
    listener: TcpListener,
    registry: Registry,
}

impl DirectoryService {
    /// Bind the listener. Failure here is fatal for the directory process.
    pub async fn bind(config: &DirectoryConfig) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        Ok(Self {
            listener,
            registry: Registry::new(),
        })
    }

    /// The address actually bound (resolves an ephemeral port).
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Bind and run the service in the background.
    pub async fn start(config: &DirectoryConfig) -> Result<DirectoryHandle, NetworkError> {
        let service = Self::bind(config).await?;
        let addr = service.local_addr()?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(service.run(shutdown_rx));
        Ok(DirectoryHandle {
            addr,
            shutdown_tx,
            task,
        })
    }

    /// Accept and serve requests until the shutdown signal fires.
    ///
    /// Each request is served to completion before the next accept.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Registry {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Directory listening on {addr}");
        }

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = self.serve(stream).await {
                                debug!("Request from {peer_addr} ended early: {e}");
                            }
                        }
                        Err(e) => {
                            error!("Directory accept failed: {e}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Directory shutting down");
                    break;
                }
            }
        }

        self.registry
    }

    /// Serve one request on an accepted connection.
    async fn serve(&mut self, stream: TcpStream) -> Result<(), NetworkError> {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let Some(line) = read_line(&mut reader).await? else {
            return Ok(());
        };
        let Some(command) = Command::from_line(&line) else {
            debug!("Ignoring unknown directory command {line:?}");
            return Ok(());
        };

        match command {
            Command::Join => {
                // The id goes out before the registration is read; once sent it
                // is never handed out again, even if registration fails.
                let id = self.registry.reserve_id();
                write_line(&mut writer, &id.to_string()).await?;

                let registration = read_line(&mut reader)
                    .await?
                    .and_then(|l| Registration::from_line(&l));
                let Some(registration) = registration else {
                    warn!("Malformed registration for id {id}, not registering");
                    return Ok(());
                };

                let record = registration.into_record(id);
                info!(
                    "Peer '{}' joined as {id} ({}:{})",
                    record.name, record.address, record.port
                );
                self.registry.insert(record);
                self.send_candidates(&mut writer, id).await?;
            }
            Command::RequestNew => {
                let Some(id) = read_id(&mut reader).await? else {
                    debug!("Malformed REQUEST_NEW, ignoring");
                    return Ok(());
                };
                self.send_candidates(&mut writer, id).await?;
            }
            Command::Exit => {
                let Some(id) = read_id(&mut reader).await? else {
                    debug!("Malformed EXIT, ignoring");
                    return Ok(());
                };
                match self.registry.remove(id) {
                    Some(record) => info!("Peer '{}' ({id}) left", record.name),
                    None => debug!("EXIT for unknown id {id}"),
                }
            }
        }

        let _ = writer.shutdown().await;
        Ok(())
    }

    /// Write every record with an id below `id`, one per line.
    async fn send_candidates<W>(&self, writer: &mut W, id: PeerId) -> Result<(), NetworkError>
    where
        W: AsyncWrite + Unpin,
    {
        let candidates = self.registry.candidates_below(id);
        debug!("Sending {} candidate(s) to {id}", candidates.len());
        for record in &candidates {
            write_line(writer, &record.to_line()).await?;
        }
        Ok(())
    }
}

async fn read_id<R>(reader: &mut R) -> Result<Option<PeerId>, NetworkError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    Ok(read_line(reader).await?.and_then(|l| l.parse().ok()))
}

/// Handle to a directory running in the background.
pub struct DirectoryHandle {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Registry>,
}

impl DirectoryHandle {
    /// The bound listener address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop the service and return the final registry.
    pub async fn shutdown(self) -> Result<Registry, NetworkError> {
        let _ = self.shutdown_tx.send(());
        self.task
            .await
            .map_err(|e| NetworkError::Io(std::io::Error::other(e)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DirectoryRecord;
    use tokio::io::AsyncReadExt;

    async fn start_local() -> DirectoryHandle {
        let config = DirectoryConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
        };
        DirectoryService::start(&config).await.unwrap()
    }

    /// Send raw request lines and collect every reply line until EOF.
    async fn raw_request(addr: SocketAddr, lines: &[&str]) -> Vec<String> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        for line in lines {
            stream.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        }
        stream.shutdown().await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply.lines().map(str::to_string).collect()
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = DirectoryConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let service = DirectoryService::bind(&config).await.unwrap();
        assert_ne!(service.local_addr().unwrap().port(), 0);
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_join_returns_id_then_candidates() {
        let dir = start_local().await;
        let addr = dir.local_addr();

        let reply = raw_request(addr, &["1", "alice#!127.0.0.1#!-1#!5000#!"]).await;
        assert_eq!(reply, vec!["0"]);

        let reply = raw_request(addr, &["1", "bob#!127.0.0.1#!-1#!5001#!"]).await;
        assert_eq!(reply.len(), 2);
        assert_eq!(reply[0], "1");
        let candidate = DirectoryRecord::from_line(&reply[1]).unwrap();
        assert_eq!(candidate.id, PeerId(0));
        assert_eq!(candidate.name, "alice");
        assert_eq!(candidate.port, 5000);

        let registry = dir.shutdown().await.unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_request_new_does_not_mutate() {
        let dir = start_local().await;
        let addr = dir.local_addr();
        raw_request(addr, &["1", "a#!127.0.0.1#!-1#!5000#!"]).await;
        raw_request(addr, &["1", "b#!127.0.0.1#!-1#!5001#!"]).await;

        let reply = raw_request(addr, &["2", "1"]).await;
        assert_eq!(reply.len(), 1);
        let reply = raw_request(addr, &["2", "0"]).await;
        assert!(reply.is_empty());

        let registry = dir.shutdown().await.unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.next_id(), PeerId(2));
    }

    #[tokio::test]
    async fn test_exit_removes_record() {
        let dir = start_local().await;
        let addr = dir.local_addr();
        raw_request(addr, &["1", "a#!127.0.0.1#!-1#!5000#!"]).await;
        raw_request(addr, &["1", "b#!127.0.0.1#!-1#!5001#!"]).await;

        let reply = raw_request(addr, &["3", "0"]).await;
        assert!(reply.is_empty());

        let registry = dir.shutdown().await.unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(PeerId(0)).is_none());
        assert!(registry.get(PeerId(1)).is_some());
    }

    #[tokio::test]
    async fn test_malformed_requests_are_tolerated() {
        let dir = start_local().await;
        let addr = dir.local_addr();

        assert!(raw_request(addr, &["garbage"]).await.is_empty());
        assert!(raw_request(addr, &["9"]).await.is_empty());
        assert!(raw_request(addr, &["3", "not-a-number"]).await.is_empty());
        assert!(raw_request(addr, &[]).await.is_empty());

        // The id is consumed but nothing is registered.
        let reply = raw_request(addr, &["1", "broken-registration"]).await;
        assert_eq!(reply, vec!["0"]);

        let reply = raw_request(addr, &["1", "ok#!127.0.0.1#!-1#!5000#!"]).await;
        assert_eq!(reply, vec!["1"]);

        let registry = dir.shutdown().await.unwrap();
        assert_eq!(registry.len(), 1);
    }
}
