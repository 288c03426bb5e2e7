//! Directory client: the peer side of the rendezvous protocol.
//!
//! Every call opens a fresh connection, performs one request and closes the
//! connection whether or not the request succeeded. Each round trip is
//! bounded by the client's timeout.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::NetworkError;
use crate::identity::PeerId;
use crate::protocol::{Command, DirectoryRecord, Registration};
use crate::wire::{read_line, write_line};

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// The id the directory assigned to us.
    pub id: PeerId,
    /// Registered peers with smaller ids, eligible as parents.
    pub candidates: Vec<DirectoryRecord>,
    /// The address we registered under.
    pub address: IpAddr,
}

/// Speaks the directory protocol on behalf of one peer.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    addr: String,
    timeout: Duration,
}

impl DirectoryClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// The directory address this client talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Register and receive an id plus the current candidate set.
    ///
    /// With no `address`, the local IP of the directory connection is
    /// advertised: the interface through which this host reaches the
    /// directory is the one other peers are most likely to reach too.
    pub async fn join(
        &self,
        name: &str,
        address: Option<IpAddr>,
        port: u16,
    ) -> Result<JoinOutcome, NetworkError> {
        self.bounded(async {
            let stream = self.connect().await?;
            let address = address.unwrap_or(stream.local_addr()?.ip());
            let registration = Registration {
                name: name.to_string(),
                address: address.to_string(),
                port,
            };
            let (read_half, mut writer) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            write_line(&mut writer, &Command::Join.code().to_string()).await?;
            write_line(&mut writer, &registration.to_line()).await?;

            let line = read_line(&mut reader).await?.ok_or_else(|| {
                NetworkError::DirectoryUnavailable("closed before assigning an id".into())
            })?;
            let id: PeerId = line
                .parse()
                .map_err(|_| NetworkError::Protocol(format!("invalid id line {line:?}")))?;

            let candidates = read_candidates(&mut reader, id).await?;
            debug!("Joined directory as {id} with {} candidate(s)", candidates.len());
            Ok(JoinOutcome {
                id,
                candidates,
                address,
            })
        })
        .await
    }

    /// Ask for a fresh candidate set (peers with ids below `id`).
    pub async fn request_new(&self, id: PeerId) -> Result<Vec<DirectoryRecord>, NetworkError> {
        self.bounded(async {
            let stream = self.connect().await?;
            let (read_half, mut writer) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            write_line(&mut writer, &Command::RequestNew.code().to_string()).await?;
            write_line(&mut writer, &id.to_string()).await?;

            read_candidates(&mut reader, id).await
        })
        .await
    }

    /// Announce departure. The directory sends nothing back.
    pub async fn leave(&self, id: PeerId) -> Result<(), NetworkError> {
        self.bounded(async {
            let mut stream = self.connect().await?;
            write_line(&mut stream, &Command::Exit.code().to_string()).await?;
            write_line(&mut stream, &id.to_string()).await?;
            Ok(())
        })
        .await
    }

    async fn connect(&self) -> Result<TcpStream, NetworkError> {
        self.bounded(async { Ok(TcpStream::connect(self.addr.as_str()).await?) })
            .await
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, NetworkError>
    where
        F: Future<Output = Result<T, NetworkError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| NetworkError::Timeout(self.timeout))?
    }
}

/// Read candidate lines until EOF.
///
/// Malformed lines are skipped, and so is any record whose id is not below
/// `own_id`; only strictly smaller ids are ever eligible as parents.
async fn read_candidates<R>(
    reader: &mut R,
    own_id: PeerId,
) -> Result<Vec<DirectoryRecord>, NetworkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut candidates = Vec::new();
    while let Some(line) = read_line(reader).await? {
        match DirectoryRecord::from_line(&line) {
            Some(record) if record.id < own_id => candidates.push(record),
            Some(record) => {
                warn!("Discarding candidate {} not below own id {own_id}", record.id);
            }
            None => {
                warn!("Skipping malformed candidate line {line:?}");
            }
        }
    }
    Ok(candidates)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryConfig;
    use crate::directory::DirectoryService;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Consume `count` request lines so closing the socket does not reset it.
    async fn read_request_lines(stream: &mut TcpStream, count: usize) {
        let mut reader = BufReader::new(stream);
        for _ in 0..count {
            read_line(&mut reader).await.unwrap();
        }
    }

    fn local_directory_config() -> DirectoryConfig {
        DirectoryConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_join_request_new_leave() {
        let dir = DirectoryService::start(&local_directory_config()).await.unwrap();
        let client = DirectoryClient::new(dir.local_addr().to_string(), Duration::from_secs(2));

        let a = client.join("a", None, 5000).await.unwrap();
        assert_eq!(a.id, PeerId(0));
        assert!(a.candidates.is_empty());
        assert!(a.address.is_loopback());

        let b = client.join("b", None, 5001).await.unwrap();
        assert_eq!(b.id, PeerId(1));
        assert_eq!(b.candidates.len(), 1);
        assert_eq!(b.candidates[0].name, "a");

        let c = client.join("c", None, 5002).await.unwrap();
        assert_eq!(c.candidates.len(), 2);

        client.leave(PeerId(0)).await.unwrap();
        let fresh = client.request_new(c.id).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, PeerId(1));

        dir.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = DirectoryClient::new(addr.to_string(), Duration::from_secs(1));
        assert!(client.request_new(PeerId(3)).await.is_err());
        assert!(client.join("x", None, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_silent_directory_times_out() {
        // Accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client = DirectoryClient::new(addr.to_string(), Duration::from_millis(200));
        match client.request_new(PeerId(1)).await {
            Err(NetworkError::Timeout(d)) => assert_eq!(d, Duration::from_millis(200)),
            other => panic!("Expected Timeout, got {other:?}"),
        }
        hold.abort();
    }

    #[tokio::test]
    async fn test_bad_candidates_are_filtered() {
        // A hand-rolled directory that answers with junk mixed in.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request_lines(&mut stream, 2).await;
            stream
                .write_all(b"ok#!127.0.0.1#!0#!5000#!\nnot a record\nself#!127.0.0.1#!2#!5002#!\nbig#!127.0.0.1#!9#!5009#!\n")
                .await
                .unwrap();
        });

        let client = DirectoryClient::new(addr.to_string(), Duration::from_secs(2));
        let candidates = client.request_new(PeerId(2)).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_id_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request_lines(&mut stream, 2).await;
            stream.write_all(b"banana\n").await.unwrap();
        });

        let client = DirectoryClient::new(addr.to_string(), Duration::from_secs(2));
        match client.join("y", None, 1).await {
            Err(NetworkError::Protocol(_)) => {}
            other => panic!("Expected Protocol error, got {other:?}"),
        }
        server.await.unwrap();
    }
}
