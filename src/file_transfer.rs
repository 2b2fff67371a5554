//! Moves file contents between peers over a dedicated connection.
//!
//! The ring only decides *who* serves a file; this module does the byte shuffling.
//! Each transfer uses its own short-lived TCP connection to the receiver's file port, carrying a
//! header line with the file identifier followed by the raw contents until EOF.
//! Files are served from `<directory>/<file>.pdf` and received into
//! `<directory>/received_<file>.pdf`.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::key_space::{FileId, PeerId};

/// Size of the chunks a file is streamed in
const CHUNK_SIZE: usize = 960;
/// Upper bound on the header line of a transfer
const MAX_HEADER_LEN: u64 = 32;

/// Local side of the file transfer service, shared between the node's tasks
#[derive(Clone)]
pub struct FileTransfer {
    state: Arc<FileTransferState>,
}

struct FileTransferState {
    directory: PathBuf,
    /// Files this node accepted to store, with the peer that asked for it
    stored: DashMap<FileId, PeerId>,
    /// Files received from other peers, with their size in bytes
    received: DashMap<FileId, u64>,
}

impl FileTransfer {
    pub fn new(directory: PathBuf) -> Self {
        FileTransfer {
            state: Arc::new(FileTransferState {
                directory,
                stored: DashMap::new(),
                received: DashMap::new(),
            }),
        }
    }

    pub fn source_path(&self, file: FileId) -> PathBuf {
        self.state.directory.join(format!("{}.pdf", file))
    }

    pub fn received_path(&self, file: FileId) -> PathBuf {
        self.state.directory.join(format!("received_{}.pdf", file))
    }

    /// Records that this node now holds `file` on behalf of `origin`
    pub fn accept_store(&self, file: FileId, origin: PeerId) {
        info!("Store of File {} accepted (requested by Peer {})", file, origin);
        self.state.stored.insert(file, origin);
    }

    pub fn is_stored(&self, file: FileId) -> bool {
        self.state.stored.contains_key(&file)
    }

    pub fn stored_files(&self) -> Vec<FileId> {
        let mut files: Vec<FileId> = self.state.stored.iter().map(|e| *e.key()).collect();
        files.sort_unstable();
        files
    }

    /// Size of a received file, if it has arrived completely
    pub fn received_size(&self, file: FileId) -> Option<u64> {
        self.state.received.get(&file).map(|entry| *entry.value())
    }

    /// Streams a local file to the file port at `destination`
    pub async fn send_file(&self, file: FileId, destination: SocketAddr) -> Result<u64> {
        let path = self.source_path(file);
        let mut source = File::open(&path)
            .await
            .with_context(|| format!("No local copy of File {} at {}", file, path.display()))?;
        let mut stream = TcpStream::connect(destination)
            .await
            .with_context(|| format!("Cannot reach file port {}", destination))?;

        stream.write_all(format!("{}\n", file).as_bytes()).await?;
        let mut buf = [0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
            sent += n as u64;
        }
        stream.shutdown().await?;
        info!("File {} ({} bytes) sent to {}", file, sent, destination);
        Ok(sent)
    }

    /// Accepts incoming transfers until the token is cancelled
    pub async fn serve(&self, listener: TcpListener, cancellation_token: CancellationToken) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    let stream = match result {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!("Failed to accept file transfer: {}", e);
                            continue;
                        }
                    };
                    let transfer = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = transfer.receive(stream).await {
                            warn!("File transfer failed: {:#}", e);
                        }
                    });
                }
                _ = cancellation_token.cancelled() => {
                    debug!("Stopped accepting file transfers");
                    break;
                }
            }
        }
    }

    async fn receive(&self, stream: TcpStream) -> Result<()> {
        let mut reader = BufReader::new(stream);
        let mut header = String::new();
        (&mut reader)
            .take(MAX_HEADER_LEN)
            .read_line(&mut header)
            .await?;
        let file: FileId = header
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid transfer header {:?}", header))?;

        let path = self.received_path(file);
        let mut target = File::create(&path)
            .await
            .with_context(|| format!("Cannot create {}", path.display()))?;
        let size = tokio::io::copy(&mut reader, &mut target).await?;
        target.flush().await?;
        self.state.received.insert(file, size);
        info!("File {} received ({} bytes)", file, size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_directory(name: &str) -> PathBuf {
        let directory = std::env::temp_dir().join(format!(
            "ring_dht_{}_{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&directory).unwrap();
        directory
    }

    #[test]
    fn store_index_tracks_accepted_files() {
        let files = FileTransfer::new(PathBuf::from("."));
        files.accept_store(300, 10);
        files.accept_store(15, 10);
        assert!(files.is_stored(15));
        assert!(!files.is_stored(16));
        assert_eq!(files.stored_files(), vec![15, 300]);
    }

    #[tokio::test]
    async fn file_is_copied_over_the_transfer_port() {
        let source = FileTransfer::new(scratch_directory("send"));
        let sink = FileTransfer::new(scratch_directory("receive"));
        let contents: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(source.source_path(77), &contents).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = {
            let sink = sink.clone();
            let token = token.clone();
            tokio::spawn(async move { sink.serve(listener, token).await })
        };

        assert_eq!(source.send_file(77, address).await.unwrap(), 5000);
        for _ in 0..100 {
            if sink.received_size(77).is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(sink.received_size(77), Some(5000));
        assert_eq!(std::fs::read(sink.received_path(77)).unwrap(), contents);

        token.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn missing_source_file_is_an_error() {
        let source = FileTransfer::new(scratch_directory("missing"));
        let result = source
            .send_file(123456, "127.0.0.1:9".parse().unwrap())
            .await;
        assert!(result.is_err());
    }
}
