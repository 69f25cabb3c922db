use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

const READ_CHUNK_SIZE: usize = 8192;

enum WriteOp {
    Data(Vec<u8>),
    Shutdown,
}

/// What one pass of the read loop produced.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadEvent {
    Data(Vec<u8>),
    Eof,
}

/// Write side of an accepted socket.
///
/// Writes go through a channel to a single writer task, so at most one
/// write is in flight and queued writes complete in FIFO order. Clones
/// share the same queue and the same open flag.
#[derive(Clone)]
pub struct Connection {
    peer: Option<SocketAddr>,
    writes: mpsc::UnboundedSender<WriteOp>,
    open: Arc<AtomicBool>,
}

/// Read side of an accepted socket, driven by the session task.
pub struct ConnectionReader {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    buffer: Box<[u8]>,
}

impl Connection {
    /// Wrap an accepted TCP socket
    pub fn accept(stream: TcpStream) -> Result<(Connection, ConnectionReader)> {
        let peer = stream.peer_addr()?;
        // Frames are small and latency-sensitive.
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, Some(peer)))
    }

    /// Wrap any duplex byte stream (used with in-memory pipes in tests)
    pub fn from_stream<S>(stream: S, peer: Option<SocketAddr>) -> (Connection, ConnectionReader)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writes, write_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::writer(write_half, write_rx, open.clone(), peer));

        let connection = Connection { peer, writes, open };
        let reader = ConnectionReader {
            reader: Box::new(read_half),
            buffer: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        };
        (connection, reader)
    }

    /// Writer task - drains the queue one buffer at a time
    async fn writer<W: AsyncWrite + Unpin>(
        mut writer: W,
        mut rx: mpsc::UnboundedReceiver<WriteOp>,
        open: Arc<AtomicBool>,
        peer: Option<SocketAddr>,
    ) {
        while let Some(op) = rx.recv().await {
            match op {
                WriteOp::Data(bytes) => {
                    trace!("Writing {} bytes to {:?}", bytes.len(), peer);
                    if let Err(e) = writer.write_all(&bytes).await {
                        debug!("Write to {:?} failed: {}", peer, e);
                        open.store(false, Ordering::SeqCst);
                        break;
                    }
                }
                WriteOp::Shutdown => {
                    let _ = writer.flush().await;
                    let _ = writer.shutdown().await;
                    break;
                }
            }
        }
        debug!("Writer for {:?} finished", peer);
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue bytes behind any pending writes
    pub fn write_raw(&self, bytes: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        self.writes
            .send(WriteOp::Data(bytes))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Close after queued writes have been flushed. Idempotent.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Closing connection to {:?}", self.peer);
            let _ = self.writes.send(WriteOp::Shutdown);
        }
    }
}

impl ConnectionReader {
    /// One iteration of the read loop.
    ///
    /// Graceful EOF is reported as [`ReadEvent::Eof`]; any other socket
    /// error is returned and ends the connection.
    pub async fn read(&mut self) -> Result<ReadEvent> {
        let n = self.reader.read(&mut self.buffer).await?;
        if n == 0 {
            return Ok(ReadEvent::Eof);
        }
        Ok(ReadEvent::Data(self.buffer[..n].to_vec()))
    }
}
